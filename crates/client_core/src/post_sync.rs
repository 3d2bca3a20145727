use std::sync::Arc;

use shared::{
    domain::{ChannelId, PostPage, Timestamp},
    protocol::{BatchLabel, Transition, TransitionBatch},
};
use storage::StateSnapshot;
use tracing::{debug, info};

use crate::{collaborators::RemotePostSource, error::FetchError, retry::RetryPolicy};

/// Which local time source produced an incremental fetch's since-timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinceBasis {
    /// The websocket reconnected at or after the last fetch; pushes may have been missed.
    ConnectionEpoch,
    /// Newest `create_at` across every post cached for the channel.
    LatestPost,
    /// The channel's own cursor, used when it has been fetched but holds no posts.
    Cursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    Recent,
    Since { since: Timestamp, basis: SinceBasis },
}

impl FetchPlan {
    /// Decision for a single-channel load, keyed on whether the channel was ever fetched.
    pub fn for_channel(snapshot: &StateSnapshot, channel_id: &ChannelId) -> Self {
        match snapshot.sync_cursor(channel_id) {
            None => Self::Recent,
            Some(cursor) => Self::incremental(snapshot, channel_id, Some(cursor)),
        }
    }

    /// Decision for an unread sweep, keyed on whether any posts are loaded locally.
    pub fn for_unread_channel(snapshot: &StateSnapshot, channel_id: &ChannelId) -> Self {
        if snapshot.post_ids_in_channel(channel_id).is_empty() {
            return Self::Recent;
        }
        Self::incremental(snapshot, channel_id, snapshot.sync_cursor(channel_id))
    }

    fn incremental(
        snapshot: &StateSnapshot,
        channel_id: &ChannelId,
        cursor: Option<Timestamp>,
    ) -> Self {
        if let (Some(cursor), Some(epoch)) = (cursor, snapshot.connection_epoch()) {
            if epoch >= cursor {
                return Self::Since {
                    since: epoch,
                    basis: SinceBasis::ConnectionEpoch,
                };
            }
        }
        if let Some(latest) = snapshot.latest_post_create_at(channel_id) {
            return Self::Since {
                since: latest,
                basis: SinceBasis::LatestPost,
            };
        }
        match cursor {
            Some(cursor) => Self::Since {
                since: cursor,
                basis: SinceBasis::Cursor,
            },
            None => Self::Recent,
        }
    }
}

/// The successful result of one channel fetch, before it is turned into transitions.
#[derive(Debug, Clone)]
pub struct ChannelFetch {
    pub channel_id: ChannelId,
    pub plan: FetchPlan,
    pub page: PostPage,
    pub fetched_at: Timestamp,
}

impl ChannelFetch {
    /// The received-posts transition followed by the cursor update.
    pub fn into_transitions(self) -> [Transition; 2] {
        let received = match self.plan {
            FetchPlan::Recent => Transition::ReceivedPostsInChannel {
                channel_id: self.channel_id.clone(),
                page: self.page,
                recent: true,
            },
            FetchPlan::Since { .. } => Transition::ReceivedPostsSince {
                channel_id: self.channel_id.clone(),
                page: self.page,
            },
        };
        [
            received,
            Transition::ReceivedPostsForChannelAtTime {
                channel_id: self.channel_id,
                time: self.fetched_at,
            },
        ]
    }
}

pub struct PostSyncEngine {
    source: Arc<dyn RemotePostSource>,
    retry: RetryPolicy,
}

impl PostSyncEngine {
    pub fn new(source: Arc<dyn RemotePostSource>, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Fetches and normalizes the posts of one channel; does not touch the store.
    pub async fn sync_channel(
        &self,
        snapshot: &StateSnapshot,
        channel_id: &ChannelId,
    ) -> Result<TransitionBatch, FetchError> {
        let plan = FetchPlan::for_channel(snapshot, channel_id);
        let fetched = self.fetch(channel_id, plan).await?;
        let mut batch = TransitionBatch::new(BatchLabel::LoadPostsInChannel);
        batch.extend(fetched.into_transitions());
        Ok(batch)
    }

    /// Executes `plan` through the retry policy.
    pub async fn fetch(
        &self,
        channel_id: &ChannelId,
        plan: FetchPlan,
    ) -> Result<ChannelFetch, FetchError> {
        let page = match plan {
            FetchPlan::Recent => {
                debug!(channel_id = %channel_id, "sync: full fetch");
                self.retry
                    .run(channel_id, "fetch_recent", || {
                        self.source.fetch_recent(channel_id)
                    })
                    .await?
            }
            FetchPlan::Since { since, basis } => {
                debug!(channel_id = %channel_id, since = since.0, ?basis, "sync: incremental fetch");
                self.retry
                    .run(channel_id, "fetch_since", || {
                        self.source.fetch_since(channel_id, since)
                    })
                    .await?
            }
        };

        info!(
            channel_id = %channel_id,
            ?plan,
            posts = page.len(),
            "sync: channel posts fetched"
        );
        Ok(ChannelFetch {
            channel_id: channel_id.clone(),
            plan,
            page,
            fetched_at: Timestamp::now(),
        })
    }

    /// Fetches the page older than the oldest cached post. `None` when nothing is cached yet,
    /// in which case a regular sync has to run first.
    pub async fn load_older_posts(
        &self,
        snapshot: &StateSnapshot,
        channel_id: &ChannelId,
    ) -> Result<Option<TransitionBatch>, FetchError> {
        let Some(oldest) = snapshot.oldest_post_id(channel_id) else {
            debug!(channel_id = %channel_id, "sync: no cached posts to page back from");
            return Ok(None);
        };

        let page = self
            .retry
            .run(channel_id, "fetch_before", || {
                self.source.fetch_before(channel_id, oldest)
            })
            .await?;
        info!(
            channel_id = %channel_id,
            before = %oldest,
            posts = page.len(),
            "sync: older posts fetched"
        );

        Ok(Some(TransitionBatch::single(
            BatchLabel::LoadOlderPosts,
            Transition::ReceivedPostsBefore {
                channel_id: channel_id.clone(),
                page,
            },
        )))
    }
}

#[cfg(test)]
#[path = "tests/post_sync_tests.rs"]
mod tests;
