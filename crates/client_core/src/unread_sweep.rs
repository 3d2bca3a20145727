use std::sync::Arc;

use futures::future::join_all;
use shared::{
    domain::PostPage,
    protocol::{BatchLabel, Transition, TransitionBatch},
};
use storage::StateSnapshot;
use tracing::{debug, info, warn};

use crate::post_sync::{FetchPlan, PostSyncEngine};

/// Fans the post sync engine out over every unread channel and merges the results.
pub struct UnreadSweepCoordinator {
    engine: Arc<PostSyncEngine>,
}

impl UnreadSweepCoordinator {
    pub fn new(engine: Arc<PostSyncEngine>) -> Self {
        Self { engine }
    }

    /// One batch holding a (received, at-time) pair per synced channel followed by a single
    /// combined received-posts transition. Channels whose fetch failed are left out; with no
    /// unread channels, or no successful fetch, the batch is empty.
    pub async fn sync_all_unread(&self, snapshot: &StateSnapshot) -> TransitionBatch {
        let mut batch = TransitionBatch::new(BatchLabel::LoadUnreadChannelPosts);
        let unread = snapshot.unread_channel_ids();
        if unread.is_empty() {
            debug!("sweep: no unread channels");
            return batch;
        }

        let fetches = unread.iter().map(|channel_id| {
            let plan = FetchPlan::for_unread_channel(snapshot, channel_id);
            self.engine.fetch(channel_id, plan)
        });
        let results = join_all(fetches).await;

        let mut combined = PostPage::default();
        let mut synced = 0usize;
        let mut failed = 0usize;
        for result in results {
            match result {
                Ok(fetched) => {
                    combined.merge(&fetched.page);
                    batch.extend(fetched.into_transitions());
                    synced += 1;
                }
                Err(err) => {
                    warn!(
                        channel_id = %err.channel_id,
                        attempts = err.attempts,
                        error = %err.cause,
                        "sweep: dropping channel after failed fetch"
                    );
                    failed += 1;
                }
            }
        }

        if synced > 0 {
            batch.push(Transition::ReceivedPosts { page: combined });
        }
        info!(
            unread = unread.len(),
            synced,
            failed,
            transitions = batch.len(),
            "sweep: unread channels synced"
        );
        batch
    }
}

#[cfg(test)]
#[path = "tests/unread_sweep_tests.rs"]
mod tests;
