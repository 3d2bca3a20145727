use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex as StdMutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{
        Channel, ChannelId, ChannelMembership, Post, PostId, PostPage, Team, TeamId, Timestamp,
        UserId,
    },
    protocol::{BatchLabel, TransitionBatch},
};
use storage::{MemoryStateStore, StateSnapshot, StateStore, StoreState};
use tokio::sync::Mutex;

use crate::{collaborators::RemotePostSource, retry::RetryPolicy};

pub(crate) const CURRENT_USER_ID: &str = "current-user-id";
pub(crate) const CURRENT_CHANNEL_ID: &str = "channel-id";
pub(crate) const CURRENT_CHANNEL_NAME: &str = "channel-name";
pub(crate) const CURRENT_TEAM_ID: &str = "current-team-id";
pub(crate) const CURRENT_TEAM_NAME: &str = "current-team-name";

static NEXT_CREATE_AT: AtomicI64 = AtomicI64::new(1_700_000_000_000);

pub(crate) fn fake_post(channel_id: &ChannelId) -> Post {
    Post {
        id: PostId::new(uuid::Uuid::new_v4().simple().to_string()),
        channel_id: channel_id.clone(),
        create_at: Timestamp(NEXT_CREATE_AT.fetch_add(1, Ordering::SeqCst)),
        user_id: Some(UserId::new(CURRENT_USER_ID)),
        message: "fake post".into(),
    }
}

pub(crate) fn fake_page(channel_id: &ChannelId, count: usize) -> PostPage {
    PostPage::from_posts((0..count).map(|_| fake_post(channel_id)))
}

pub(crate) fn test_channel(id: &str) -> Channel {
    Channel {
        id: ChannelId::new(id),
        team_id: TeamId::new(CURRENT_TEAM_ID),
        name: id.to_string(),
        display_name: "Test Channel".into(),
        total_msg_count: 0,
        delete_at: Timestamp::default(),
    }
}

pub(crate) fn test_member(channel_id: &str) -> ChannelMembership {
    ChannelMembership::empty(ChannelId::new(channel_id), UserId::new(CURRENT_USER_ID))
}

/// Current user, one team, `channel-id` (active) and `channel-id-2` with zeroed memberships.
pub(crate) fn seeded_state() -> StoreState {
    StoreState::default()
        .with_current_user(UserId::new(CURRENT_USER_ID))
        .with_team(Team {
            id: TeamId::new(CURRENT_TEAM_ID),
            name: CURRENT_TEAM_NAME.into(),
            display_name: "Current Team".into(),
        })
        .with_channel(test_channel("channel-id"))
        .with_channel(test_channel("channel-id-2"))
        .with_membership(test_member("channel-id"))
        .with_membership(test_member("channel-id-2"))
        .with_active_channel(ChannelId::new(CURRENT_CHANNEL_ID))
}

/// Adds an unread channel: two unseen messages for the current user.
pub(crate) fn with_unread_channel(state: StoreState, id: &str) -> StoreState {
    let mut channel = test_channel(id);
    channel.total_msg_count = 2;
    state.with_channel(channel).with_membership(test_member(id))
}

pub(crate) fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: std::time::Duration::from_millis(1),
        max_delay: std::time::Duration::from_millis(2),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SourceCall {
    Recent(ChannelId),
    Since(ChannelId, Timestamp),
    Before(ChannelId, PostId),
    Lookup { team_name: String, channel_name: String },
}

/// Scripted remote: `fetch_recent` returns `recent_page_size` fresh posts, `fetch_since` and
/// `fetch_before` return two, and failures are consumed per channel.
pub(crate) struct FakePostSource {
    recent_page_size: usize,
    failures: Mutex<HashMap<ChannelId, usize>>,
    lookup: Result<Channel, String>,
    calls: Arc<Mutex<Vec<SourceCall>>>,
}

impl FakePostSource {
    pub(crate) fn new() -> Self {
        Self {
            recent_page_size: 60,
            failures: Mutex::new(HashMap::new()),
            lookup: Ok(test_channel("received-channel-id")),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn failing(mut self, channel_id: &str, times: usize) -> Self {
        self.failures
            .get_mut()
            .insert(ChannelId::new(channel_id), times);
        self
    }

    pub(crate) fn with_lookup(mut self, lookup: Result<Channel, String>) -> Self {
        self.lookup = lookup;
        self
    }

    pub(crate) async fn calls(&self) -> Vec<SourceCall> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: SourceCall, channel_id: &ChannelId) -> Result<()> {
        self.calls.lock().await.push(call);
        let mut failures = self.failures.lock().await;
        if let Some(remaining) = failures.get_mut(channel_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(anyhow!("simulated network failure for {channel_id}"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemotePostSource for FakePostSource {
    async fn fetch_recent(&self, channel_id: &ChannelId) -> Result<PostPage> {
        self.record(SourceCall::Recent(channel_id.clone()), channel_id)
            .await?;
        Ok(fake_page(channel_id, self.recent_page_size))
    }

    async fn fetch_since(&self, channel_id: &ChannelId, since: Timestamp) -> Result<PostPage> {
        self.record(SourceCall::Since(channel_id.clone(), since), channel_id)
            .await?;
        Ok(fake_page(channel_id, 2))
    }

    async fn fetch_before(&self, channel_id: &ChannelId, before: &PostId) -> Result<PostPage> {
        self.record(
            SourceCall::Before(channel_id.clone(), before.clone()),
            channel_id,
        )
        .await?;
        Ok(fake_page(channel_id, 2))
    }

    async fn fetch_channel_by_team_and_name(
        &self,
        team_name: &str,
        channel_name: &str,
    ) -> Result<Channel> {
        self.calls.lock().await.push(SourceCall::Lookup {
            team_name: team_name.to_string(),
            channel_name: channel_name.to_string(),
        });
        self.lookup.clone().map_err(|message| anyhow!(message))
    }
}

/// Memory store that also keeps every batch it was asked to apply, and how many snapshots were
/// still alive when it arrived.
pub(crate) struct RecordingStore {
    inner: MemoryStateStore,
    batches: StdMutex<Vec<TransitionBatch>>,
    snapshots_at_apply: StdMutex<Vec<usize>>,
}

impl RecordingStore {
    pub(crate) fn new(state: StoreState) -> Self {
        Self {
            inner: MemoryStateStore::new(state),
            batches: StdMutex::new(Vec::new()),
            snapshots_at_apply: StdMutex::new(Vec::new()),
        }
    }

    pub(crate) fn labels(&self) -> Vec<BatchLabel> {
        self.batches().iter().map(|batch| batch.label).collect()
    }

    pub(crate) fn snapshots_at_apply(&self) -> Vec<usize> {
        self.snapshots_at_apply
            .lock()
            .expect("snapshots lock")
            .clone()
    }

    pub(crate) fn batches(&self) -> Vec<TransitionBatch> {
        self.batches.lock().expect("batches lock").clone()
    }
}

impl StateStore for RecordingStore {
    fn snapshot(&self) -> StateSnapshot {
        self.inner.snapshot()
    }

    fn apply(&self, batch: TransitionBatch) -> Result<u64> {
        self.snapshots_at_apply
            .lock()
            .expect("snapshots lock")
            .push(self.inner.outstanding_snapshots());
        self.batches
            .lock()
            .expect("batches lock")
            .push(batch.clone());
        self.inner.apply(batch)
    }
}
