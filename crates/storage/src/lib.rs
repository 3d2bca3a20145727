use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::Result;
use parking_lot::RwLock;
use shared::{
    domain::{
        Channel, ChannelId, ChannelMembership, Post, PostId, PostPage, Team, TeamId, Timestamp,
        UserId,
    },
    protocol::{Transition, TransitionBatch},
};
use tracing::debug;

/// Local state store consumed by the sync engine.
///
/// Reads go through an immutable [`StateSnapshot`]; writes are whole batches that become visible
/// together or not at all.
pub trait StateStore: Send + Sync {
    fn snapshot(&self) -> StateSnapshot;

    /// Applies `batch` atomically and returns the resulting state version.
    fn apply(&self, batch: TransitionBatch) -> Result<u64>;
}

#[derive(Debug, Clone, Default)]
pub struct StoreState {
    version: u64,
    current_user_id: Option<UserId>,
    current_team_id: Option<TeamId>,
    active_channel_id: Option<ChannelId>,
    previous_channel_id: Option<ChannelId>,
    teams: HashMap<TeamId, Team>,
    channels: HashMap<ChannelId, Channel>,
    memberships: HashMap<(UserId, ChannelId), ChannelMembership>,
    posts: HashMap<PostId, Post>,
    posts_in_channel: HashMap<ChannelId, Vec<PostId>>,
    last_get_posts: HashMap<ChannelId, Timestamp>,
    last_connect_at: Option<Timestamp>,
}

impl StoreState {
    pub fn with_current_user(mut self, user_id: UserId) -> Self {
        self.current_user_id = Some(user_id);
        self
    }

    pub fn with_team(mut self, team: Team) -> Self {
        if self.current_team_id.is_none() {
            self.current_team_id = Some(team.id.clone());
        }
        self.teams.insert(team.id.clone(), team);
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.insert(channel.id.clone(), channel);
        self
    }

    pub fn with_membership(mut self, member: ChannelMembership) -> Self {
        self.memberships.insert(
            (member.user_id.clone(), member.channel_id.clone()),
            member,
        );
        self
    }

    pub fn with_active_channel(mut self, channel_id: ChannelId) -> Self {
        self.previous_channel_id = self.active_channel_id.replace(channel_id);
        self
    }

    pub fn with_posts(mut self, channel_id: ChannelId, posts: impl IntoIterator<Item = Post>) -> Self {
        self.merge_channel_posts(&channel_id, &PostPage::from_posts(posts));
        self
    }

    pub fn with_sync_cursor(mut self, channel_id: ChannelId, at: Timestamp) -> Self {
        self.advance_cursor(channel_id, at);
        self
    }

    pub fn with_connection_epoch(mut self, at: Timestamp) -> Self {
        self.last_connect_at = Some(at);
        self
    }

    fn reduce(&mut self, transition: Transition) {
        match transition {
            Transition::SelectChannel {
                channel_id,
                channel,
                member,
                team_id,
            } => {
                self.channels.insert(channel.id.clone(), channel);
                self.memberships
                    .insert((member.user_id.clone(), channel_id.clone()), member);
                self.previous_channel_id = self.active_channel_id.replace(channel_id);
                self.current_team_id = Some(team_id);
            }
            Transition::ReceivedChannel { channel } => {
                self.channels.insert(channel.id.clone(), channel);
            }
            Transition::ReceivedPostsInChannel {
                channel_id, page, ..
            }
            | Transition::ReceivedPostsSince { channel_id, page }
            | Transition::ReceivedPostsBefore { channel_id, page } => {
                self.merge_channel_posts(&channel_id, &page);
            }
            Transition::ReceivedPostsForChannelAtTime { channel_id, time } => {
                self.advance_cursor(channel_id, time);
            }
            Transition::ReceivedPosts { page } => {
                for (id, post) in page.posts {
                    self.posts.entry(id).or_insert(post);
                }
            }
            Transition::MarkChannelViewed { channel_id, at } => {
                if let Some(member) = self.current_membership_mut(channel_id) {
                    member.last_viewed_at = member.last_viewed_at.max(at);
                }
            }
            Transition::MarkChannelRead { channel_id } => {
                let total = self
                    .channels
                    .get(&channel_id)
                    .map(|channel| channel.total_msg_count);
                if let Some(member) = self.current_membership_mut(channel_id) {
                    if let Some(total) = total {
                        member.msg_count = member.msg_count.max(total);
                    }
                    member.mention_count = 0;
                }
            }
            Transition::ConnectionReestablished { at } => {
                self.last_connect_at = Some(self.last_connect_at.map_or(at, |prev| prev.max(at)));
            }
        }
    }

    fn current_membership_mut(&mut self, channel_id: ChannelId) -> Option<&mut ChannelMembership> {
        let user_id = self.current_user_id.clone()?;
        Some(
            self.memberships
                .entry((user_id.clone(), channel_id.clone()))
                .or_insert_with(|| ChannelMembership::empty(channel_id, user_id)),
        )
    }

    fn advance_cursor(&mut self, channel_id: ChannelId, at: Timestamp) {
        let cursor = self.last_get_posts.entry(channel_id).or_insert(at);
        if at > *cursor {
            *cursor = at;
        }
    }

    fn merge_channel_posts(&mut self, channel_id: &ChannelId, page: &PostPage) {
        let order = self.posts_in_channel.entry(channel_id.clone()).or_default();
        let mut known: HashSet<PostId> = order.iter().cloned().collect();
        for (id, post) in &page.posts {
            self.posts.entry(id.clone()).or_insert_with(|| post.clone());
            if known.insert(id.clone()) {
                order.push(id.clone());
            }
        }

        let posts = &self.posts;
        order.sort_by(|a, b| {
            let a_at = posts.get(a).map(|post| post.create_at);
            let b_at = posts.get(b).map(|post| post.create_at);
            b_at.cmp(&a_at).then_with(|| a.cmp(b))
        });
    }
}

/// Immutable, versioned view of the store. Cloning is cheap.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot(Arc<StoreState>);

impl StateSnapshot {
    pub fn new(state: StoreState) -> Self {
        Self(Arc::new(state))
    }

    pub fn version(&self) -> u64 {
        self.0.version
    }

    pub fn current_user_id(&self) -> Option<&UserId> {
        self.0.current_user_id.as_ref()
    }

    pub fn current_team_id(&self) -> Option<&TeamId> {
        self.0.current_team_id.as_ref()
    }

    pub fn active_channel_id(&self) -> Option<&ChannelId> {
        self.0.active_channel_id.as_ref()
    }

    pub fn previous_channel_id(&self) -> Option<&ChannelId> {
        self.0.previous_channel_id.as_ref()
    }

    pub fn channel(&self, channel_id: &ChannelId) -> Option<&Channel> {
        self.0.channels.get(channel_id)
    }

    pub fn membership(&self, user_id: &UserId, channel_id: &ChannelId) -> Option<&ChannelMembership> {
        self.0
            .memberships
            .get(&(user_id.clone(), channel_id.clone()))
    }

    pub fn team_by_name(&self, name: &str) -> Option<&Team> {
        self.0.teams.values().find(|team| team.name == name)
    }

    pub fn team(&self, team_id: &TeamId) -> Option<&Team> {
        self.0.teams.get(team_id)
    }

    /// Channels of the current user with unseen messages or mentions, excluding the active one.
    pub fn unread_channel_ids(&self) -> Vec<ChannelId> {
        let Some(user_id) = self.current_user_id() else {
            return Vec::new();
        };
        let mut unread: Vec<ChannelId> = self
            .0
            .memberships
            .iter()
            .filter(|((member_user, _), _)| member_user == user_id)
            .filter_map(|((_, channel_id), member)| {
                let channel = self.channel(channel_id)?;
                let has_unread = channel.total_msg_count > member.msg_count || member.mention_count > 0;
                (has_unread && Some(channel_id) != self.active_channel_id()).then(|| channel_id.clone())
            })
            .collect();
        unread.sort();
        unread
    }

    /// Post ids of the channel, newest first.
    pub fn post_ids_in_channel(&self, channel_id: &ChannelId) -> &[PostId] {
        self.0
            .posts_in_channel
            .get(channel_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn post(&self, post_id: &PostId) -> Option<&Post> {
        self.0.posts.get(post_id)
    }

    pub fn post_count(&self) -> usize {
        self.0.posts.len()
    }

    /// Newest `create_at` over every locally cached post of the channel.
    pub fn latest_post_create_at(&self, channel_id: &ChannelId) -> Option<Timestamp> {
        self.post_ids_in_channel(channel_id)
            .iter()
            .filter_map(|id| self.post(id))
            .map(|post| post.create_at)
            .max()
    }

    pub fn oldest_post_id(&self, channel_id: &ChannelId) -> Option<&PostId> {
        self.post_ids_in_channel(channel_id).last()
    }

    pub fn sync_cursor(&self, channel_id: &ChannelId) -> Option<Timestamp> {
        self.0.last_get_posts.get(channel_id).copied()
    }

    pub fn connection_epoch(&self) -> Option<Timestamp> {
        self.0.last_connect_at
    }
}

/// Process-local store; batches are reduced into a copy-on-write state under a single write lock.
pub struct MemoryStateStore {
    state: RwLock<Arc<StoreState>>,
}

impl MemoryStateStore {
    pub fn new(state: StoreState) -> Self {
        Self {
            state: RwLock::new(Arc::new(state)),
        }
    }

    /// Snapshots still sharing the latest state. While non-zero, the next `apply` copies the
    /// whole state instead of reducing in place.
    pub fn outstanding_snapshots(&self) -> usize {
        Arc::strong_count(&*self.state.read()) - 1
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(StoreState::default())
    }
}

impl StateStore for MemoryStateStore {
    fn snapshot(&self) -> StateSnapshot {
        let state = self.state.read();
        StateSnapshot(Arc::clone(&*state))
    }

    fn apply(&self, batch: TransitionBatch) -> Result<u64> {
        let mut guard = self.state.write();
        if batch.is_empty() {
            return Ok(guard.version);
        }
        let state = Arc::make_mut(&mut *guard);
        let label = batch.label;
        let transitions = batch.len();
        for transition in batch.transitions {
            state.reduce(transition);
        }
        state.version += 1;
        debug!(?label, transitions, version = state.version, "store: batch applied");
        Ok(state.version)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
