use anyhow::Result;
use async_trait::async_trait;
use shared::domain::{Channel, ChannelId, PostId, PostPage, Timestamp};
use storage::StateSnapshot;

/// Remote message store primitives the engine fetches through.
#[async_trait]
pub trait RemotePostSource: Send + Sync {
    /// Newest page of posts for the channel.
    async fn fetch_recent(&self, channel_id: &ChannelId) -> Result<PostPage>;
    /// Posts created or changed after `since`.
    async fn fetch_since(&self, channel_id: &ChannelId, since: Timestamp) -> Result<PostPage>;
    /// The page immediately older than `before`.
    async fn fetch_before(&self, channel_id: &ChannelId, before: &PostId) -> Result<PostPage>;
    async fn fetch_channel_by_team_and_name(
        &self,
        team_name: &str,
        channel_name: &str,
    ) -> Result<Channel>;
}

/// Permission/capability check consulted before a by-name selection activates a channel.
pub trait ChannelReachability: Send + Sync {
    fn is_channel_reachable(&self, snapshot: &StateSnapshot, channel: &Channel) -> bool;
}

/// Reachable when the channel is not archived and belongs to a team known locally.
pub struct TeamMembershipReachability;

impl ChannelReachability for TeamMembershipReachability {
    fn is_channel_reachable(&self, snapshot: &StateSnapshot, channel: &Channel) -> bool {
        !channel.is_archived() && snapshot.team(&channel.team_id).is_some()
    }
}
