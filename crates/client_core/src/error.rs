use shared::domain::ChannelId;
use thiserror::Error;

/// Terminal failures of a single selection attempt. No transition is emitted for any of them.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("team {} is not available locally", team_name.as_deref().unwrap_or("<none>"))]
    TeamNotFound { team_name: Option<String> },
    #[error("failed to look up channel {channel_name} in team {team_name}: {source}")]
    ChannelLookupFailed {
        team_name: String,
        channel_name: String,
        source: anyhow::Error,
    },
    #[error("channel {channel_id} is not reachable for the current user")]
    ChannelUnreachable { channel_id: ChannelId },
    #[error("fetched channel {channel_id} could not be stored: {source}")]
    ChannelNotStored {
        channel_id: ChannelId,
        source: anyhow::Error,
    },
}

/// A channel fetch that failed on every allowed attempt.
#[derive(Debug, Error)]
#[error("fetch for channel {channel_id} failed after {attempts} attempt(s): {cause}")]
pub struct FetchError {
    pub channel_id: ChannelId,
    pub attempts: usize,
    #[source]
    pub cause: anyhow::Error,
}
