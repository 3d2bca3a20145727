use std::sync::Arc;

use shared::{
    domain::{ChannelId, ChannelMembership, Timestamp, UserId},
    protocol::{BatchLabel, Transition, TransitionBatch},
};
use storage::{StateSnapshot, StateStore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    collaborators::{ChannelReachability, RemotePostSource},
    error::SelectionError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    /// A switch batch was applied; `version` is the store version it produced.
    Switched { version: u64 },
    AlreadyActive,
    /// The channel entity is not in the local store, so there is nothing to switch to.
    ChannelNotLoaded,
    /// The store refused the switch batch.
    SwitchRejected,
}

/// Handles of the two fire-and-forget read-state tasks. Viewed is always submitted before read;
/// their completion order is unspecified.
#[derive(Debug)]
pub struct ReadStateMarks {
    pub viewed: JoinHandle<()>,
    pub read: JoinHandle<()>,
}

impl ReadStateMarks {
    pub async fn settled(self) {
        let _ = self.viewed.await;
        let _ = self.read.await;
    }
}

#[derive(Debug)]
pub struct ActivationOutcome {
    pub channel_id: ChannelId,
    pub previous_channel_id: Option<ChannelId>,
    pub kind: ActivationKind,
    pub marks: ReadStateMarks,
}

impl ActivationOutcome {
    pub fn switched(&self) -> bool {
        matches!(self.kind, ActivationKind::Switched { .. })
    }
}

pub struct ChannelSelectionController {
    store: Arc<dyn StateStore>,
    source: Arc<dyn RemotePostSource>,
    reachability: Arc<dyn ChannelReachability>,
}

impl ChannelSelectionController {
    pub fn new(
        store: Arc<dyn StateStore>,
        source: Arc<dyn RemotePostSource>,
        reachability: Arc<dyn ChannelReachability>,
    ) -> Self {
        Self {
            store,
            source,
            reachability,
        }
    }

    /// Resolves `channel_name` inside `team_name` and activates it. There is no fallback to the
    /// current team: an absent team name is always `TeamNotFound`.
    pub async fn select_by_name(
        &self,
        channel_name: &str,
        team_name: Option<&str>,
    ) -> Result<ActivationOutcome, SelectionError> {
        let Some(team_name) = team_name else {
            warn!(channel_name, "select: no team name given");
            return Err(SelectionError::TeamNotFound { team_name: None });
        };

        let snapshot = self.store.snapshot();
        if snapshot.team_by_name(team_name).is_none() {
            warn!(channel_name, team_name, "select: team not loaded locally");
            return Err(SelectionError::TeamNotFound {
                team_name: Some(team_name.to_string()),
            });
        }

        let channel = self
            .source
            .fetch_channel_by_team_and_name(team_name, channel_name)
            .await
            .map_err(|source| {
                warn!(channel_name, team_name, error = %source, "select: channel lookup failed");
                SelectionError::ChannelLookupFailed {
                    team_name: team_name.to_string(),
                    channel_name: channel_name.to_string(),
                    source,
                }
            })?;

        let reachable = self.reachability.is_channel_reachable(&snapshot, &channel);
        drop(snapshot);
        if !reachable {
            warn!(channel_id = %channel.id, team_name, "select: channel unreachable");
            return Err(SelectionError::ChannelUnreachable {
                channel_id: channel.id,
            });
        }

        let channel_id = channel.id.clone();
        self.store
            .apply(TransitionBatch::single(
                BatchLabel::ReceiveChannel,
                Transition::ReceivedChannel { channel },
            ))
            .map_err(|source| {
                error!(
                    channel_id = %channel_id,
                    error = %source,
                    "select: store rejected fetched channel"
                );
                SelectionError::ChannelNotStored {
                    channel_id: channel_id.clone(),
                    source,
                }
            })?;

        Ok(self.select_by_id(&channel_id))
    }

    /// Activates `channel_id`. Must be called from within a tokio runtime: the read-state marks
    /// are spawned as tasks.
    pub fn select_by_id(&self, channel_id: &ChannelId) -> ActivationOutcome {
        let snapshot = self.store.snapshot();
        let previous_channel_id = snapshot.active_channel_id().cloned();

        let kind = if previous_channel_id.as_ref() == Some(channel_id) {
            debug!(channel_id = %channel_id, "select: channel already active");
            drop(snapshot);
            ActivationKind::AlreadyActive
        } else {
            self.switch(snapshot, channel_id)
        };

        ActivationOutcome {
            channel_id: channel_id.clone(),
            previous_channel_id,
            kind,
            marks: self.mark_viewed_and_read(channel_id),
        }
    }

    fn switch(&self, snapshot: StateSnapshot, channel_id: &ChannelId) -> ActivationKind {
        let Some(channel) = snapshot.channel(channel_id).cloned() else {
            warn!(channel_id = %channel_id, "select: channel not loaded; skipping switch");
            return ActivationKind::ChannelNotLoaded;
        };

        let user_id = match snapshot.current_user_id() {
            Some(user_id) => user_id.clone(),
            None => {
                warn!(
                    channel_id = %channel_id,
                    "select: no current user; switching with an anonymous membership"
                );
                UserId::default()
            }
        };
        let member = snapshot
            .membership(&user_id, channel_id)
            .cloned()
            .unwrap_or_else(|| ChannelMembership::empty(channel_id.clone(), user_id.clone()));
        // Direct and group channels carry no team; they belong to whichever team is open.
        let team_id = if channel.team_id.as_str().is_empty() {
            snapshot.current_team_id().cloned().unwrap_or_default()
        } else {
            channel.team_id.clone()
        };

        let batch = TransitionBatch::single(
            BatchLabel::SwitchChannel,
            Transition::SelectChannel {
                channel_id: channel_id.clone(),
                channel,
                member,
                team_id,
            },
        );
        drop(snapshot);
        match self.store.apply(batch) {
            Ok(version) => {
                info!(channel_id = %channel_id, version, "select: switched channel");
                ActivationKind::Switched { version }
            }
            Err(err) => {
                error!(channel_id = %channel_id, error = %err, "select: switch batch rejected");
                ActivationKind::SwitchRejected
            }
        }
    }

    fn mark_viewed_and_read(&self, channel_id: &ChannelId) -> ReadStateMarks {
        let viewed = spawn_mark(
            Arc::clone(&self.store),
            TransitionBatch::single(
                BatchLabel::MarkViewed,
                Transition::MarkChannelViewed {
                    channel_id: channel_id.clone(),
                    at: Timestamp::now(),
                },
            ),
        );
        let read = spawn_mark(
            Arc::clone(&self.store),
            TransitionBatch::single(
                BatchLabel::MarkRead,
                Transition::MarkChannelRead {
                    channel_id: channel_id.clone(),
                },
            ),
        );
        ReadStateMarks { viewed, read }
    }
}

fn spawn_mark(store: Arc<dyn StateStore>, batch: TransitionBatch) -> JoinHandle<()> {
    tokio::spawn(async move {
        let label = batch.label;
        if let Err(err) = store.apply(batch) {
            warn!(?label, error = %err, "select: read-state mark failed");
        }
    })
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
