use std::{collections::HashSet, sync::Arc};

use anyhow::Result;
use parking_lot::Mutex;
use shared::{
    domain::{ChannelId, Timestamp},
    protocol::{BatchLabel, Transition, TransitionBatch},
};
use storage::StateStore;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

pub mod collaborators;
pub mod config;
pub mod error;
pub mod http_source;
pub mod post_sync;
pub mod retry;
pub mod selection;
pub mod unread_sweep;

pub use collaborators::{ChannelReachability, RemotePostSource, TeamMembershipReachability};
pub use config::{load_settings, SyncSettings};
pub use error::{FetchError, SelectionError};
pub use http_source::HttpPostSource;
pub use post_sync::{ChannelFetch, FetchPlan, PostSyncEngine, SinceBasis};
pub use retry::RetryPolicy;
pub use selection::{ActivationKind, ActivationOutcome, ChannelSelectionController, ReadStateMarks};
pub use unread_sweep::UnreadSweepCoordinator;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    BatchApplied {
        label: BatchLabel,
        version: u64,
        transitions: usize,
    },
    ChannelSwitched {
        channel_id: ChannelId,
        previous_channel_id: Option<ChannelId>,
    },
    PostSyncFailed {
        channel_id: ChannelId,
        attempts: usize,
        message: String,
    },
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostSyncStatus {
    Applied { version: u64 },
    /// Another sync of the same channel is still running.
    AlreadyInFlight,
    /// Nothing to page back from yet.
    NothingToLoad,
    Failed,
}

#[derive(Debug)]
pub struct OpenedChannel {
    pub activation: ActivationOutcome,
    /// `None` when the activation did not land on a stored channel, so there is nothing to sync.
    pub post_sync: Option<JoinHandle<PostSyncStatus>>,
}

/// Holds a channel's slot in the in-flight set; the slot is released on drop, including when the
/// owning future is cancelled mid-sync.
struct InflightPostSync<'a> {
    inflight: &'a Mutex<HashSet<ChannelId>>,
    channel_id: ChannelId,
}

impl<'a> InflightPostSync<'a> {
    fn acquire(inflight: &'a Mutex<HashSet<ChannelId>>, channel_id: &ChannelId) -> Option<Self> {
        if !inflight.lock().insert(channel_id.clone()) {
            return None;
        }
        Some(Self {
            inflight,
            channel_id: channel_id.clone(),
        })
    }
}

impl Drop for InflightPostSync<'_> {
    fn drop(&mut self) {
        self.inflight.lock().remove(&self.channel_id);
    }
}

/// Application-facing entry point: wires the selection controller, the post sync engine and the
/// unread sweep to one state store, and applies every batch they produce.
pub struct ChannelSyncClient {
    store: Arc<dyn StateStore>,
    engine: Arc<PostSyncEngine>,
    selection: ChannelSelectionController,
    sweep: UnreadSweepCoordinator,
    inflight_post_syncs: Mutex<HashSet<ChannelId>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChannelSyncClient {
    pub fn new(
        store: Arc<dyn StateStore>,
        source: Arc<dyn RemotePostSource>,
        reachability: Arc<dyn ChannelReachability>,
        retry: RetryPolicy,
    ) -> Arc<Self> {
        let engine = Arc::new(PostSyncEngine::new(Arc::clone(&source), retry));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            selection: ChannelSelectionController::new(Arc::clone(&store), source, reachability),
            sweep: UnreadSweepCoordinator::new(Arc::clone(&engine)),
            store,
            engine,
            inflight_post_syncs: Mutex::new(HashSet::new()),
            events,
        })
    }

    pub fn from_settings(settings: &SyncSettings, store: Arc<dyn StateStore>) -> Result<Arc<Self>> {
        let source = HttpPostSource::from_settings(settings)?;
        Ok(Self::new(
            store,
            Arc::new(source),
            Arc::new(TeamMembershipReachability),
            settings.retry_policy(),
        ))
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn handle_select_channel_by_name(
        self: &Arc<Self>,
        channel_name: &str,
        team_name: Option<&str>,
    ) -> Result<OpenedChannel, SelectionError> {
        let activation = self
            .selection
            .select_by_name(channel_name, team_name)
            .await
            .inspect_err(|err| {
                let _ = self.events.send(ClientEvent::Error(err.to_string()));
            })?;
        Ok(self.after_activation(activation))
    }

    /// Activates the channel and starts loading its posts in the background.
    pub fn handle_select_channel(self: &Arc<Self>, channel_id: &ChannelId) -> OpenedChannel {
        let activation = self.selection.select_by_id(channel_id);
        self.after_activation(activation)
    }

    fn after_activation(self: &Arc<Self>, activation: ActivationOutcome) -> OpenedChannel {
        if let ActivationKind::Switched { version } = activation.kind {
            let _ = self.events.send(ClientEvent::BatchApplied {
                label: BatchLabel::SwitchChannel,
                version,
                transitions: 1,
            });
            let _ = self.events.send(ClientEvent::ChannelSwitched {
                channel_id: activation.channel_id.clone(),
                previous_channel_id: activation.previous_channel_id.clone(),
            });
        }

        let post_sync = match activation.kind {
            ActivationKind::ChannelNotLoaded | ActivationKind::SwitchRejected => {
                debug!(
                    channel_id = %activation.channel_id,
                    kind = ?activation.kind,
                    "sync: channel not active in store; skipping post sync"
                );
                None
            }
            ActivationKind::Switched { .. } | ActivationKind::AlreadyActive => {
                let client = Arc::clone(self);
                let channel_id = activation.channel_id.clone();
                Some(tokio::spawn(async move {
                    client.load_posts_if_necessary_with_retry(&channel_id).await
                }))
            }
        };
        OpenedChannel {
            activation,
            post_sync,
        }
    }

    /// Brings one channel's posts up to date and applies the result as a single batch.
    pub async fn load_posts_if_necessary_with_retry(&self, channel_id: &ChannelId) -> PostSyncStatus {
        let Some(_inflight) = InflightPostSync::acquire(&self.inflight_post_syncs, channel_id) else {
            info!(
                channel_id = %channel_id,
                "sync: post sync already in progress; skipping duplicate trigger"
            );
            return PostSyncStatus::AlreadyInFlight;
        };

        let snapshot = self.store.snapshot();
        let fetched = self.engine.sync_channel(&snapshot, channel_id).await;
        // Released before applying so the store reduces in place instead of copying.
        drop(snapshot);
        match fetched {
            Ok(batch) => self.apply(batch),
            Err(err) => {
                self.report_fetch_failure(&err);
                PostSyncStatus::Failed
            }
        }
    }

    /// Syncs every unread channel and applies everything as one batch. Returns `None` when there
    /// was nothing to apply.
    pub async fn load_unread_channel_posts(&self) -> Option<u64> {
        let snapshot = self.store.snapshot();
        let batch = self.sweep.sync_all_unread(&snapshot).await;
        drop(snapshot);
        if batch.is_empty() {
            return None;
        }
        match self.apply(batch) {
            PostSyncStatus::Applied { version } => Some(version),
            _ => None,
        }
    }

    pub async fn load_older_posts(&self, channel_id: &ChannelId) -> PostSyncStatus {
        let snapshot = self.store.snapshot();
        let fetched = self.engine.load_older_posts(&snapshot, channel_id).await;
        drop(snapshot);
        match fetched {
            Ok(Some(batch)) => self.apply(batch),
            Ok(None) => PostSyncStatus::NothingToLoad,
            Err(err) => {
                self.report_fetch_failure(&err);
                PostSyncStatus::Failed
            }
        }
    }

    /// Called by the websocket layer after every reconnect.
    pub fn record_reconnect(&self, at: Timestamp) -> PostSyncStatus {
        self.apply(TransitionBatch::single(
            BatchLabel::Reconnect,
            Transition::ConnectionReestablished { at },
        ))
    }

    fn apply(&self, batch: TransitionBatch) -> PostSyncStatus {
        let label = batch.label;
        let transitions = batch.len();
        match self.store.apply(batch) {
            Ok(version) => {
                let _ = self.events.send(ClientEvent::BatchApplied {
                    label,
                    version,
                    transitions,
                });
                PostSyncStatus::Applied { version }
            }
            Err(err) => {
                error!(?label, error = %err, "sync: store rejected batch");
                let _ = self.events.send(ClientEvent::Error(format!(
                    "failed to apply {label:?} batch: {err}"
                )));
                PostSyncStatus::Failed
            }
        }
    }

    fn report_fetch_failure(&self, err: &FetchError) {
        warn!(
            channel_id = %err.channel_id,
            attempts = err.attempts,
            error = %err.cause,
            "sync: channel posts unavailable after retries"
        );
        let _ = self.events.send(ClientEvent::PostSyncFailed {
            channel_id: err.channel_id.clone(),
            attempts: err.attempts,
            message: err.cause.to_string(),
        });
    }
}

#[cfg(test)]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
