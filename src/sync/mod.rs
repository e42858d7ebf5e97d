//! Combat session synchronization
//!
//! Mirrors a campaign's combat state to a shared store and pushes every
//! change back out to all watchers:
//! - `SessionStore`: point read, partial merge, delete, change feed
//! - `Synchronizer`: one campaign's view of a store, with failure reporting
//!
//! Conflict policy is last-write-wins. Concurrent edits from different
//! clients are not merged; whichever write reaches the store last is what
//! every client ends up with. Fine for a game master and a few players
//! acting seconds apart, not for high-frequency concurrent mutation.

mod http;
mod memory;
mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::combat::{CombatSessionState, SessionPatch};

pub use http::HttpSessionStore;
pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

/// Buffered changes per campaign before slow subscribers start skipping
pub const CHANGE_FEED_CAPACITY: usize = 64;

/// Synchronization errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("store replied {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid store url: {0}")]
    InvalidUrl(String),

    #[error("session store unavailable")]
    Unavailable,

    #[error("change feed closed")]
    FeedClosed,
}

/// A change to a campaign's session document, as pushed to watchers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionChange {
    /// The document now reads `state`
    Updated { state: CombatSessionState },
    /// The document was deleted
    Cleared,
}

impl SessionChange {
    pub fn into_state(self) -> Option<CombatSessionState> {
        match self {
            SessionChange::Updated { state } => Some(state),
            SessionChange::Cleared => None,
        }
    }
}

/// A document store keyed by campaign id
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current document, or `None` if no session exists
    async fn load(&self, campaign_id: &str) -> Result<Option<CombatSessionState>, SyncError>;

    /// Merge the present fields into the document, creating it if needed.
    /// Returns the merged document.
    async fn save(
        &self,
        campaign_id: &str,
        patch: &SessionPatch,
    ) -> Result<CombatSessionState, SyncError>;

    /// Delete the document
    async fn clear(&self, campaign_id: &str) -> Result<(), SyncError>;

    /// Receive every subsequent change, whichever client made it
    async fn subscribe(
        &self,
        campaign_id: &str,
    ) -> Result<broadcast::Receiver<SessionChange>, SyncError>;
}

/// Per-campaign fan-out of session changes
#[derive(Debug)]
pub struct ChangeHub {
    channels: Mutex<HashMap<String, broadcast::Sender<SessionChange>>>,
    capacity: usize,
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(CHANGE_FEED_CAPACITY)
    }
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Start receiving changes for a campaign
    pub fn subscribe(&self, campaign_id: &str) -> broadcast::Receiver<SessionChange> {
        let mut channels = self.channels.lock();
        channels
            .entry(campaign_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver a change to current subscribers, returning how many got it
    pub fn publish(&self, campaign_id: &str, change: SessionChange) -> usize {
        let mut channels = self.channels.lock();
        let Some(sender) = channels.get(campaign_id) else {
            return 0;
        };
        match sender.send(change) {
            Ok(receivers) => receivers,
            Err(_) => {
                // Last subscriber went away
                channels.remove(campaign_id);
                0
            }
        }
    }

    /// Drop a campaign's channel so every current receiver sees it closed
    pub fn close(&self, campaign_id: &str) -> bool {
        self.channels.lock().remove(campaign_id).is_some()
    }

    pub fn subscriber_count(&self, campaign_id: &str) -> usize {
        self.channels
            .lock()
            .get(campaign_id)
            .map_or(0, |sender| sender.receiver_count())
    }
}

/// A failed store operation, reported to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub campaign_id: String,
    pub operation: &'static str,
    pub message: String,
}

/// Handle for a registered change listener; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop receiving changes
    pub fn unsubscribe(self) {
        self.task.abort();
    }

    /// Whether the listener is still receiving
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One campaign's connection to a session store
pub struct Synchronizer {
    store: Arc<dyn SessionStore>,
    campaign_id: String,
    failures: broadcast::Sender<SyncFailure>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("campaign_id", &self.campaign_id)
            .finish()
    }
}

impl Synchronizer {
    pub fn new(store: Arc<dyn SessionStore>, campaign_id: impl Into<String>) -> Self {
        let (failures, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            store,
            campaign_id: campaign_id.into(),
            failures,
        }
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    /// Receive every failed load/save/clear/subscribe from now on
    pub fn failures(&self) -> broadcast::Receiver<SyncFailure> {
        self.failures.subscribe()
    }

    /// Fetch the persisted session, if any
    pub async fn load(&self) -> Result<Option<CombatSessionState>, SyncError> {
        let result = self.store.load(&self.campaign_id).await;
        self.report("load", result)
    }

    /// Merge fields into the persisted session. Failures are not retried.
    pub async fn save(&self, patch: &SessionPatch) -> Result<(), SyncError> {
        if patch.is_empty() {
            return Ok(());
        }
        let result = self.store.save(&self.campaign_id, patch).await.map(|_| ());
        self.report("save", result)
    }

    /// Delete the persisted session
    pub async fn clear(&self) -> Result<(), SyncError> {
        let result = self.store.clear(&self.campaign_id).await;
        self.report("clear", result)
    }

    /// Call `on_change` with every remote change (`None` when cleared)
    /// until the returned handle is dropped.
    ///
    /// If the store loses the feed, a `subscribe` failure is reported and
    /// the handle becomes inactive; subscribe again to resume.
    pub async fn subscribe<F>(&self, mut on_change: F) -> Result<Subscription, SyncError>
    where
        F: FnMut(Option<CombatSessionState>) + Send + 'static,
    {
        let result = self.store.subscribe(&self.campaign_id).await;
        let mut changes = self.report("subscribe", result)?;
        let campaign_id = self.campaign_id.clone();
        let failures = self.failures.clone();

        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => on_change(change.into_state()),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Each change carries the whole document; the next one is enough
                        debug!("Campaign {} feed skipped {} changes", campaign_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Change feed for campaign {} closed", campaign_id);
                        let _ = failures.send(SyncFailure {
                            campaign_id: campaign_id.clone(),
                            operation: "subscribe",
                            message: SyncError::FeedClosed.to_string(),
                        });
                        break;
                    }
                }
            }
        });

        Ok(Subscription { task })
    }

    fn report<T>(&self, operation: &'static str, result: Result<T, SyncError>) -> Result<T, SyncError> {
        if let Err(ref e) = result {
            warn!(
                "Session {} failed for campaign {}: {}",
                operation, self.campaign_id, e
            );
            let _ = self.failures.send(SyncFailure {
                campaign_id: self.campaign_id.clone(),
                operation,
                message: e.to_string(),
            });
        }
        result
    }
}
