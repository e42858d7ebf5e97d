//! In-memory session store
//!
//! Process-local stand-in for the shared store. Can be switched offline to
//! exercise failure handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use super::{ChangeHub, SessionChange, SessionStore, SyncError};
use crate::combat::{CombatSessionState, SessionPatch};

/// Session documents held in memory
#[derive(Debug)]
pub struct MemorySessionStore {
    documents: RwLock<HashMap<String, CombatSessionState>>,
    hub: ChangeHub,
    available: AtomicBool,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            hub: ChangeHub::default(),
            available: AtomicBool::new(true),
        }
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`SyncError::Unavailable`] while `false`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), SyncError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::Unavailable)
        }
    }

    /// Cut every change feed of a campaign, as a dropped connection would
    pub fn close_feeds(&self, campaign_id: &str) {
        self.hub.close(campaign_id);
    }

    /// Number of stored documents
    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, campaign_id: &str) -> Result<Option<CombatSessionState>, SyncError> {
        self.check_available()?;
        Ok(self.documents.read().await.get(campaign_id).cloned())
    }

    async fn save(
        &self,
        campaign_id: &str,
        patch: &SessionPatch,
    ) -> Result<CombatSessionState, SyncError> {
        self.check_available()?;
        let merged = {
            let mut documents = self.documents.write().await;
            let document = documents.entry(campaign_id.to_string()).or_default();
            document.merge(patch);
            document.clone()
        };

        self.hub.publish(
            campaign_id,
            SessionChange::Updated {
                state: merged.clone(),
            },
        );
        Ok(merged)
    }

    async fn clear(&self, campaign_id: &str) -> Result<(), SyncError> {
        self.check_available()?;
        self.documents.write().await.remove(campaign_id);
        self.hub.publish(campaign_id, SessionChange::Cleared);
        Ok(())
    }

    async fn subscribe(
        &self,
        campaign_id: &str,
    ) -> Result<broadcast::Receiver<SessionChange>, SyncError> {
        self.check_available()?;
        Ok(self.hub.subscribe(campaign_id))
    }
}
