//! SQLite-backed session store
//!
//! One row per campaign in `combat_sessions`. Entries and rolls are stored
//! as JSON text.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::debug;

use super::{ChangeHub, SessionChange, SessionStore, SyncError};
use crate::combat::{CombatSessionState, SessionPatch};

/// Durable session store with an in-process change feed
#[derive(Debug)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
    hub: ChangeHub,
}

impl SqliteSessionStore {
    /// Create a store on a pool whose schema is already migrated
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            hub: ChangeHub::default(),
        }
    }

    /// Number of live change subscribers for a campaign
    pub fn subscriber_count(&self, campaign_id: &str) -> usize {
        self.hub.subscriber_count(campaign_id)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self, campaign_id: &str) -> Result<Option<CombatSessionState>, SyncError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT round, on_combat, current_turn, initiative_entries, initiative_rolls
            FROM combat_sessions WHERE campaign_id = ?
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_state).transpose()
    }

    async fn save(
        &self,
        campaign_id: &str,
        patch: &SessionPatch,
    ) -> Result<CombatSessionState, SyncError> {
        let round = patch.round.map(|round| i64::from(round.max(1)));
        let current_turn = patch.current_turn.map(|t| t as i64);
        let entries = patch
            .initiative_entries
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let rolls = patch
            .initiative_rolls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let updated_at = chrono::Utc::now().to_rfc3339();

        // Absent fields fall back to defaults on insert, to the stored value on update
        sqlx::query(
            r#"
            INSERT INTO combat_sessions
                (campaign_id, round, on_combat, current_turn, initiative_entries, initiative_rolls, updated_at)
            VALUES (?, COALESCE(?, 1), COALESCE(?, 0), COALESCE(?, 0), COALESCE(?, '[]'), COALESCE(?, '{}'), ?)
            ON CONFLICT(campaign_id) DO UPDATE SET
                round = COALESCE(?, round),
                on_combat = COALESCE(?, on_combat),
                current_turn = COALESCE(?, current_turn),
                initiative_entries = COALESCE(?, initiative_entries),
                initiative_rolls = COALESCE(?, initiative_rolls),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(campaign_id)
        .bind(round)
        .bind(patch.on_combat)
        .bind(current_turn)
        .bind(&entries)
        .bind(&rolls)
        .bind(&updated_at)
        .bind(round)
        .bind(patch.on_combat)
        .bind(current_turn)
        .bind(&entries)
        .bind(&rolls)
        .execute(&self.pool)
        .await?;

        let merged = self.load(campaign_id).await?.unwrap_or_default();
        let delivered = self.hub.publish(
            campaign_id,
            SessionChange::Updated {
                state: merged.clone(),
            },
        );
        debug!("Saved campaign {} ({} watchers)", campaign_id, delivered);

        Ok(merged)
    }

    async fn clear(&self, campaign_id: &str) -> Result<(), SyncError> {
        let result = sqlx::query("DELETE FROM combat_sessions WHERE campaign_id = ?")
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;

        debug!(
            "Cleared campaign {} ({} rows)",
            campaign_id,
            result.rows_affected()
        );
        self.hub.publish(campaign_id, SessionChange::Cleared);
        Ok(())
    }

    async fn subscribe(
        &self,
        campaign_id: &str,
    ) -> Result<broadcast::Receiver<SessionChange>, SyncError> {
        Ok(self.hub.subscribe(campaign_id))
    }
}

/// Row type for SQLite queries
#[derive(sqlx::FromRow)]
struct SessionRow {
    round: i64,
    on_combat: bool,
    current_turn: i64,
    initiative_entries: String,
    initiative_rolls: String,
}

impl SessionRow {
    fn into_state(self) -> Result<CombatSessionState, SyncError> {
        Ok(CombatSessionState {
            round: u32::try_from(self.round).unwrap_or(1).max(1),
            on_combat: self.on_combat,
            current_turn: usize::try_from(self.current_turn).unwrap_or(0),
            initiative_entries: serde_json::from_str(&self.initiative_entries)?,
            initiative_rolls: serde_json::from_str(&self.initiative_rolls)?,
        })
    }
}
