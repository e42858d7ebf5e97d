//! Combat session service
//!
//! Owns one campaign's working copy of the combat state. Every operation
//! changes the working copy first, notifies local watchers, then saves only
//! the fields it touched. Remote changes overwrite the working copy
//! wholesale (last write wins).
//!
//! A failed save is returned to the caller and broadcast on
//! [`CombatSession::sync_failures`]; the local change stays applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::combat::{
    build_custom, build_from_roster, CombatSessionState, CustomEntry, EntryKind, InitiativeEntry,
    InitiativeRoll, PlayerCharacter, ResourceKind, Roller, Roster, SessionPatch,
};
use crate::sync::{SessionStore, Subscription, SyncError, SyncFailure, Synchronizer};

/// A campaign's combat encounter, mirrored to a session store
pub struct CombatSession {
    sync: Synchronizer,
    state: Arc<watch::Sender<CombatSessionState>>,
}

impl std::fmt::Debug for CombatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombatSession")
            .field("campaign_id", &self.sync.campaign_id())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl CombatSession {
    /// Load the campaign's persisted session, or start from defaults if
    /// there is none
    pub async fn open(
        store: Arc<dyn SessionStore>,
        campaign_id: impl Into<String>,
    ) -> Result<Self, SyncError> {
        let sync = Synchronizer::new(store, campaign_id);
        let initial = sync.load().await?.unwrap_or_default();
        debug!(
            "Opened combat session for campaign {} ({} entries)",
            sync.campaign_id(),
            initial.initiative_entries.len()
        );

        let (state, _) = watch::channel(initial);
        Ok(Self {
            sync,
            state: Arc::new(state),
        })
    }

    /// Start applying remote changes to the working copy.
    ///
    /// The persisted document is reloaded once the feed is live, so a write
    /// that landed between `open` and `attach` is not missed. Changes stop
    /// when the returned handle is dropped.
    pub async fn attach(&self) -> Result<Subscription, SyncError> {
        let state = Arc::clone(&self.state);
        let delivered = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&delivered);
        let subscription = self
            .sync
            .subscribe(move |remote| {
                counter.fetch_add(1, Ordering::SeqCst);
                replace_working_copy(&state, remote);
            })
            .await?;

        let seen = delivered.load(Ordering::SeqCst);
        let reloaded = self.sync.load().await?;
        // A change pushed while loading is at least as new as the reload
        if delivered.load(Ordering::SeqCst) == seen {
            replace_working_copy(&self.state, reloaded);
        }
        Ok(subscription)
    }

    pub fn campaign_id(&self) -> &str {
        self.sync.campaign_id()
    }

    /// Copy of the current working state
    pub fn snapshot(&self) -> CombatSessionState {
        self.state.borrow().clone()
    }

    /// Observe the working state; notified on every local or remote change
    pub fn watch(&self) -> watch::Receiver<CombatSessionState> {
        self.state.subscribe()
    }

    /// Failed loads, saves and clears from now on
    pub fn sync_failures(&self) -> broadcast::Receiver<SyncFailure> {
        self.sync.failures()
    }

    /// Snapshot a roster entity into the encounter.
    ///
    /// `None` if it is not in the roster or already participating.
    pub async fn add_from_roster(
        &self,
        roster: &Roster,
        kind: EntryKind,
        source_id: &str,
    ) -> Result<Option<InitiativeEntry>, SyncError> {
        let entry = build_from_roster(roster, kind, source_id);
        self.add(entry).await
    }

    /// Add an ad-hoc participant. `None` without a name or initiative.
    pub async fn add_custom(
        &self,
        custom: &CustomEntry,
    ) -> Result<Option<InitiativeEntry>, SyncError> {
        self.add(build_custom(custom)).await
    }

    async fn add(
        &self,
        entry: Option<InitiativeEntry>,
    ) -> Result<Option<InitiativeEntry>, SyncError> {
        let Some(entry) = entry else {
            return Ok(None);
        };
        let (added, patch) = self.mutate(|state| {
            if state.add_entry(entry.clone()) {
                (Some(entry), Some(SessionPatch::new().entries(state)))
            } else {
                (None, None)
            }
        });
        self.persist(patch).await?;
        Ok(added)
    }

    pub async fn remove_entry(&self, id: &str) -> Result<Option<InitiativeEntry>, SyncError> {
        let (removed, patch) = self.mutate(|state| match state.remove_entry(id) {
            Some(removed) => {
                let patch = SessionPatch::new()
                    .entries(state)
                    .rolls(state)
                    .current_turn(state.current_turn);
                (Some(removed), Some(patch))
            }
            None => (None, None),
        });
        self.persist(patch).await?;
        Ok(removed)
    }

    /// Roll a d20 for every participant
    pub async fn roll_initiative_for_all(&self) -> Result<Vec<InitiativeRoll>, SyncError> {
        let (rolls, patch) = self.mutate(|state| roll_all(state, &mut rand::rng()));
        self.persist(patch).await?;
        Ok(rolls)
    }

    pub async fn roll_initiative_for_all_with<R: Roller + ?Sized>(
        &self,
        roller: &mut R,
    ) -> Result<Vec<InitiativeRoll>, SyncError> {
        let (rolls, patch) = self.mutate(|state| roll_all(state, roller));
        self.persist(patch).await?;
        Ok(rolls)
    }

    /// Roll a d20 for one participant, e.g. a late joiner
    pub async fn roll_initiative_for_one(
        &self,
        id: &str,
    ) -> Result<Option<InitiativeRoll>, SyncError> {
        let (roll, patch) = self.mutate(|state| roll_one(state, id, &mut rand::rng()));
        self.persist(patch).await?;
        Ok(roll)
    }

    pub async fn roll_initiative_for_one_with<R: Roller + ?Sized>(
        &self,
        id: &str,
        roller: &mut R,
    ) -> Result<Option<InitiativeRoll>, SyncError> {
        let (roll, patch) = self.mutate(|state| roll_one(state, id, roller));
        self.persist(patch).await?;
        Ok(roll)
    }

    pub async fn set_initiative(&self, id: &str, initiative: i32) -> Result<bool, SyncError> {
        let (found, patch) = self.mutate(|state| {
            if state.set_initiative(id, initiative) {
                (true, Some(SessionPatch::new().entries(state)))
            } else {
                (false, None)
            }
        });
        self.persist(patch).await?;
        Ok(found)
    }

    /// Start the clock. `false` (and nothing saved) without participants.
    pub async fn start_combat(&self) -> Result<bool, SyncError> {
        let (started, patch) = self.mutate(|state| {
            if state.start_combat() {
                (true, Some(SessionPatch::new().clock(state)))
            } else {
                (false, None)
            }
        });
        self.persist(patch).await?;
        Ok(started)
    }

    pub async fn next_turn(&self) -> Result<bool, SyncError> {
        let (advanced, patch) = self.mutate(|state| {
            if state.next_turn() {
                (true, Some(SessionPatch::new().turn(state)))
            } else {
                (false, None)
            }
        });
        self.persist(patch).await?;
        Ok(advanced)
    }

    pub async fn pause_combat(&self) -> Result<(), SyncError> {
        let ((), patch) = self.mutate(|state| {
            state.pause_combat();
            ((), Some(SessionPatch::new().on_combat(false)))
        });
        self.persist(patch).await
    }

    pub async fn reset_combat(&self) -> Result<(), SyncError> {
        let ((), patch) = self.mutate(|state| {
            state.reset_combat();
            ((), Some(SessionPatch::new().clock(state)))
        });
        self.persist(patch).await
    }

    /// Return to Idle and delete the persisted session
    pub async fn clear_all(&self) -> Result<(), SyncError> {
        self.state.send_if_modified(|state| {
            let before = std::mem::take(state);
            before != *state
        });
        self.sync.clear().await
    }

    pub async fn update_hp(
        &self,
        id: &str,
        delta: i32,
    ) -> Result<Option<InitiativeEntry>, SyncError> {
        let (updated, patch) = self.mutate(|state| entries_changed(state, |s| s.update_hp(id, delta)));
        self.persist(patch).await?;
        Ok(updated)
    }

    pub async fn update_temp_hp(
        &self,
        id: &str,
        delta: i32,
    ) -> Result<Option<InitiativeEntry>, SyncError> {
        let (updated, patch) =
            self.mutate(|state| entries_changed(state, |s| s.update_temp_hp(id, delta)));
        self.persist(patch).await?;
        Ok(updated)
    }

    /// Set a participant's spell slot, toggling to 0 when `requested` is
    /// already the current value.
    ///
    /// Spell slots live on the roster character, not in the session, so the
    /// updated character is returned for the roster owner to write back.
    pub fn update_spell_slot(
        &self,
        roster: &Roster,
        entry_id: &str,
        level: u8,
        requested: i32,
    ) -> Option<PlayerCharacter> {
        self.source_character(roster, entry_id)
            .map(|character| character.with_spell_slot(level, requested))
    }

    /// Set a participant's class resource with the same toggle and clamp
    /// rules as spell slots
    pub fn update_class_resource(
        &self,
        roster: &Roster,
        entry_id: &str,
        kind: ResourceKind,
        requested: i32,
    ) -> Option<PlayerCharacter> {
        self.source_character(roster, entry_id)
            .map(|character| character.with_resource(kind, requested))
    }

    fn source_character<'r>(&self, roster: &'r Roster, entry_id: &str) -> Option<&'r PlayerCharacter> {
        let state = self.state.borrow();
        let entry = state.entry(entry_id)?;
        if entry.kind != EntryKind::PlayerCharacter {
            return None;
        }
        roster.character(entry.source_id.as_deref()?)
    }

    /// Apply `op` to the working copy, notifying watchers when it produced a
    /// patch
    fn mutate<T: Default>(
        &self,
        op: impl FnOnce(&mut CombatSessionState) -> (T, Option<SessionPatch>),
    ) -> (T, Option<SessionPatch>) {
        let mut outcome = (T::default(), None);
        self.state.send_if_modified(|state| {
            outcome = op(state);
            outcome.1.is_some()
        });
        outcome
    }

    async fn persist(&self, patch: Option<SessionPatch>) -> Result<(), SyncError> {
        match patch {
            Some(patch) => self.sync.save(&patch).await,
            None => Ok(()),
        }
    }
}

fn roll_all<R: Roller + ?Sized>(
    state: &mut CombatSessionState,
    roller: &mut R,
) -> (Vec<InitiativeRoll>, Option<SessionPatch>) {
    let rolls = state.roll_initiative_for_all(roller);
    if rolls.is_empty() {
        return (rolls, None);
    }
    (rolls, Some(SessionPatch::new().entries(state).rolls(state)))
}

fn roll_one<R: Roller + ?Sized>(
    state: &mut CombatSessionState,
    id: &str,
    roller: &mut R,
) -> (Option<InitiativeRoll>, Option<SessionPatch>) {
    match state.roll_initiative_for_one(id, roller) {
        Some(roll) => (Some(roll), Some(SessionPatch::new().entries(state).rolls(state))),
        None => (None, None),
    }
}

fn entries_changed(
    state: &mut CombatSessionState,
    op: impl FnOnce(&mut CombatSessionState) -> Option<InitiativeEntry>,
) -> (Option<InitiativeEntry>, Option<SessionPatch>) {
    match op(state) {
        Some(entry) => (Some(entry), Some(SessionPatch::new().entries(state))),
        None => (None, None),
    }
}

/// Overwrite the working copy with a store document, notifying watchers
/// only when it differs
fn replace_working_copy(
    state: &watch::Sender<CombatSessionState>,
    remote: Option<CombatSessionState>,
) {
    let next = remote.unwrap_or_default();
    state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
}
