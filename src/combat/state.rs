//! Combat session state and turn order
//!
//! Tracks the encounter as a whole:
//! - Participants and their initiative rolls
//! - Turn order (always derived by sorting, never stored)
//! - Turn and round progression
//! - Staged/active lifecycle
//!
//! Lifecycle: Idle (no entries) -> Staged (entries, not running) ->
//! Active (running) -> Staged (pause/reset) -> Idle (clear all).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::dice::Roller;
use super::entry::{InitiativeEntry, InitiativeRoll};
use super::resources::{apply_hp_delta, apply_temp_hp_delta};

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatPhase {
    /// No participants
    Idle,
    /// Participants present, clock stopped
    Staged,
    /// Clock running
    Active,
}

/// The shared, persisted state of one encounter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CombatSessionState {
    /// Starts at 1, increments when turn order wraps
    pub round: u32,
    pub on_combat: bool,
    /// Index into `sorted_order()`, not into `initiative_entries`
    pub current_turn: usize,
    /// Insertion order carries no meaning
    pub initiative_entries: Vec<InitiativeEntry>,
    pub initiative_rolls: BTreeMap<String, InitiativeRoll>,
}

impl Default for CombatSessionState {
    fn default() -> Self {
        Self {
            round: 1,
            on_combat: false,
            current_turn: 0,
            initiative_entries: Vec::new(),
            initiative_rolls: BTreeMap::new(),
        }
    }
}

impl CombatSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> CombatPhase {
        if self.on_combat {
            CombatPhase::Active
        } else if self.initiative_entries.is_empty() {
            CombatPhase::Idle
        } else {
            CombatPhase::Staged
        }
    }

    /// Entries by initiative, highest first. Ties keep insertion order.
    pub fn sorted_order(&self) -> Vec<&InitiativeEntry> {
        let mut sorted: Vec<&InitiativeEntry> = self.initiative_entries.iter().collect();
        sorted.sort_by(|a, b| b.initiative.cmp(&a.initiative));
        sorted
    }

    /// The entry whose turn it is
    pub fn current_entry(&self) -> Option<&InitiativeEntry> {
        self.sorted_order().get(self.current_turn).copied()
    }

    pub fn entry(&self, id: &str) -> Option<&InitiativeEntry> {
        self.initiative_entries.iter().find(|e| e.id == id)
    }

    /// Whether any initiative has been rolled this combat
    pub fn has_rolled(&self) -> bool {
        !self.initiative_rolls.is_empty()
    }

    /// Add an entry. Rejected if its id is already present.
    pub fn add_entry(&mut self, entry: InitiativeEntry) -> bool {
        if self.entry(&entry.id).is_some() {
            return false;
        }
        self.initiative_entries.push(entry);
        true
    }

    /// Roll a d20 for every entry and add it to its initiative
    pub fn roll_initiative_for_all<R: Roller + ?Sized>(&mut self, roller: &mut R) -> Vec<InitiativeRoll> {
        let ids: Vec<String> = self.initiative_entries.iter().map(|e| e.id.clone()).collect();
        ids.iter()
            .filter_map(|id| self.roll_initiative_for_one(id, &mut *roller))
            .collect()
    }

    /// Roll a d20 for one entry (late joiners)
    ///
    /// A repeat roll overwrites the previous roll but keeps the recorded
    /// dexterity modifier.
    pub fn roll_initiative_for_one<R: Roller + ?Sized>(
        &mut self,
        id: &str,
        roller: &mut R,
    ) -> Option<InitiativeRoll> {
        let entry = self.initiative_entries.iter_mut().find(|e| e.id == id)?;
        let roll = roller.roll_die(20);
        entry.initiative += roll as i32;

        let dex = self
            .initiative_rolls
            .get(id)
            .map_or(entry.dex_mod, |previous| previous.dex);
        let record = InitiativeRoll {
            id: id.to_string(),
            roll,
            dex,
        };
        self.initiative_rolls.insert(id.to_string(), record.clone());
        Some(record)
    }

    /// Overwrite an entry's initiative by hand
    pub fn set_initiative(&mut self, id: &str, initiative: i32) -> bool {
        match self.initiative_entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.initiative = initiative;
                true
            }
            None => false,
        }
    }

    /// Start the clock from the top of the order. No-op without entries.
    pub fn start_combat(&mut self) -> bool {
        if self.initiative_entries.is_empty() {
            return false;
        }
        self.on_combat = true;
        self.current_turn = 0;
        self.round = 1;
        true
    }

    /// Advance to the next entry, wrapping into a new round after the last
    pub fn next_turn(&mut self) -> bool {
        let count = self.sorted_order().len();
        if count == 0 {
            return false;
        }
        if self.current_turn + 1 >= count {
            self.current_turn = 0;
            self.round += 1;
        } else {
            self.current_turn += 1;
        }
        true
    }

    /// Stop the clock, keeping turn and round
    pub fn pause_combat(&mut self) {
        self.on_combat = false;
    }

    /// Stop the clock and rewind to round 1, keeping participants
    pub fn reset_combat(&mut self) {
        self.on_combat = false;
        self.current_turn = 0;
        self.round = 1;
    }

    /// Remove an entry and its roll record
    ///
    /// When the removed entry sat at or before the current turn, the turn
    /// index becomes `max(0, remaining - 2)`. This approximates "keep the
    /// same actor" and can land on a different participant than expected.
    pub fn remove_entry(&mut self, id: &str) -> Option<InitiativeEntry> {
        let sorted_pos = self.sorted_order().iter().position(|e| e.id == id)?;
        let index = self.initiative_entries.iter().position(|e| e.id == id)?;

        let removed = self.initiative_entries.remove(index);
        self.initiative_rolls.remove(id);

        if sorted_pos <= self.current_turn {
            self.current_turn = self.initiative_entries.len().saturating_sub(2);
        }
        Some(removed)
    }

    /// Drop everything and return to Idle
    pub fn clear_all(&mut self) {
        *self = Self::default();
    }

    /// Apply a hit point delta to an entry, returning the updated entry
    pub fn update_hp(&mut self, id: &str, delta: i32) -> Option<InitiativeEntry> {
        self.replace_entry(id, |entry| apply_hp_delta(entry, delta))
    }

    /// Apply a temporary hit point delta to an entry, returning the updated entry
    pub fn update_temp_hp(&mut self, id: &str, delta: i32) -> Option<InitiativeEntry> {
        self.replace_entry(id, |entry| apply_temp_hp_delta(entry, delta))
    }

    fn replace_entry(
        &mut self,
        id: &str,
        update: impl FnOnce(&InitiativeEntry) -> InitiativeEntry,
    ) -> Option<InitiativeEntry> {
        let slot = self.initiative_entries.iter_mut().find(|e| e.id == id)?;
        *slot = update(slot);
        Some(slot.clone())
    }

    /// Merge a partial update into this state
    pub fn merge(&mut self, patch: &SessionPatch) {
        if let Some(round) = patch.round {
            // Rounds count from 1
            self.round = round.max(1);
        }
        if let Some(on_combat) = patch.on_combat {
            self.on_combat = on_combat;
        }
        if let Some(current_turn) = patch.current_turn {
            self.current_turn = current_turn;
        }
        if let Some(ref entries) = patch.initiative_entries {
            self.initiative_entries = entries.clone();
        }
        if let Some(ref rolls) = patch.initiative_rolls {
            self.initiative_rolls = rolls.clone();
        }
    }
}

/// A partial session document: absent fields are left untouched on merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_combat: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_turn: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiative_entries: Option<Vec<InitiativeEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiative_rolls: Option<BTreeMap<String, InitiativeRoll>>,
}

impl SessionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every field of `state`
    pub fn full(state: &CombatSessionState) -> Self {
        Self::new()
            .clock(state)
            .entries(state)
            .rolls(state)
    }

    /// Round, turn and running flag of `state`
    pub fn clock(mut self, state: &CombatSessionState) -> Self {
        self.round = Some(state.round);
        self.on_combat = Some(state.on_combat);
        self.current_turn = Some(state.current_turn);
        self
    }

    /// Round and turn of `state`
    pub fn turn(mut self, state: &CombatSessionState) -> Self {
        self.round = Some(state.round);
        self.current_turn = Some(state.current_turn);
        self
    }

    pub fn on_combat(mut self, on_combat: bool) -> Self {
        self.on_combat = Some(on_combat);
        self
    }

    pub fn current_turn(mut self, current_turn: usize) -> Self {
        self.current_turn = Some(current_turn);
        self
    }

    pub fn entries(mut self, state: &CombatSessionState) -> Self {
        self.initiative_entries = Some(state.initiative_entries.clone());
        self
    }

    pub fn rolls(mut self, state: &CombatSessionState) -> Self {
        self.initiative_rolls = Some(state.initiative_rolls.clone());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
