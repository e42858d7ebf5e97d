//! Initiative entries and roll records
//!
//! An entry is the combat-facing snapshot of one participant. It is copied
//! from the roster at add time and never live-linked back to it.

use serde::{Deserialize, Serialize};

/// Where an entry came from; fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    Monster,
    PlayerCharacter,
    Npc,
    Custom,
}

/// One combatant's transient combat state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiativeEntry {
    /// Unique within the session; the roster id for roster-derived entries
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Weak back-reference to the roster entity, absent for custom entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Turn-order score, higher acts first
    pub initiative: i32,
    /// Dexterity modifier captured when the entry was added
    #[serde(default)]
    pub dex_mod: i32,
    pub hp: i32,
    pub max_hp: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_hp: Option<i32>,
    /// Armor class, display only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ac: Option<i32>,
}

impl InitiativeEntry {
    /// Temporary hit points, zero when unset
    pub fn temp_hp(&self) -> i32 {
        self.temp_hp.unwrap_or(0)
    }
}

/// The d20 result for an entry plus the modifier in effect when rolled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeRoll {
    pub id: String,
    pub roll: u32,
    pub dex: i32,
}

impl InitiativeRoll {
    /// Roll plus modifier
    pub fn total(&self) -> i32 {
        self.roll as i32 + self.dex
    }
}

/// Ability modifier for a score: `floor((score - 10) / 2)`
pub fn ability_modifier(score: i32) -> i32 {
    (score - 10).div_euclid(2)
}
