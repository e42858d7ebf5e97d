//! Combat encounter engine
//!
//! Implements the tabletop encounter tracker:
//! - Dice rolling (e.g., "2d6+3", d20 with advantage)
//! - Participant snapshots from the roster or typed in ad hoc
//! - Initiative order and turn/round progression
//! - Clamped hit point, spell slot and class resource updates
//!
//! Everything here is synchronous and free of I/O; persistence lives in
//! [`crate::sync`].

pub mod dice;
mod entry;
mod resources;
mod roster;
mod state;

pub use dice::{roll, roll_d20, DiceRoll, Roll, RollMode, Roller, ScriptedRoller};
pub use entry::{ability_modifier, EntryKind, InitiativeEntry, InitiativeRoll};
pub use resources::{
    apply_hp_delta, apply_temp_hp_delta, CharacterClass, ClassResources, ResourceKind,
    ResourcePool, SpellSlots,
};
pub use roster::{
    build_custom, build_entry, build_from_roster, AbilityScores, CustomEntry, PlayerCharacter,
    Roster, RosterEntity, StatBlock,
};
pub use state::{CombatPhase, CombatSessionState, SessionPatch};
