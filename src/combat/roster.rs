//! Roster snapshots and participant entry building
//!
//! The roster (monsters, NPCs, player characters) is owned elsewhere; the
//! combat engine only reads a loaded snapshot of it. Monsters and NPCs carry
//! their dexterity as `dexterity`, player characters under `abilities.dex`;
//! both normalize to the same modifier here.

use serde::{Deserialize, Serialize};

use super::entry::{ability_modifier, EntryKind, InitiativeEntry};
use super::resources::{CharacterClass, ClassResources, ResourceKind, SpellSlots};

/// Read-only view of a roster entity as the combat engine needs it
pub trait RosterEntity {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    /// The dexterity score (not modifier)
    fn dexterity_score(&self) -> i32;
    fn hp(&self) -> i32;
    fn max_hp(&self) -> i32;
    fn armor_class(&self) -> Option<i32> {
        None
    }
}

/// Stat block shared by monsters and NPCs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatBlock {
    pub id: String,
    pub name: String,
    pub dexterity: i32,
    pub hp: i32,
    pub max_hp: i32,
    #[serde(default)]
    pub armor_class: Option<i32>,
}

impl RosterEntity for StatBlock {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dexterity_score(&self) -> i32 {
        self.dexterity
    }

    fn hp(&self) -> i32 {
        self.hp
    }

    fn max_hp(&self) -> i32 {
        self.max_hp
    }

    fn armor_class(&self) -> Option<i32> {
        self.armor_class
    }
}

/// The six ability scores of a player character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    pub str: i32,
    pub dex: i32,
    pub con: i32,
    pub int: i32,
    pub wis: i32,
    pub cha: i32,
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self {
            str: 10,
            dex: 10,
            con: 10,
            int: 10,
            wis: 10,
            cha: 10,
        }
    }
}

/// A player character as loaded from the roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerCharacter {
    pub id: String,
    pub name: String,
    pub class: CharacterClass,
    #[serde(default)]
    pub abilities: AbilityScores,
    pub hp: i32,
    pub max_hp: i32,
    #[serde(default)]
    pub armor_class: Option<i32>,
    #[serde(default)]
    pub spell_slots: SpellSlots,
    #[serde(default)]
    pub resources: ClassResources,
}

impl PlayerCharacter {
    /// Copy of this character with one spell slot level updated
    pub fn with_spell_slot(&self, level: u8, requested: i32) -> PlayerCharacter {
        PlayerCharacter {
            spell_slots: self.spell_slots.update(level, requested),
            ..self.clone()
        }
    }

    /// Copy of this character with one class resource updated
    pub fn with_resource(&self, kind: ResourceKind, requested: i32) -> PlayerCharacter {
        PlayerCharacter {
            resources: self.resources.update(kind, requested),
            ..self.clone()
        }
    }
}

impl RosterEntity for PlayerCharacter {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dexterity_score(&self) -> i32 {
        self.abilities.dex
    }

    fn hp(&self) -> i32 {
        self.hp
    }

    fn max_hp(&self) -> i32 {
        self.max_hp
    }

    fn armor_class(&self) -> Option<i32> {
        self.armor_class
    }
}

/// The currently loaded roster for a campaign
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    #[serde(default)]
    pub monsters: Vec<StatBlock>,
    #[serde(default)]
    pub npcs: Vec<StatBlock>,
    #[serde(default)]
    pub characters: Vec<PlayerCharacter>,
}

impl Roster {
    /// Look up an entity of the given kind
    pub fn find(&self, kind: EntryKind, id: &str) -> Option<&dyn RosterEntity> {
        match kind {
            EntryKind::Monster => self
                .monsters
                .iter()
                .find(|m| m.id == id)
                .map(|m| m as &dyn RosterEntity),
            EntryKind::Npc => self
                .npcs
                .iter()
                .find(|n| n.id == id)
                .map(|n| n as &dyn RosterEntity),
            EntryKind::PlayerCharacter => self
                .character(id)
                .map(|c| c as &dyn RosterEntity),
            EntryKind::Custom => None,
        }
    }

    pub fn character(&self, id: &str) -> Option<&PlayerCharacter> {
        self.characters.iter().find(|c| c.id == id)
    }
}

/// Ad-hoc participant typed in by the game master
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEntry {
    pub name: String,
    #[serde(default)]
    pub initiative: Option<i32>,
    #[serde(default)]
    pub hp: i32,
    #[serde(default)]
    pub max_hp: i32,
    #[serde(default)]
    pub ac: Option<i32>,
}

/// Snapshot a roster entity into an initiative entry
pub fn build_entry(source: &dyn RosterEntity, kind: EntryKind) -> InitiativeEntry {
    let dex_mod = ability_modifier(source.dexterity_score());
    let max_hp = source.max_hp().max(0);
    InitiativeEntry {
        id: source.id().to_string(),
        name: source.name().to_string(),
        kind,
        source_id: Some(source.id().to_string()),
        initiative: dex_mod,
        dex_mod,
        hp: source.hp().clamp(0, max_hp),
        max_hp,
        temp_hp: None,
        ac: source.armor_class(),
    }
}

/// Build an entry for a roster entity by id, if it is loaded
pub fn build_from_roster(roster: &Roster, kind: EntryKind, source_id: &str) -> Option<InitiativeEntry> {
    roster.find(kind, source_id).map(|source| build_entry(source, kind))
}

/// Build an entry for an ad-hoc participant.
///
/// Returns `None` without a name or initiative.
pub fn build_custom(custom: &CustomEntry) -> Option<InitiativeEntry> {
    let name = custom.name.trim();
    if name.is_empty() {
        return None;
    }
    let initiative = custom.initiative?;
    let max_hp = custom.max_hp.max(0);

    Some(InitiativeEntry {
        id: custom_entry_id(),
        name: name.to_string(),
        kind: EntryKind::Custom,
        source_id: None,
        initiative,
        dex_mod: 0,
        hp: custom.hp.clamp(0, max_hp),
        max_hp,
        temp_hp: None,
        ac: custom.ac,
    })
}

/// Timestamp plus random suffix
fn custom_entry_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "custom-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}
