//! Hit point and class resource mutation
//!
//! Every update here is a pure function: it takes the old value and returns
//! a new one. Out-of-range input is clamped, never rejected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::entry::InitiativeEntry;

/// Highest spell slot level
pub const MAX_SPELL_LEVEL: u8 = 9;

/// Apply a hit point delta, clamped to `0..=max_hp`
pub fn apply_hp_delta(entry: &InitiativeEntry, delta: i32) -> InitiativeEntry {
    let max_hp = entry.max_hp.max(0);
    InitiativeEntry {
        hp: entry.hp.saturating_add(delta).clamp(0, max_hp),
        ..entry.clone()
    }
}

/// Apply a temporary hit point delta, floored at zero
pub fn apply_temp_hp_delta(entry: &InitiativeEntry, delta: i32) -> InitiativeEntry {
    InitiativeEntry {
        temp_hp: Some(entry.temp_hp().saturating_add(delta).max(0)),
        ..entry.clone()
    }
}

/// A `{current, max}` counter for a limited-use ability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourcePool {
    pub current: i32,
    pub max: i32,
}

impl ResourcePool {
    /// A full pool
    pub fn full(max: i32) -> Self {
        let max = max.max(0);
        Self { current: max, max }
    }

    /// Request a new current value.
    ///
    /// Requesting the value the pool already holds empties it; anything
    /// else is clamped to `0..=max`.
    pub fn set(self, requested: i32) -> Self {
        let current = if requested == self.current {
            0
        } else {
            requested.clamp(0, self.max.max(0))
        };
        Self { current, ..self }
    }

    pub fn is_empty(&self) -> bool {
        self.current <= 0
    }
}

/// Spell slots by level (1 through 9)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpellSlots(BTreeMap<u8, ResourcePool>);

impl SpellSlots {
    /// Build from `(level, max)` pairs, all slots full. Levels outside 1..=9 are ignored.
    pub fn from_maxes(maxes: impl IntoIterator<Item = (u8, i32)>) -> Self {
        Self(
            maxes
                .into_iter()
                .filter(|(level, _)| (1..=MAX_SPELL_LEVEL).contains(level))
                .map(|(level, max)| (level, ResourcePool::full(max)))
                .collect(),
        )
    }

    pub fn get(&self, level: u8) -> Option<ResourcePool> {
        self.0.get(&level).copied()
    }

    /// Set the current value for a level. Unknown levels leave the slots unchanged.
    pub fn update(&self, level: u8, requested: i32) -> SpellSlots {
        let mut next = self.clone();
        if let Some(pool) = next.0.get_mut(&level) {
            *pool = pool.set(requested);
        }
        next
    }

    /// Refill every level (long rest)
    pub fn restore(&self) -> SpellSlots {
        Self(
            self.0
                .iter()
                .map(|(&level, pool)| (level, ResourcePool::full(pool.max)))
                .collect(),
        )
    }

    pub fn levels(&self) -> impl Iterator<Item = (u8, ResourcePool)> + '_ {
        self.0.iter().map(|(&level, &pool)| (level, pool))
    }
}

/// Named class resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Rages,
    KiPoints,
    SorceryPoints,
    ChannelDivinity,
    Indomitable,
    ActionSurge,
    Inspiration,
}

/// Character classes, as far as resource pools are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterClass {
    Barbarian,
    Bard,
    Cleric,
    Druid,
    Fighter,
    Monk,
    Paladin,
    Ranger,
    Rogue,
    Sorcerer,
    Warlock,
    Wizard,
}

impl CharacterClass {
    /// The named pools this class grants
    pub fn resource_kinds(self) -> &'static [ResourceKind] {
        match self {
            CharacterClass::Barbarian => &[ResourceKind::Rages],
            CharacterClass::Bard => &[ResourceKind::Inspiration],
            CharacterClass::Cleric | CharacterClass::Paladin => &[ResourceKind::ChannelDivinity],
            CharacterClass::Fighter => &[ResourceKind::ActionSurge, ResourceKind::Indomitable],
            CharacterClass::Monk => &[ResourceKind::KiPoints],
            CharacterClass::Sorcerer => &[ResourceKind::SorceryPoints],
            CharacterClass::Druid
            | CharacterClass::Ranger
            | CharacterClass::Rogue
            | CharacterClass::Warlock
            | CharacterClass::Wizard => &[],
        }
    }
}

/// A character's class resource pools, keyed by kind
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassResources(BTreeMap<ResourceKind, ResourcePool>);

impl ClassResources {
    /// Full pools for every kind the class grants, sized by `max_for`
    pub fn for_class(class: CharacterClass, max_for: impl Fn(ResourceKind) -> i32) -> Self {
        Self(
            class
                .resource_kinds()
                .iter()
                .map(|&kind| (kind, ResourcePool::full(max_for(kind))))
                .collect(),
        )
    }

    pub fn get(&self, kind: ResourceKind) -> Option<ResourcePool> {
        self.0.get(&kind).copied()
    }

    /// Set the current value of a pool. Pools the character lacks are left alone.
    pub fn update(&self, kind: ResourceKind, requested: i32) -> ClassResources {
        let mut next = self.clone();
        if let Some(pool) = next.0.get_mut(&kind) {
            *pool = pool.set(requested);
        }
        next
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.0.keys().copied()
    }
}
