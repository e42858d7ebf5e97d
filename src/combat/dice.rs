//! Dice rolling system
//!
//! Provides:
//! - `roll(sides, times)`: the primitive every other roll is built on
//! - d20 rolls with advantage/disadvantage
//! - Ability score generation (4d6 drop lowest, best six of seven)
//! - Notation like "2d6+3", "d20", "4d6-2" for ad-hoc checks

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Number of ability scores on a character sheet
pub const ABILITY_COUNT: usize = 6;

/// Source of die faces.
///
/// Every [`rand::Rng`] is a roller. [`ScriptedRoller`] replays fixed faces.
pub trait Roller {
    /// Draw one face in `1..=sides`
    fn roll_die(&mut self, sides: u32) -> u32;
}

impl<R: Rng + ?Sized> Roller for R {
    fn roll_die(&mut self, sides: u32) -> u32 {
        self.random_range(1..=sides.max(1))
    }
}

/// Replays a fixed sequence of faces, cycling when exhausted.
///
/// Used for deterministic tests and for entering physical dice by hand.
/// Faces are clamped into `1..=sides` of the die being rolled.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRoller {
    faces: VecDeque<u32>,
}

impl ScriptedRoller {
    /// Create a roller that yields `faces` in order
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: faces.into_iter().collect(),
        }
    }
}

impl Roller for ScriptedRoller {
    fn roll_die(&mut self, sides: u32) -> u32 {
        let Some(face) = self.faces.pop_front() else {
            return 1;
        };
        self.faces.push_back(face);
        face.clamp(1, sides.max(1))
    }
}

/// Outcome of rolling one kind of die several times
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roll {
    pub rolls: Vec<u32>,
    pub total: u32,
}

/// Roll an N-sided die `times` times
pub fn roll(sides: u32, times: u32) -> Roll {
    roll_with(&mut rand::rng(), sides, times)
}

/// Roll an N-sided die `times` times using the given roller
pub fn roll_with<R: Roller + ?Sized>(roller: &mut R, sides: u32, times: u32) -> Roll {
    let rolls: Vec<u32> = (0..times).map(|_| roller.roll_die(sides)).collect();
    let total = rolls.iter().sum();
    Roll { rolls, total }
}

/// How a d20 test picks between its two dice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollMode {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

/// A d20 test: both raw dice plus the one that counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct D20Roll {
    pub mode: RollMode,
    pub rolls: [u32; 2],
    pub total: u32,
}

/// Roll a d20 test in the given mode
pub fn roll_d20(mode: RollMode) -> D20Roll {
    roll_d20_with(&mut rand::rng(), mode)
}

/// Roll a d20 test in the given mode using the given roller
pub fn roll_d20_with<R: Roller + ?Sized>(roller: &mut R, mode: RollMode) -> D20Roll {
    let first = roller.roll_die(20);
    let second = roller.roll_die(20);
    let total = match mode {
        RollMode::Normal => first,
        RollMode::Advantage => first.max(second),
        RollMode::Disadvantage => first.min(second),
    };
    D20Roll {
        mode,
        rolls: [first, second],
        total,
    }
}

/// Generate a set of ability scores
///
/// Rolls seven scores of 4d6 (dropping the lowest die of each), then
/// discards the lowest score. Returned ascending.
pub fn generate_ability_scores() -> [u32; ABILITY_COUNT] {
    generate_ability_scores_with(&mut rand::rng())
}

/// Generate a set of ability scores using the given roller
pub fn generate_ability_scores_with<R: Roller + ?Sized>(roller: &mut R) -> [u32; ABILITY_COUNT] {
    let mut totals: Vec<u32> = (0..=ABILITY_COUNT)
        .map(|_| {
            let mut dice = roll_with(&mut *roller, 6, 4).rolls;
            dice.sort_unstable();
            dice[1..].iter().sum()
        })
        .collect();
    totals.sort_unstable();

    let mut scores = [0; ABILITY_COUNT];
    scores.copy_from_slice(&totals[1..]);
    scores
}

/// A parsed dice expression such as "2d6+3"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiceRoll {
    pub count: u32,
    pub sides: u32,
    pub modifier: i32,
}

impl DiceRoll {
    pub fn new(count: u32, sides: u32, modifier: i32) -> Self {
        Self {
            count,
            sides,
            modifier,
        }
    }

    /// Roll the expression, returning the dice and the modified total
    pub fn roll_with<R: Roller + ?Sized>(&self, roller: &mut R) -> (Roll, i32) {
        let dice = roll_with(roller, self.sides, self.count);
        let total = dice.total as i32 + self.modifier;
        (dice, total)
    }

    /// Roll with the thread-local RNG
    pub fn roll(&self) -> (Roll, i32) {
        self.roll_with(&mut rand::rng())
    }

    pub fn min(&self) -> i32 {
        self.count as i32 + self.modifier
    }

    pub fn max(&self) -> i32 {
        (self.count * self.sides) as i32 + self.modifier
    }
}

impl FromStr for DiceRoll {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let notation = s.trim().to_lowercase();
        let (count_str, rest) = notation
            .split_once('d')
            .ok_or("Missing 'd' in dice notation")?;

        let count: u32 = if count_str.is_empty() {
            1
        } else {
            count_str
                .parse()
                .map_err(|_| format!("Invalid dice count: {}", count_str))?
        };
        if count == 0 {
            return Err("Dice count must be at least 1".to_string());
        }

        // Sign stays attached to the modifier so "-2" parses as negative
        let (sides_str, modifier) = match rest.find(['+', '-']) {
            Some(pos) => {
                let mod_str = rest[pos..].trim_start_matches('+');
                let modifier: i32 = mod_str
                    .parse()
                    .map_err(|_| format!("Invalid modifier: {}", &rest[pos..]))?;
                (&rest[..pos], modifier)
            }
            None => (rest, 0),
        };

        let sides: u32 = sides_str
            .parse()
            .map_err(|_| format!("Invalid die sides: {}", sides_str))?;
        if sides == 0 {
            return Err("Die sides must be at least 1".to_string());
        }

        Ok(DiceRoll::new(count, sides, modifier))
    }
}

impl fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.modifier {
            0 => write!(f, "{}d{}", self.count, self.sides),
            m if m > 0 => write!(f, "{}d{}+{}", self.count, self.sides, m),
            m => write!(f, "{}d{}{}", self.count, self.sides, m),
        }
    }
}
