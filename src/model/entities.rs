//! Canonical entities and relation tuples
//!
//! Every record here already satisfies its invariants; the transformers
//! refuse to build one that does not.

use std::fmt;
use std::str::FromStr;

/// The six base stats. All non-negative by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BaseStats {
    pub hp: u32,
    pub attack: u32,
    pub defense: u32,
    pub special_attack: u32,
    pub special_defense: u32,
    pub speed: u32,
}

impl BaseStats {
    pub fn total(&self) -> u32 {
        self.hp
            + self.attack
            + self.defense
            + self.special_attack
            + self.special_defense
            + self.speed
    }
}

/// A creature (the root resource). Keyed by its upstream numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Creature {
    pub id: i64,
    pub name: String,
    /// Decimetres
    pub height: u32,
    /// Hectograms
    pub weight: u32,
    pub base_experience: Option<u32>,
    pub stats: BaseStats,
    pub species: String,
    pub sprite_front_default: Option<String>,
    pub sprite_front_shiny: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Species {
    pub name: String,
    pub genus: Option<String>,
    pub flavor_text: Option<String>,
    pub generation: Option<u32>,
    /// Eighths female, or -1 for genderless.
    pub gender_rate: i32,
    pub capture_rate: u32,
    pub base_happiness: Option<u32>,
    pub egg_groups: Vec<String>,
    pub is_legendary: bool,
    pub is_mythical: bool,
    pub evolution_chain_id: Option<i64>,
}

impl Species {
    pub const MAX_CAPTURE_RATE: u32 = 255;
    pub const MAX_BASE_HAPPINESS: u32 = 255;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRecord {
    pub name: String,
    pub id: Option<i64>,
}

/// Attack multiplier of `attacker` against `defender`, in percent.
///
/// Only non-neutral pairs are stored; an absent pair means 100.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEfficacy {
    pub attacker: String,
    pub defender: String,
    pub damage_factor: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ability {
    pub name: String,
    pub effect: Option<String>,
    pub short_effect: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DamageClass {
    Physical,
    Special,
    Status,
}

impl DamageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Physical => "physical",
            Self::Special => "special",
            Self::Status => "status",
        }
    }
}

impl FromStr for DamageClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "physical" => Ok(Self::Physical),
            "special" => Ok(Self::Special),
            "status" => Ok(Self::Status),
            other => Err(format!("unknown damage class '{}'", other)),
        }
    }
}

impl fmt::Display for DamageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub name: String,
    /// Absent for most status moves.
    pub power: Option<u32>,
    pub accuracy: Option<u32>,
    pub pp: Option<u32>,
    pub damage_class: DamageClass,
    pub type_name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LearnMethod {
    LevelUp,
    Egg,
    Tutor,
    Machine,
}

impl LearnMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LevelUp => "level-up",
            Self::Egg => "egg",
            Self::Tutor => "tutor",
            Self::Machine => "machine",
        }
    }
}

impl FromStr for LearnMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "level-up" => Ok(Self::LevelUp),
            "egg" => Ok(Self::Egg),
            "tutor" => Ok(Self::Tutor),
            "machine" => Ok(Self::Machine),
            other => Err(format!("unsupported learn method '{}'", other)),
        }
    }
}

impl fmt::Display for LearnMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatureType {
    pub creature_id: i64,
    pub type_name: String,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatureAbility {
    pub creature_id: i64,
    pub ability_name: String,
    pub slot: u32,
    pub is_hidden: bool,
}

/// How a creature learns a move. `level` is `Some` exactly for level-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatureMove {
    pub creature_id: i64,
    pub move_name: String,
    pub learn_method: LearnMethod,
    pub level: Option<u32>,
}

impl CreatureMove {
    /// Build a junction row, enforcing the level/learn-method pairing.
    pub fn new(
        creature_id: i64,
        move_name: impl Into<String>,
        learn_method: LearnMethod,
        level: Option<u32>,
    ) -> Result<Self, String> {
        match (learn_method, level) {
            (LearnMethod::LevelUp, None) => {
                return Err("level-up move without a level".to_string());
            }
            (method, Some(_)) if method != LearnMethod::LevelUp => {
                return Err(format!("{} move must not carry a level", method));
            }
            _ => {}
        }
        Ok(Self {
            creature_id,
            move_name: move_name.into(),
            learn_method,
            level,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvolutionChain {
    pub id: i64,
    pub root_species: String,
}

/// One directed step of an evolution chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvolutionLink {
    pub chain_id: i64,
    pub from_species: String,
    pub to_species: String,
    pub min_level: Option<u32>,
    pub trigger: Option<String>,
}
