//! Output of normalizing one raw payload

use super::entities::*;
use super::key::ResourceKey;
use crate::error::ValidationError;
use serde::Serialize;
use std::collections::BTreeSet;

/// Non-fatal observation made while normalizing (dropped URL, skipped
/// unsupported learn method, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationWarning {
    pub entity: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            message: message.into(),
        }
    }
}

/// Every entity and relation discovered in one raw payload.
///
/// `type_refs` and `ability_refs` name rows that must exist for the relations
/// in this set to hold; the loader inserts them if absent without touching
/// existing rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecordSet {
    pub source: ResourceKey,
    pub creatures: Vec<Creature>,
    pub species: Vec<Species>,
    pub types: Vec<TypeRecord>,
    pub type_refs: BTreeSet<String>,
    pub abilities: Vec<Ability>,
    pub ability_refs: BTreeSet<String>,
    pub moves: Vec<Move>,
    pub evolution_chains: Vec<EvolutionChain>,
    pub type_efficacy: Vec<TypeEfficacy>,
    pub evolution_links: Vec<EvolutionLink>,
    pub creature_types: Vec<CreatureType>,
    pub creature_abilities: Vec<CreatureAbility>,
    pub creature_moves: Vec<CreatureMove>,
    pub warnings: Vec<ValidationWarning>,
    pub errors: Vec<ValidationError>,
}

impl NormalizedRecordSet {
    pub fn new(source: ResourceKey) -> Self {
        Self {
            source,
            creatures: Vec::new(),
            species: Vec::new(),
            types: Vec::new(),
            type_refs: BTreeSet::new(),
            abilities: Vec::new(),
            ability_refs: BTreeSet::new(),
            moves: Vec::new(),
            evolution_chains: Vec::new(),
            type_efficacy: Vec::new(),
            evolution_links: Vec::new(),
            creature_types: Vec::new(),
            creature_abilities: Vec::new(),
            creature_moves: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, entity: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationWarning::new(entity, message));
    }

    /// Number of entity and relation records (references excluded).
    pub fn record_count(&self) -> usize {
        self.creatures.len()
            + self.species.len()
            + self.types.len()
            + self.abilities.len()
            + self.moves.len()
            + self.evolution_chains.len()
            + self.type_efficacy.len()
            + self.evolution_links.len()
            + self.creature_types.len()
            + self.creature_abilities.len()
            + self.creature_moves.len()
    }
}
