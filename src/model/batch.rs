//! Merge of record sets into one deduplicated load unit

use super::entities::*;
use super::key::ResourceKey;
use super::record_set::NormalizedRecordSet;
use std::collections::{BTreeMap, BTreeSet};

/// Record sets of one batch, deduplicated by natural key.
///
/// Maps are ordered so the loader writes rows in a deterministic order no
/// matter how the payloads arrived. When two sets carry the same key the
/// first one wins; identical payloads produce identical records, so this only
/// matters for conflicting upstream data.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordBatch {
    pub sources: BTreeSet<ResourceKey>,
    pub types: BTreeMap<String, TypeRecord>,
    pub type_refs: BTreeSet<String>,
    pub abilities: BTreeMap<String, Ability>,
    pub ability_refs: BTreeSet<String>,
    pub evolution_chains: BTreeMap<i64, EvolutionChain>,
    pub species: BTreeMap<String, Species>,
    pub moves: BTreeMap<String, Move>,
    pub creatures: BTreeMap<i64, Creature>,
    pub type_efficacy: BTreeMap<(String, String), TypeEfficacy>,
    pub evolution_links: BTreeMap<(i64, String, String), EvolutionLink>,
    pub creature_types: BTreeMap<(i64, String), CreatureType>,
    pub creature_abilities: BTreeMap<(i64, String), CreatureAbility>,
    pub creature_moves: BTreeMap<(i64, String, LearnMethod), CreatureMove>,
}

impl RecordBatch {
    pub fn merge(sets: impl IntoIterator<Item = NormalizedRecordSet>) -> Self {
        let mut batch = Self::default();
        for set in sets {
            batch.absorb(set);
        }
        batch
    }

    pub fn absorb(&mut self, set: NormalizedRecordSet) {
        self.sources.insert(set.source);

        for record in set.types {
            self.types.entry(record.name.clone()).or_insert(record);
        }
        self.type_refs.extend(set.type_refs);
        for record in set.abilities {
            self.abilities.entry(record.name.clone()).or_insert(record);
        }
        self.ability_refs.extend(set.ability_refs);
        for record in set.evolution_chains {
            self.evolution_chains.entry(record.id).or_insert(record);
        }
        for record in set.species {
            self.species.entry(record.name.clone()).or_insert(record);
        }
        for record in set.moves {
            self.moves.entry(record.name.clone()).or_insert(record);
        }
        for record in set.creatures {
            self.creatures.entry(record.id).or_insert(record);
        }
        for record in set.type_efficacy {
            self.type_efficacy
                .entry((record.attacker.clone(), record.defender.clone()))
                .or_insert(record);
        }
        for record in set.evolution_links {
            self.evolution_links
                .entry((
                    record.chain_id,
                    record.from_species.clone(),
                    record.to_species.clone(),
                ))
                .or_insert(record);
        }
        for record in set.creature_types {
            self.creature_types
                .entry((record.creature_id, record.type_name.clone()))
                .or_insert(record);
        }
        for record in set.creature_abilities {
            self.creature_abilities
                .entry((record.creature_id, record.ability_name.clone()))
                .or_insert(record);
        }
        for record in set.creature_moves {
            self.creature_moves
                .entry((
                    record.creature_id,
                    record.move_name.clone(),
                    record.learn_method,
                ))
                .or_insert(record);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
            && self.type_refs.is_empty()
            && self.abilities.is_empty()
            && self.ability_refs.is_empty()
            && self.evolution_chains.is_empty()
            && self.species.is_empty()
            && self.moves.is_empty()
            && self.creatures.is_empty()
    }
}
