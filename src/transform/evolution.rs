//! Evolution chain documents (`evolution-chain/{id}`)
//!
//! Upstream nests the chain as a tree of `evolves_to` lists. It is flattened
//! here into one link per parent/child pair.

use super::raw::{NamedRef, decode, optional_count, required_name};
use crate::error::ValidationError;
use crate::model::{EvolutionChain, EvolutionLink, NormalizedRecordSet, ResourceKey};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Deserialize)]
struct RawChain {
    id: Option<i64>,
    chain: Option<RawChainNode>,
}

#[derive(Debug, Deserialize)]
struct RawChainNode {
    species: Option<NamedRef>,
    evolution_details: Option<Vec<RawEvolutionDetail>>,
    evolves_to: Option<Vec<RawChainNode>>,
}

#[derive(Debug, Deserialize)]
struct RawEvolutionDetail {
    min_level: Option<i64>,
    trigger: Option<NamedRef>,
}

pub fn normalize(key: &ResourceKey, body: &Value) -> Result<NormalizedRecordSet, ValidationError> {
    let entity = key.to_string();
    let raw: RawChain = decode(&entity, body)?;

    let chain_id = raw
        .id
        .or_else(|| key.numeric_id())
        .ok_or_else(|| ValidationError::missing(&entity, "id"))?;
    let root = raw
        .chain
        .ok_or_else(|| ValidationError::missing(&entity, "chain"))?;
    let root_species = required_name(
        &entity,
        "chain.species.name",
        root.species.as_ref().and_then(|s| s.name.as_deref()),
    )?;

    let mut set = NormalizedRecordSet::new(key.clone());
    let mut edges = BTreeSet::new();
    let mut lineage = vec![root_species.clone()];
    flatten(
        &mut set,
        &entity,
        chain_id,
        &root,
        &mut lineage,
        &mut edges,
    )?;

    set.evolution_chains.push(EvolutionChain {
        id: chain_id,
        root_species,
    });
    Ok(set)
}

/// Depth-first walk emitting a link for every child of `node`.
///
/// `lineage` holds the species from the root down to `node`; a child already
/// in it would make the chain cyclic.
fn flatten(
    set: &mut NormalizedRecordSet,
    entity: &str,
    chain_id: i64,
    node: &RawChainNode,
    lineage: &mut Vec<String>,
    edges: &mut BTreeSet<(String, String)>,
) -> Result<(), ValidationError> {
    let Some(parent) = lineage.last().cloned() else {
        return Ok(());
    };

    for child in node.evolves_to.as_deref().unwrap_or_default() {
        let to_species = match child.species.as_ref().and_then(NamedRef::slug) {
            Some(name) => name,
            None => {
                set.errors.push(ValidationError::missing(
                    format!("{} link from {}", entity, parent),
                    "species.name",
                ));
                continue;
            }
        };

        if lineage.contains(&to_species) {
            return Err(ValidationError::new(
                entity,
                "chain",
                format!("cycle: {} evolves back into {}", parent, to_species),
            ));
        }

        if edges.insert((parent.clone(), to_species.clone())) {
            let link_entity = format!("{} link {}->{}", entity, parent, to_species);
            let detail = child
                .evolution_details
                .as_deref()
                .and_then(|details| details.first());
            let min_level = match optional_count(
                &link_entity,
                "min_level",
                detail.and_then(|d| d.min_level),
            ) {
                Ok(level) => level,
                Err(err) => {
                    set.errors.push(err);
                    None
                }
            };

            set.evolution_links.push(EvolutionLink {
                chain_id,
                from_species: parent.clone(),
                to_species: to_species.clone(),
                min_level,
                trigger: detail.and_then(|d| d.trigger.as_ref()).and_then(NamedRef::slug),
            });
        } else {
            set.warn(
                entity,
                format!("duplicate link {} -> {} merged", parent, to_species),
            );
        }

        lineage.push(to_species);
        flatten(set, entity, chain_id, child, lineage, edges)?;
        lineage.pop();
    }
    Ok(())
}
