//! Species documents (`pokemon-species/{name}`)

use super::raw::{NamedRef, decode, english_text, optional_count, required_name, within};
use crate::error::ValidationError;
use crate::model::{NormalizedRecordSet, ResourceKey, ResourceKind, Species};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawSpecies {
    name: Option<String>,
    capture_rate: Option<i64>,
    base_happiness: Option<i64>,
    gender_rate: Option<i64>,
    is_legendary: Option<bool>,
    is_mythical: Option<bool>,
    generation: Option<NamedRef>,
    egg_groups: Option<Vec<NamedRef>>,
    genera: Option<Vec<Value>>,
    flavor_text_entries: Option<Vec<Value>>,
    evolution_chain: Option<NamedRef>,
}

pub fn normalize(key: &ResourceKey, body: &Value) -> Result<NormalizedRecordSet, ValidationError> {
    let entity = key.to_string();
    let raw: RawSpecies = decode(&entity, body)?;

    let name = required_name(&entity, "name", raw.name.as_deref())?;
    let capture_rate = raw
        .capture_rate
        .ok_or_else(|| ValidationError::missing(&entity, "capture_rate"))?;
    let capture_rate = within(
        &entity,
        "capture_rate",
        capture_rate,
        0,
        i64::from(Species::MAX_CAPTURE_RATE),
    )? as u32;
    let base_happiness = optional_count(&entity, "base_happiness", raw.base_happiness)?
        .map(|v| within(&entity, "base_happiness", v, 0, Species::MAX_BASE_HAPPINESS))
        .transpose()?;
    let gender_rate = raw
        .gender_rate
        .ok_or_else(|| ValidationError::missing(&entity, "gender_rate"))?;
    let gender_rate = within(&entity, "gender_rate", gender_rate, -1, 8)? as i32;

    let mut set = NormalizedRecordSet::new(key.clone());

    let generation = raw.generation.as_ref().and_then(|g| {
        let id = g.url_id(ResourceKind::Species).and_then(|id| u32::try_from(id).ok());
        if id.is_none() {
            set.warn(&entity, "generation reference has no numeric id");
        }
        id
    });
    let evolution_chain_id = raw
        .evolution_chain
        .as_ref()
        .and_then(|chain| chain.url_id(ResourceKind::EvolutionChain));

    let mut egg_groups: Vec<String> = raw
        .egg_groups
        .unwrap_or_default()
        .iter()
        .filter_map(NamedRef::slug)
        .collect();
    egg_groups.dedup();

    set.species.push(Species {
        name,
        genus: english_text(raw.genera.as_deref().unwrap_or_default(), "genus"),
        flavor_text: english_text(
            raw.flavor_text_entries.as_deref().unwrap_or_default(),
            "flavor_text",
        ),
        generation,
        gender_rate,
        capture_rate,
        base_happiness,
        egg_groups,
        is_legendary: raw.is_legendary.unwrap_or(false),
        is_mythical: raw.is_mythical.unwrap_or(false),
        evolution_chain_id,
    });
    Ok(set)
}
