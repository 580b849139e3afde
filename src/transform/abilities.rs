//! Ability documents (`ability/{name}`)

use super::raw::{decode, english_text, required_name};
use crate::error::ValidationError;
use crate::model::{Ability, NormalizedRecordSet, ResourceKey};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawAbility {
    name: Option<String>,
    effect_entries: Option<Vec<Value>>,
}

pub fn normalize(key: &ResourceKey, body: &Value) -> Result<NormalizedRecordSet, ValidationError> {
    let entity = key.to_string();
    let raw: RawAbility = decode(&entity, body)?;
    let name = required_name(&entity, "name", raw.name.as_deref())?;
    let entries = raw.effect_entries.unwrap_or_default();

    let mut set = NormalizedRecordSet::new(key.clone());
    set.ability_refs.insert(name.clone());
    set.abilities.push(Ability {
        name,
        effect: english_text(&entries, "effect"),
        short_effect: english_text(&entries, "short_effect"),
    });
    Ok(set)
}
