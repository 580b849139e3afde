//! Move documents (`move/{name}`)

use super::raw::{NamedRef, decode, english_text, optional_count, required_name, within};
use crate::error::ValidationError;
use crate::model::{DamageClass, Move, NormalizedRecordSet, ResourceKey};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawMove {
    name: Option<String>,
    power: Option<i64>,
    accuracy: Option<i64>,
    pp: Option<i64>,
    damage_class: Option<NamedRef>,
    #[serde(rename = "type")]
    type_ref: Option<NamedRef>,
    flavor_text_entries: Option<Vec<Value>>,
    effect_entries: Option<Vec<Value>>,
}

/// Normalize a move document.
///
/// Power, accuracy and PP are legitimately absent for many moves and stay
/// absent. The description prefers the English flavor text and falls back to
/// the short effect.
pub fn normalize(key: &ResourceKey, body: &Value) -> Result<NormalizedRecordSet, ValidationError> {
    let entity = key.to_string();
    let raw: RawMove = decode(&entity, body)?;

    let name = required_name(&entity, "name", raw.name.as_deref())?;
    let power = optional_count(&entity, "power", raw.power)?;
    let accuracy = optional_count(&entity, "accuracy", raw.accuracy)?
        .map(|v| within(&entity, "accuracy", v, 0, 100))
        .transpose()?;
    let pp = optional_count(&entity, "pp", raw.pp)?;
    let damage_class = required_name(
        &entity,
        "damage_class",
        raw.damage_class.as_ref().and_then(|d| d.name.as_deref()),
    )?
    .parse::<DamageClass>()
    .map_err(|e| ValidationError::new(&entity, "damage_class", e))?;
    let type_name = required_name(
        &entity,
        "type",
        raw.type_ref.as_ref().and_then(|t| t.name.as_deref()),
    )?;

    let description = english_text(
        raw.flavor_text_entries.as_deref().unwrap_or_default(),
        "flavor_text",
    )
    .or_else(|| english_text(raw.effect_entries.as_deref().unwrap_or_default(), "short_effect"));

    let mut set = NormalizedRecordSet::new(key.clone());
    set.type_refs.insert(type_name.clone());
    set.moves.push(Move {
        name,
        power,
        accuracy,
        pp,
        damage_class,
        type_name,
        description,
    });
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKind;
    use serde_json::json;

    fn growl() -> Value {
        json!({
            "name": "growl",
            "power": null,
            "accuracy": 100,
            "pp": 40,
            "damage_class": {"name": "status"},
            "type": {"name": "normal"},
            "flavor_text_entries": [
                {"flavor_text": "The user growls in an\nendearing way.", "language": {"name": "en"}}
            ]
        })
    }

    fn key() -> ResourceKey {
        ResourceKey::new(ResourceKind::Move, "growl")
    }

    #[test]
    fn test_null_power_preserved() {
        let set = normalize(&key(), &growl()).unwrap();
        let growl = &set.moves[0];
        assert_eq!(growl.power, None);
        assert_eq!(growl.accuracy, Some(100));
        assert_eq!(growl.damage_class, DamageClass::Status);
        assert_eq!(growl.description.as_deref(), Some("The user growls in an endearing way."));
        assert!(set.type_refs.contains("normal"));
    }

    #[test]
    fn test_accuracy_out_of_range() {
        let mut body = growl();
        body["accuracy"] = json!(101);
        assert_eq!(normalize(&key(), &body).unwrap_err().field, "accuracy");
    }

    #[test]
    fn test_unknown_damage_class() {
        let mut body = growl();
        body["damage_class"] = json!({"name": "shadow"});
        assert_eq!(normalize(&key(), &body).unwrap_err().field, "damage_class");
    }

    #[test]
    fn test_missing_type_rejected() {
        let mut body = growl();
        body["type"] = Value::Null;
        assert_eq!(normalize(&key(), &body).unwrap_err().field, "type");
    }

    #[test]
    fn test_description_falls_back_to_short_effect() {
        let mut body = growl();
        body["flavor_text_entries"] = json!([]);
        body["effect_entries"] = json!([
            {"short_effect": "Lowers the target's Attack by one stage.", "language": {"name": "en"}}
        ]);
        let set = normalize(&key(), &body).unwrap();
        assert_eq!(
            set.moves[0].description.as_deref(),
            Some("Lowers the target's Attack by one stage.")
        );
    }
}
