//! Type documents (`type/{name}`) and the damage relations they carry

use super::raw::{NamedRef, decode, required_name};
use crate::error::ValidationError;
use crate::model::{NormalizedRecordSet, ResourceKey, TypeEfficacy, TypeRecord};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Damage factors, in percent, for the outgoing relation lists.
const RELATIONS: [(&str, u16); 3] = [
    ("double_damage_to", 200),
    ("half_damage_to", 50),
    ("no_damage_to", 0),
];

#[derive(Debug, Deserialize)]
struct RawType {
    id: Option<i64>,
    name: Option<String>,
    damage_relations: Option<BTreeMap<String, Option<Vec<NamedRef>>>>,
}

/// Normalize a type document.
///
/// Only outgoing relations are read; the incoming lists of one type are the
/// outgoing lists of another. A defender listed under two different factors
/// has no well-defined multiplier, so neither is kept and the conflict is
/// reported.
pub fn normalize(key: &ResourceKey, body: &Value) -> Result<NormalizedRecordSet, ValidationError> {
    let entity = key.to_string();
    let raw: RawType = decode(&entity, body)?;
    let attacker = required_name(&entity, "name", raw.name.as_deref())?;

    let mut set = NormalizedRecordSet::new(key.clone());
    let relations = raw.damage_relations.unwrap_or_default();
    let mut factors: BTreeMap<String, u16> = BTreeMap::new();
    let mut conflicts = BTreeSet::new();

    for (field, factor) in RELATIONS {
        let Some(Some(defenders)) = relations.get(field) else {
            continue;
        };
        for defender in defenders.iter().filter_map(NamedRef::slug) {
            match factors.get(&defender) {
                Some(existing) if *existing != factor => {
                    conflicts.insert(defender);
                }
                Some(_) => {}
                None => {
                    factors.insert(defender, factor);
                }
            }
        }
    }

    for defender in conflicts {
        factors.remove(&defender);
        set.errors.push(ValidationError::new(
            format!("{} -> {}", entity, defender),
            "damage_relations",
            format!(
                "{} is listed with more than one damage factor against {}",
                attacker, defender
            ),
        ));
    }

    set.type_refs.insert(attacker.clone());
    for (defender, damage_factor) in factors {
        set.type_refs.insert(defender.clone());
        set.type_efficacy.push(TypeEfficacy {
            attacker: attacker.clone(),
            defender,
            damage_factor,
        });
    }
    set.types.push(TypeRecord {
        name: attacker,
        id: raw.id,
    });
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKind;
    use serde_json::json;

    fn refs(names: &[&str]) -> Value {
        Value::Array(names.iter().map(|n| json!({"name": n, "url": ""})).collect())
    }

    fn fire() -> Value {
        json!({
            "id": 10,
            "name": "fire",
            "damage_relations": {
                "double_damage_to": refs(&["grass", "ice", "bug", "steel"]),
                "half_damage_to": refs(&["fire", "water", "rock", "dragon"]),
                "no_damage_to": [],
                "double_damage_from": refs(&["water"]),
                "half_damage_from": null
            }
        })
    }

    fn key() -> ResourceKey {
        ResourceKey::new(ResourceKind::Type, "fire")
    }

    #[test]
    fn test_normalize_type() {
        let set = normalize(&key(), &fire()).unwrap();
        assert_eq!(set.types[0].id, Some(10));
        assert_eq!(set.type_efficacy.len(), 8);

        let grass = set
            .type_efficacy
            .iter()
            .find(|e| e.defender == "grass")
            .unwrap();
        assert_eq!(grass.damage_factor, 200);
        let own = set.type_efficacy.iter().find(|e| e.defender == "fire").unwrap();
        assert_eq!(own.damage_factor, 50);

        // Incoming relations are not this document's business
        assert!(set.type_efficacy.iter().all(|e| e.attacker == "fire"));
        assert!(set.type_refs.contains("steel"));
        assert!(set.errors.is_empty());
    }

    #[test]
    fn test_conflicting_factors_dropped() {
        let mut body = fire();
        body["damage_relations"]["no_damage_to"] = refs(&["grass"]);
        let set = normalize(&key(), &body).unwrap();
        assert!(!set.type_efficacy.iter().any(|e| e.defender == "grass"));
        assert_eq!(set.errors.len(), 1);
        assert_eq!(set.errors[0].entity, "type/fire -> grass");
    }

    #[test]
    fn test_type_without_relations() {
        let set = normalize(&key(), &json!({"id": 10, "name": "fire"})).unwrap();
        assert!(set.type_efficacy.is_empty());
        assert_eq!(set.types.len(), 1);
    }
}
