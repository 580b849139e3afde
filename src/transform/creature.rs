//! Creature documents (`pokemon/{id}`)

use super::raw::{NamedRef, decode, http_url, optional_count, required_count, required_name};
use crate::error::ValidationError;
use crate::model::{
    BaseStats, Creature, CreatureAbility, CreatureMove, CreatureType, LearnMethod,
    NormalizedRecordSet, ResourceKey,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Deserialize)]
struct RawCreature {
    id: Option<i64>,
    name: Option<String>,
    height: Option<i64>,
    weight: Option<i64>,
    base_experience: Option<i64>,
    stats: Option<Vec<Value>>,
    types: Option<Vec<Value>>,
    abilities: Option<Vec<Value>>,
    moves: Option<Vec<Value>>,
    species: Option<NamedRef>,
    sprites: Option<RawSprites>,
}

#[derive(Debug, Deserialize)]
struct RawStat {
    base_stat: Option<i64>,
    stat: Option<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct RawTypeSlot {
    slot: Option<i64>,
    #[serde(rename = "type")]
    type_ref: Option<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct RawAbilitySlot {
    slot: Option<i64>,
    is_hidden: Option<bool>,
    ability: Option<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct RawMoveEntry {
    #[serde(rename = "move")]
    move_ref: Option<NamedRef>,
    version_group_details: Option<Vec<RawLearnDetail>>,
}

#[derive(Debug, Deserialize)]
struct RawLearnDetail {
    level_learned_at: Option<i64>,
    move_learn_method: Option<NamedRef>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSprites {
    front_default: Option<String>,
    front_shiny: Option<String>,
}

/// Normalize a creature document.
///
/// The creature itself fails on a missing id, name, measurement, stat or
/// species, or when no valid type remains. Bad type, ability and move entries
/// are reported in the set's `errors` and dropped. Only the first
/// `moves_per_creature` move entries are considered.
pub fn normalize(
    key: &ResourceKey,
    body: &Value,
    moves_per_creature: usize,
) -> Result<NormalizedRecordSet, ValidationError> {
    let entity = key.to_string();
    let raw: RawCreature = decode(&entity, body)?;

    let id = raw.id.ok_or_else(|| ValidationError::missing(&entity, "id"))?;
    if id <= 0 {
        return Err(ValidationError::new(
            &entity,
            "id",
            format!("expected a positive id, got {}", id),
        ));
    }
    let name = required_name(&entity, "name", raw.name.as_deref())?;
    let height = required_count(&entity, "height", raw.height)?;
    let weight = required_count(&entity, "weight", raw.weight)?;
    let base_experience = optional_count(&entity, "base_experience", raw.base_experience)?;
    let stats = base_stats(&entity, raw.stats.as_deref().unwrap_or_default())?;
    let species = raw
        .species
        .as_ref()
        .and_then(NamedRef::slug)
        .ok_or_else(|| ValidationError::missing(&entity, "species"))?;

    let mut set = NormalizedRecordSet::new(key.clone());

    let sprites = raw.sprites.unwrap_or_default();
    let sprite_front_default = sprite(&mut set, &entity, "front_default", sprites.front_default);
    let sprite_front_shiny = sprite(&mut set, &entity, "front_shiny", sprites.front_shiny);

    let types = creature_types(&mut set, &entity, id, raw.types.as_deref().unwrap_or_default());
    if types.is_empty() {
        return Err(ValidationError::new(
            &entity,
            "types",
            "at least one valid type is required",
        ));
    }
    let abilities =
        creature_abilities(&mut set, &entity, id, raw.abilities.as_deref().unwrap_or_default());
    let moves = creature_moves(
        &mut set,
        &entity,
        id,
        raw.moves.as_deref().unwrap_or_default(),
        moves_per_creature,
    );

    set.type_refs
        .extend(types.iter().map(|t| t.type_name.clone()));
    set.ability_refs
        .extend(abilities.iter().map(|a| a.ability_name.clone()));
    set.creature_types = types;
    set.creature_abilities = abilities;
    set.creature_moves = moves;

    set.creatures.push(Creature {
        id,
        name,
        height,
        weight,
        base_experience,
        stats,
        species,
        sprite_front_default,
        sprite_front_shiny,
    });
    Ok(set)
}

fn base_stats(entity: &str, entries: &[Value]) -> Result<BaseStats, ValidationError> {
    let mut found: [Option<u32>; 6] = [None; 6];
    for entry in entries {
        let stat: RawStat = match RawStat::deserialize(entry) {
            Ok(stat) => stat,
            Err(e) => return Err(ValidationError::new(entity, "stats", e.to_string())),
        };
        let Some(name) = stat.stat.as_ref().and_then(NamedRef::slug) else {
            continue;
        };
        let slot = match name.as_str() {
            "hp" => 0,
            "attack" => 1,
            "defense" => 2,
            "special-attack" => 3,
            "special-defense" => 4,
            "speed" => 5,
            _ => continue,
        };
        if found[slot].is_none() {
            let field = format!("stats.{}", name);
            found[slot] = Some(required_count(entity, &field, stat.base_stat)?);
        }
    }

    let take = |slot: usize, name: &str| {
        found[slot].ok_or_else(|| ValidationError::missing(entity, format!("stats.{}", name)))
    };
    Ok(BaseStats {
        hp: take(0, "hp")?,
        attack: take(1, "attack")?,
        defense: take(2, "defense")?,
        special_attack: take(3, "special-attack")?,
        special_defense: take(4, "special-defense")?,
        speed: take(5, "speed")?,
    })
}

fn sprite(
    set: &mut NormalizedRecordSet,
    entity: &str,
    field: &str,
    url: Option<String>,
) -> Option<String> {
    let url = url?;
    let valid = http_url(&url);
    if valid.is_none() {
        set.warn(entity, format!("dropping invalid sprite URL in {}: '{}'", field, url));
    }
    valid
}

fn creature_types(
    set: &mut NormalizedRecordSet,
    entity: &str,
    creature_id: i64,
    entries: &[Value],
) -> Vec<CreatureType> {
    let mut types: Vec<CreatureType> = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let label = format!("{} type #{}", entity, index + 1);
        let parsed = RawTypeSlot::deserialize(entry)
            .map_err(|e| ValidationError::new(&label, "type", e.to_string()))
            .and_then(|raw| {
                let type_name = required_name(
                    &label,
                    "type.name",
                    raw.type_ref.as_ref().and_then(|r| r.name.as_deref()),
                )?;
                let slot = positive_slot(&label, raw.slot)?;
                Ok(CreatureType {
                    creature_id,
                    type_name,
                    slot,
                })
            });
        match parsed {
            Ok(record) if types.iter().any(|t| t.type_name == record.type_name) => {
                set.warn(label, format!("duplicate type '{}' ignored", record.type_name));
            }
            Ok(record) => types.push(record),
            Err(err) => set.errors.push(err),
        }
    }
    types.sort_by_key(|t| t.slot);
    types
}

fn creature_abilities(
    set: &mut NormalizedRecordSet,
    entity: &str,
    creature_id: i64,
    entries: &[Value],
) -> Vec<CreatureAbility> {
    let mut abilities: Vec<CreatureAbility> = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let label = format!("{} ability #{}", entity, index + 1);
        let parsed = RawAbilitySlot::deserialize(entry)
            .map_err(|e| ValidationError::new(&label, "ability", e.to_string()))
            .and_then(|raw| {
                let ability_name = required_name(
                    &label,
                    "ability.name",
                    raw.ability.as_ref().and_then(|r| r.name.as_deref()),
                )?;
                let slot = positive_slot(&label, raw.slot)?;
                Ok(CreatureAbility {
                    creature_id,
                    ability_name,
                    slot,
                    is_hidden: raw.is_hidden.unwrap_or(false),
                })
            });
        match parsed {
            Ok(record) if abilities.iter().any(|a| a.ability_name == record.ability_name) => {
                set.warn(label, format!("duplicate ability '{}' ignored", record.ability_name));
            }
            Ok(record) => abilities.push(record),
            Err(err) => set.errors.push(err),
        }
    }
    abilities.sort_by_key(|a| a.slot);
    abilities
}

/// Junction rows for the first `limit` move entries.
///
/// Each entry lists how the move is learned per game version. The most recent
/// version with a supported learn method wins.
fn creature_moves(
    set: &mut NormalizedRecordSet,
    entity: &str,
    creature_id: i64,
    entries: &[Value],
    limit: usize,
) -> Vec<CreatureMove> {
    let mut moves = Vec::new();
    let mut seen = BTreeSet::new();
    for (index, entry) in entries.iter().take(limit).enumerate() {
        let label = format!("{} move #{}", entity, index + 1);
        let raw = match RawMoveEntry::deserialize(entry) {
            Ok(raw) => raw,
            Err(e) => {
                set.errors.push(ValidationError::new(&label, "move", e.to_string()));
                continue;
            }
        };
        let move_name = match required_name(
            &label,
            "move.name",
            raw.move_ref.as_ref().and_then(|r| r.name.as_deref()),
        ) {
            Ok(name) => name,
            Err(err) => {
                set.errors.push(err);
                continue;
            }
        };

        let details = raw.version_group_details.unwrap_or_default();
        let Some((method, level_learned_at)) = details.iter().rev().find_map(|detail| {
            let method = detail.move_learn_method.as_ref()?.slug()?;
            let method: LearnMethod = method.parse().ok()?;
            Some((method, detail.level_learned_at))
        }) else {
            set.warn(
                &label,
                format!("'{}' has no supported learn method, skipped", move_name),
            );
            continue;
        };

        let level = match method {
            LearnMethod::LevelUp => match required_count(&label, "level_learned_at", level_learned_at) {
                Ok(level) => Some(level),
                Err(err) => {
                    set.errors.push(err);
                    continue;
                }
            },
            _ => None,
        };

        if !seen.insert((move_name.clone(), method)) {
            continue;
        }
        match CreatureMove::new(creature_id, move_name, method, level) {
            Ok(record) => moves.push(record),
            Err(message) => set.errors.push(ValidationError::new(&label, "learn_method", message)),
        }
    }
    moves
}

fn positive_slot(entity: &str, slot: Option<i64>) -> Result<u32, ValidationError> {
    let slot = required_count(entity, "slot", slot)?;
    if slot == 0 {
        return Err(ValidationError::new(entity, "slot", "slot must be positive"));
    }
    Ok(slot)
}
