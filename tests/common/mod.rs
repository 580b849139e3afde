//! In-memory stand-in for the upstream API
//!
//! Generates a consistent synthetic resource graph and can be told to fail
//! specific resources, permanently or a number of times before recovering.

#![allow(dead_code)]

use pokedex_sync::client::{NamedResource, ResourcePage, ResourceSource};
use pokedex_sync::config::RunConfig;
use pokedex_sync::error::FetchError;
use pokedex_sync::model::{ResourceKey, ResourceKind};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub const BASE: &str = "http://dex.test/api/v2/";
pub const TYPES: u64 = 5;
pub const ABILITIES: u64 = 4;
pub const MOVES: u64 = 8;
pub const MOVES_PER_CREATURE: u64 = 5;

#[derive(Default)]
pub struct MockApi {
    total: u64,
    latency: Duration,
    missing: HashSet<ResourceKey>,
    unavailable: HashSet<ResourceKey>,
    flaky: Mutex<HashMap<ResourceKey, u32>>,
    calls: Mutex<HashMap<ResourceKey, u32>>,
    requests: Mutex<Vec<Instant>>,
}

impl MockApi {
    /// A graph with creatures `1..=total`.
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answer 404 for `key`, every time.
    pub fn missing(mut self, key: ResourceKey) -> Self {
        self.missing.insert(key);
        self
    }

    /// Answer 503 for `key`, every time.
    pub fn unavailable(mut self, key: ResourceKey) -> Self {
        self.unavailable.insert(key);
        self
    }

    /// Answer 503 for `key` the first `failures` times.
    pub fn flaky(self, key: ResourceKey, failures: u32) -> Self {
        self.flaky
            .lock()
            .unwrap()
            .insert(key, failures);
        self
    }

    pub fn calls(&self, key: &ResourceKey) -> u32 {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    /// Largest number of fetches that started within any one-second window.
    pub fn max_per_second(&self) -> usize {
        let requests = self.requests.lock().unwrap();
        (0..requests.len())
            .map(|start| {
                let window_end = requests[start] + Duration::from_secs(1);
                requests[start..].iter().take_while(|t| **t < window_end).count()
            })
            .max()
            .unwrap_or(0)
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn record(&self, key: &ResourceKey) {
        *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;
        self.requests.lock().unwrap().push(Instant::now());
    }

    fn injected_failure(&self, key: &ResourceKey) -> Option<FetchError> {
        if self.missing.contains(key) {
            return Some(FetchError::Permanent {
                status: Some(404),
                message: "Not Found".into(),
            });
        }
        if self.unavailable.contains(key) {
            return Some(service_unavailable());
        }
        let mut flaky = self.flaky.lock().unwrap();
        match flaky.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Some(service_unavailable())
            }
            _ => None,
        }
    }

    fn document(&self, key: &ResourceKey) -> Option<Value> {
        let number = |prefix: &str| key.id.strip_prefix(prefix).and_then(|n| n.parse::<u64>().ok());
        match key.kind {
            ResourceKind::Creature => key
                .numeric_id()
                .map(|id| id as u64)
                .filter(|id| (1..=self.total).contains(id))
                .map(creature),
            ResourceKind::Species => number("mon-").filter(|id| (1..=self.total).contains(id)).map(species),
            ResourceKind::EvolutionChain => key
                .numeric_id()
                .map(|id| id as u64)
                .filter(|id| (1..=self.total.div_ceil(3)).contains(id))
                .map(chain),
            ResourceKind::Type => number("type-").filter(|t| *t < TYPES).map(type_doc),
            ResourceKind::Ability => number("ability-").filter(|a| *a < ABILITIES).map(ability),
            ResourceKind::Move => number("move-").filter(|m| *m < MOVES).map(move_doc),
        }
    }
}

fn service_unavailable() -> FetchError {
    FetchError::Transient {
        status: Some(503),
        message: "Service Unavailable".into(),
    }
}

fn url(path: &str) -> String {
    format!("{}{}/", BASE, path)
}

pub fn creature(id: u64) -> Value {
    let mut types = vec![json!({"slot": 1, "type": {"name": format!("type-{}", id % TYPES), "url": url(&format!("type/{}", id % TYPES))}})];
    if id % 2 == 0 {
        let second = (id + 1) % TYPES;
        types.push(json!({"slot": 2, "type": {"name": format!("type-{}", second), "url": url(&format!("type/{}", second))}}));
    }
    let moves: Vec<Value> = (0..MOVES_PER_CREATURE)
        .map(|k| {
            let m = (id + k) % MOVES;
            json!({
                "move": {"name": format!("move-{}", m), "url": url(&format!("move/{}", m))},
                "version_group_details": [
                    {"level_learned_at": 0, "move_learn_method": {"name": "machine"}},
                    {"level_learned_at": k * 5 + 1, "move_learn_method": {"name": "level-up"}}
                ]
            })
        })
        .collect();
    json!({
        "id": id,
        "name": format!("mon-{}", id),
        "height": 3 + id % 10,
        "weight": 20 + id,
        "base_experience": if id % 7 == 0 { Value::Null } else { json!(50 + id) },
        "stats": [
            {"base_stat": 40 + id % 20, "stat": {"name": "hp"}},
            {"base_stat": 45, "stat": {"name": "attack"}},
            {"base_stat": 50, "stat": {"name": "defense"}},
            {"base_stat": 60, "stat": {"name": "special-attack"}},
            {"base_stat": 55, "stat": {"name": "special-defense"}},
            {"base_stat": 30 + id % 15, "stat": {"name": "speed"}}
        ],
        "species": {"name": format!("mon-{}", id), "url": url(&format!("pokemon-species/{}", id))},
        "types": types,
        "abilities": [
            {"slot": 1, "is_hidden": false, "ability": {"name": format!("ability-{}", id % ABILITIES)}},
            {"slot": 3, "is_hidden": true, "ability": {"name": format!("ability-{}", (id + 1) % ABILITIES)}}
        ],
        "moves": moves,
        "sprites": {
            "front_default": format!("https://img.dex.test/{}.png", id),
            "front_shiny": null
        }
    })
}

pub fn species(id: u64) -> Value {
    json!({
        "id": id,
        "name": format!("mon-{}", id),
        "capture_rate": 45,
        "base_happiness": if id % 5 == 0 { Value::Null } else { json!(70) },
        "gender_rate": if id % 9 == 0 { -1 } else { 4 },
        "is_legendary": id % 11 == 0,
        "is_mythical": false,
        "generation": {"name": "generation-i", "url": url("generation/1")},
        "egg_groups": [{"name": "monster"}],
        "genera": [{"genus": format!("Test Pokémon {}", id), "language": {"name": "en"}}],
        "flavor_text_entries": [
            {"flavor_text": "Lives in\nthe test\x0csuite.", "language": {"name": "en"}}
        ],
        "evolution_chain": {"url": url(&format!("evolution-chain/{}", id.div_ceil(3)))}
    })
}

/// Chain `c` is mon-(3c-2) -> mon-(3c-1) -> mon-(3c).
pub fn chain(c: u64) -> Value {
    let first = 3 * c - 2;
    let node = |id: u64, level: Option<u64>, evolves_to: Vec<Value>| {
        json!({
            "species": {"name": format!("mon-{}", id), "url": url(&format!("pokemon-species/{}", id))},
            "evolution_details": match level {
                Some(level) => json!([{"min_level": level, "trigger": {"name": "level-up"}}]),
                None => json!([]),
            },
            "evolves_to": evolves_to
        })
    };
    json!({
        "id": c,
        "chain": node(first, None, vec![node(first + 1, Some(16), vec![node(first + 2, Some(32), vec![])])])
    })
}

pub fn type_doc(t: u64) -> Value {
    let target = |offset: u64| json!({"name": format!("type-{}", (t + offset) % TYPES), "url": url(&format!("type/{}", (t + offset) % TYPES))});
    json!({
        "id": t + 1,
        "name": format!("type-{}", t),
        "damage_relations": {
            "double_damage_to": [target(1)],
            "half_damage_to": [target(2)],
            "no_damage_to": [],
            "double_damage_from": [target(4)]
        }
    })
}

pub fn ability(a: u64) -> Value {
    json!({
        "id": a + 1,
        "name": format!("ability-{}", a),
        "effect_entries": [
            {"effect": format!("Effect of ability {}.", a), "short_effect": "Short.", "language": {"name": "en"}}
        ]
    })
}

pub fn move_doc(m: u64) -> Value {
    let status = m % 4 == 0;
    json!({
        "id": m + 1,
        "name": format!("move-{}", m),
        "power": if status { Value::Null } else { json!(10 * (m + 1)) },
        "accuracy": if status { Value::Null } else { json!(100) },
        "pp": 20,
        "damage_class": {"name": if status { "status" } else { "physical" }},
        "type": {"name": format!("type-{}", m % TYPES), "url": url(&format!("type/{}", m % TYPES))},
        "effect_entries": [{"short_effect": "Hits.", "language": {"name": "en"}}]
    })
}

impl ResourceSource for MockApi {
    async fn fetch(&self, key: &ResourceKey) -> Result<Value, FetchError> {
        self.record(key);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(err) = self.injected_failure(key) {
            return Err(err);
        }
        self.document(key).ok_or_else(|| FetchError::Permanent {
            status: Some(404),
            message: format!("no {} in the mock graph", key),
        })
    }

    async fn list(
        &self,
        kind: ResourceKind,
        offset: usize,
        limit: usize,
    ) -> Result<ResourcePage, FetchError> {
        assert_eq!(kind, ResourceKind::Creature);
        let total = self.total as usize;
        let end = total.min(offset + limit);
        let results = (offset..end)
            .map(|i| NamedResource {
                name: format!("mon-{}", i + 1),
                url: url(&format!("pokemon/{}", i + 1)),
            })
            .collect();
        Ok(ResourcePage {
            count: self.total,
            next: (end < total).then(|| format!("{}pokemon/?offset={}&limit={}", BASE, end, limit)),
            results,
        })
    }
}

/// Fast settings for runs against the mock.
pub fn config(root_limit: usize) -> RunConfig {
    RunConfig::from_options([
        ("baseUrl", BASE.to_string()),
        ("rootLimit", root_limit.to_string()),
        ("relatedLimit", "3".to_string()),
        ("rateLimitRPS", "1000".to_string()),
        ("rateLimitBurst", "50".to_string()),
        ("initialBackoffMs", "1".to_string()),
        ("maxBackoffMs", "2".to_string()),
    ])
    .unwrap()
}
