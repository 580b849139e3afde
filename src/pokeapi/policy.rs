//! Which sub-resources a fetched document pulls in

use crate::model::{ResourceKey, ResourceKind};
use serde_json::Value;
use std::collections::BTreeSet;

/// Related-resource policy for the graph walk.
///
/// From a creature the walk follows its species, types, abilities and the
/// first `moves_per_creature` moves. From a species it follows the evolution
/// chain, and from a move its type. Kinds missing from `follow` are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedPolicy {
    pub follow: BTreeSet<ResourceKind>,
    pub moves_per_creature: usize,
}

impl Default for RelatedPolicy {
    fn default() -> Self {
        Self {
            follow: [
                ResourceKind::Species,
                ResourceKind::EvolutionChain,
                ResourceKind::Type,
                ResourceKind::Ability,
                ResourceKind::Move,
            ]
            .into_iter()
            .collect(),
            moves_per_creature: 3,
        }
    }
}

impl RelatedPolicy {
    pub fn follows(&self, kind: ResourceKind) -> bool {
        self.follow.contains(&kind)
    }

    /// Sub-resource keys referenced by `body`, the document fetched for `key`.
    ///
    /// Malformed or missing references are ignored here; the transformer
    /// reports them.
    pub fn children_of(&self, key: &ResourceKey, body: &Value) -> Vec<ResourceKey> {
        let mut children = Vec::new();
        match key.kind {
            ResourceKind::Creature => {
                if self.follows(ResourceKind::Species) {
                    children.extend(named(ResourceKind::Species, &body["species"]));
                }
                if self.follows(ResourceKind::Type) {
                    children.extend(
                        entries(body, "types")
                            .filter_map(|slot| named(ResourceKind::Type, &slot["type"])),
                    );
                }
                if self.follows(ResourceKind::Ability) {
                    children.extend(
                        entries(body, "abilities")
                            .filter_map(|slot| named(ResourceKind::Ability, &slot["ability"])),
                    );
                }
                if self.follows(ResourceKind::Move) {
                    children.extend(
                        entries(body, "moves")
                            .take(self.moves_per_creature)
                            .filter_map(|entry| named(ResourceKind::Move, &entry["move"])),
                    );
                }
            }
            ResourceKind::Species => {
                if self.follows(ResourceKind::EvolutionChain) {
                    children.extend(
                        body["evolution_chain"]["url"]
                            .as_str()
                            .and_then(|url| ResourceKey::from_url(ResourceKind::EvolutionChain, url)),
                    );
                }
            }
            ResourceKind::Move => {
                if self.follows(ResourceKind::Type) {
                    children.extend(named(ResourceKind::Type, &body["type"]));
                }
            }
            ResourceKind::EvolutionChain | ResourceKind::Type | ResourceKind::Ability => {}
        }
        children
    }
}

fn entries<'a>(body: &'a Value, field: &str) -> impl Iterator<Item = &'a Value> {
    body[field].as_array().into_iter().flatten()
}

fn named(kind: ResourceKind, reference: &Value) -> Option<ResourceKey> {
    reference["name"]
        .as_str()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| ResourceKey::new(kind, name.to_lowercase()))
}
