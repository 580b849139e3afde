//! Normalization of raw upstream documents
//!
//! Each document kind has its own normalizer. [`PayloadTransformer`] picks the
//! right one by the payload's key and exposes them through the
//! [`Transformer`] trait.

mod abilities;
mod creature;
mod evolution;
mod moves;
mod raw;
mod species;
mod types;

use crate::error::ValidationError;
use crate::etl::Transformer;
use crate::model::{NormalizedRecordSet, RawPayload, ResourceKind};

/// Transformer from [`RawPayload`] to [`NormalizedRecordSet`]
///
/// # Example
/// ```
/// use pokedex_sync::etl::Transformer;
/// use pokedex_sync::model::{RawPayload, ResourceKey, ResourceKind};
/// use pokedex_sync::transform::PayloadTransformer;
/// use serde_json::json;
///
/// let transformer = PayloadTransformer::new(3);
/// let payload = RawPayload::new(
///     ResourceKey::new(ResourceKind::Type, "fire"),
///     json!({"id": 10, "name": "fire", "damage_relations": {
///         "double_damage_to": [{"name": "grass", "url": ""}]
///     }}),
/// );
///
/// let set = transformer.transform(&payload).unwrap();
/// assert_eq!(set.type_efficacy[0].damage_factor, 200);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PayloadTransformer {
    moves_per_creature: usize,
}

impl PayloadTransformer {
    /// Create a transformer keeping the first `moves_per_creature` moves of
    /// each creature. Use the same limit the extractor follows.
    pub fn new(moves_per_creature: usize) -> Self {
        Self { moves_per_creature }
    }

    /// Normalize one payload.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when the document's own entity is
    /// invalid. Errors in nested entries are collected in the returned set.
    pub fn normalize(&self, payload: &RawPayload) -> Result<NormalizedRecordSet, ValidationError> {
        let key = &payload.key;
        let body = &payload.body;
        let set = match key.kind {
            ResourceKind::Creature => creature::normalize(key, body, self.moves_per_creature),
            ResourceKind::Species => species::normalize(key, body),
            ResourceKind::EvolutionChain => evolution::normalize(key, body),
            ResourceKind::Type => types::normalize(key, body),
            ResourceKind::Ability => abilities::normalize(key, body),
            ResourceKind::Move => moves::normalize(key, body),
        }?;

        for warning in &set.warnings {
            log::debug!("{}: {}", warning.entity, warning.message);
        }
        Ok(set)
    }
}

impl Default for PayloadTransformer {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Transformer for PayloadTransformer {
    type Input = RawPayload;
    type Output = NormalizedRecordSet;
    type Error = ValidationError;

    fn transform(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
        self.normalize(input)
    }
}
