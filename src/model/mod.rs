//! Canonical entity model
//!
//! Storage-independent records produced by the transformers and consumed by
//! the loader, plus the resource keys used to address upstream documents.

mod batch;
mod entities;
mod key;
mod raw;
mod record_set;

pub use batch::RecordBatch;
pub use entities::{
    Ability, BaseStats, Creature, CreatureAbility, CreatureMove, CreatureType, DamageClass,
    EvolutionChain, EvolutionLink, LearnMethod, Move, Species, TypeEfficacy, TypeRecord,
};
pub use key::{ResourceKey, ResourceKind};
pub use raw::RawPayload;
pub use record_set::{NormalizedRecordSet, ValidationWarning};
