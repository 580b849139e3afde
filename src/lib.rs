//! Pokedex Sync
//!
//! A rate-limited ETL that mirrors the PokeAPI resource graph (creatures and
//! the species, evolution chains, types, abilities and moves they reference)
//! into a relational store.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod etl;
pub mod model;
pub mod pokeapi;
pub mod storage;
pub mod transform;

// Re-exports for convenience
pub use client::{PokeApiClient, ResourceSource};
pub use config::RunConfig;
pub use etl::{Extractor, Loader, Pipeline, RunReport, RunStatus, Transformer};
pub use pokeapi::GraphExtractor;
pub use storage::{Store, StoreLoader};
pub use transform::PayloadTransformer;
