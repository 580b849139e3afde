//! Upstream API access
//!
//! [`ResourceSource`] is the seam between the extractor and the remote API.
//! [`PokeApiClient`] is the HTTP implementation; tests substitute an
//! in-memory source.

mod pokeapi;

pub use pokeapi::{PokeApiClient, classify_status};

use crate::error::FetchError;
use crate::model::{ResourceKey, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;

/// `{name, url}` reference as it appears in listings and nested documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedResource {
    pub name: String,
    pub url: String,
}

/// One page of a listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePage {
    pub count: u64,
    pub next: Option<String>,
    #[serde(default)]
    pub results: Vec<NamedResource>,
}

/// Read-only access to the upstream resource graph.
///
/// Implementations report failures as [`FetchError`] so the caller can decide
/// whether to retry. Neither method retries or rate limits on its own.
pub trait ResourceSource: Send + Sync + 'static {
    /// Fetch the detail document for one resource.
    fn fetch(&self, key: &ResourceKey) -> impl Future<Output = Result<Value, FetchError>> + Send;

    /// Fetch one page of the listing for `kind`.
    fn list(
        &self,
        kind: ResourceKind,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<ResourcePage, FetchError>> + Send;
}
