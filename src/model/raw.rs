//! Fetched upstream documents

use super::key::ResourceKey;
use serde_json::Value;

/// One JSON document exactly as the API returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub key: ResourceKey,
    pub body: Value,
}

impl RawPayload {
    pub fn new(key: ResourceKey, body: Value) -> Self {
        Self { key, body }
    }
}
