//! Run-scoped deduplication of fetched resources

use crate::model::ResourceKey;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Keys already scheduled for fetching during the current run.
///
/// A key is claimed at most once, so concurrent workers discovering the same
/// sub-resource never fetch it twice.
#[derive(Debug, Default)]
pub struct SeenSet {
    keys: Mutex<HashSet<ResourceKey>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns `true` only for the first claim.
    pub fn claim(&self, key: &ResourceKey) -> bool {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if keys.contains(key) {
            return false;
        }
        keys.insert(key.clone())
    }

    /// Claim several keys under one lock, returning those not seen before in
    /// their original order.
    pub fn claim_new(&self, candidates: impl IntoIterator<Item = ResourceKey>) -> Vec<ResourceKey> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        candidates
            .into_iter()
            .filter(|key| keys.insert(key.clone()))
            .collect()
    }

    /// Forget `keys` so a later claim succeeds again. Used when the batch
    /// that fetched them was never committed.
    pub fn release<'a>(&self, released: impl IntoIterator<Item = &'a ResourceKey>) -> usize {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        released.into_iter().filter(|key| keys.remove(*key)).count()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
