//! Extractor trait and the per-batch fetch report

use crate::error::{Cancelled, FetchError};
use crate::model::ResourceKey;
use std::collections::BTreeMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Extractor trait for walking an upstream resource graph
///
/// A run opens one [`Extractor::Session`] and passes it to every call. The
/// session carries the state that must live exactly as long as the run, such
/// as the set of resources already fetched.
///
/// # Example
/// ```no_run
/// use pokedex_sync::error::{Cancelled, FetchError};
/// use pokedex_sync::etl::{Extraction, Extractor};
/// use pokedex_sync::model::ResourceKey;
/// use tokio_util::sync::CancellationToken;
///
/// struct FixedRoots(Vec<ResourceKey>);
///
/// impl Extractor for FixedRoots {
///     type Item = ResourceKey;
///     type Session = ();
///
///     fn start_session(&self) -> Self::Session {}
///
///     async fn discover_roots(
///         &self,
///         _session: &(),
///         offset: usize,
///         limit: usize,
///     ) -> Result<Vec<ResourceKey>, FetchError> {
///         Ok(self.0.iter().skip(offset).take(limit).cloned().collect())
///     }
///
///     async fn extract(
///         &self,
///         _session: &(),
///         roots: Vec<ResourceKey>,
///         _cancel: &CancellationToken,
///     ) -> Result<Extraction<ResourceKey>, Cancelled> {
///         Ok(Extraction::new(roots, Default::default()))
///     }
/// }
/// ```
pub trait Extractor: Send + Sync {
    /// The type of items extracted
    type Item: Send;

    /// Run-scoped state shared by all batches of one run
    type Session: Send + Sync;

    fn start_session(&self) -> Self::Session;

    /// List up to `limit` root keys starting at `offset`.
    ///
    /// # Errors
    /// Returns the fetch error that prevented listing.
    fn discover_roots(
        &self,
        session: &Self::Session,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ResourceKey>, FetchError>> + Send;

    /// Fetch `roots` and everything they reference.
    ///
    /// Per-resource failures are recorded in the returned report rather than
    /// failing the call. In-flight work is abandoned on cancellation.
    ///
    /// # Errors
    /// Returns [`Cancelled`] if `cancel` fires before the batch completes.
    fn extract(
        &self,
        session: &Self::Session,
        roots: Vec<ResourceKey>,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Extraction<Self::Item>, Cancelled>> + Send;

    /// Make `keys` fetchable again within `session`.
    ///
    /// Called for the resources of a batch that was rolled back, and for
    /// roots given another attempt. Extractors without run-scoped
    /// deduplication have nothing to forget.
    fn release(&self, _session: &Self::Session, _keys: &[ResourceKey]) {}
}

/// Items fetched for one batch and how every attempted key fared.
#[derive(Debug, Clone)]
pub struct Extraction<T> {
    pub items: Vec<T>,
    pub report: FetchReport,
}

impl<T> Extraction<T> {
    pub fn new(items: Vec<T>, report: FetchReport) -> Self {
        Self { items, report }
    }
}

/// Final state of one attempted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub attempts: u32,
    pub error: Option<FetchError>,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of every key attempted in one extraction, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    outcomes: BTreeMap<ResourceKey, FetchOutcome>,
}

impl FetchReport {
    pub fn record_success(&mut self, key: ResourceKey, attempts: u32) {
        self.outcomes.insert(
            key,
            FetchOutcome {
                attempts,
                error: None,
            },
        );
    }

    pub fn record_failure(&mut self, key: ResourceKey, attempts: u32, error: FetchError) {
        self.outcomes.insert(
            key,
            FetchOutcome {
                attempts,
                error: Some(error),
            },
        );
    }

    pub fn outcome(&self, key: &ResourceKey) -> Option<&FetchOutcome> {
        self.outcomes.get(key)
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn fetched(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.fetched()
    }

    /// Keys fetched successfully.
    pub fn fetched_keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_success())
            .map(|(key, _)| key)
    }

    /// Failed keys with their attempt counts and final errors.
    pub fn failures(&self) -> impl Iterator<Item = (&ResourceKey, u32, &FetchError)> {
        self.outcomes
            .iter()
            .filter_map(|(key, o)| o.error.as_ref().map(|e| (key, o.attempts, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKind;

    #[test]
    fn test_fetch_report_counts() {
        let mut report = FetchReport::default();
        report.record_success(ResourceKey::creature(1), 1);
        report.record_success(ResourceKey::new(ResourceKind::Type, "grass"), 2);
        report.record_failure(
            ResourceKey::new(ResourceKind::Move, "cut"),
            4,
            FetchError::transient("timeout"),
        );

        assert_eq!(report.attempted(), 3);
        assert_eq!(report.fetched(), 2);
        assert_eq!(report.failed(), 1);

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.to_string(), "move/cut");
        assert_eq!(failures[0].1, 4);
        assert_eq!(
            report
                .outcome(&ResourceKey::new(ResourceKind::Type, "grass"))
                .map(|o| o.attempts),
            Some(2)
        );
    }
}
