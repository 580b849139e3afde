//! Run progress and the final run report

use super::{FetchReport, LoadReport, SkippedRelation};
use crate::error::{FailureKind, FetchError, PersistenceError, ValidationError};
use crate::model::{ResourceKey, ResourceKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

/// Stage a failure was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Discover,
    Extract,
    Transform,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "discover",
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::Load => "load",
        };
        f.write_str(name)
    }
}

/// Running totals, published after every stage of every batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub roots: usize,
    pub fetched: usize,
    pub fetch_failed: usize,
    pub transformed: usize,
    pub transform_failed: usize,
    /// Record sets in committed batches
    pub loaded: usize,
    /// Record sets in rolled-back batches
    pub load_failed: usize,
    pub creatures_loaded: usize,
    pub rows_written: usize,
    pub batches_committed: usize,
    pub batches_failed: usize,
}

/// Final outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status")]
pub enum RunStatus {
    /// Every resource was fetched, normalized and committed.
    Success,
    /// The run finished but some resources or batches failed.
    PartialSuccess,
    /// The run stopped early.
    Failed { cause: String },
}

impl RunStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("Success"),
            Self::PartialSuccess => f.write_str("PartialSuccess"),
            Self::Failed { cause } => write!(f, "Failed ({})", cause),
        }
    }
}

/// One failed resource, with enough context to retry just that resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub resource: String,
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
    /// Batch the resource belonged to; absent for run-level failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<usize>,
}

impl FailureRecord {
    pub fn fetch(key: &ResourceKey, attempts: u32, error: &FetchError, batch: usize) -> Self {
        Self {
            resource: key.to_string(),
            stage: Stage::Extract,
            kind: error.kind(),
            message: error.to_string(),
            attempts,
            batch: Some(batch),
        }
    }

    pub fn validation(error: &ValidationError, batch: usize) -> Self {
        Self {
            resource: error.entity.clone(),
            stage: Stage::Transform,
            kind: FailureKind::Validation,
            message: format!("{}: {}", error.field, error.message),
            attempts: 1,
            batch: Some(batch),
        }
    }

    pub fn persistence(resource: &ResourceKey, error: &PersistenceError, attempts: u32, batch: usize) -> Self {
        Self {
            resource: resource.to_string(),
            stage: Stage::Load,
            kind: FailureKind::Persistence,
            message: error.to_string(),
            attempts,
            batch: Some(batch),
        }
    }

    /// Creature id, when the failed resource is a creature.
    pub fn creature_id(&self) -> Option<i64> {
        let (kind, id) = self.resource.split_once('/')?;
        if kind == ResourceKind::Creature.path() {
            id.parse().ok()
        } else {
            None
        }
    }
}

/// What happened to one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub index: usize,
    pub roots: usize,
    pub fetched: usize,
    pub fetch_failed: usize,
    pub transformed: usize,
    pub transform_failed: usize,
    pub committed: bool,
    pub rows_written: usize,
    pub creatures_loaded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured summary of a run, suitable for logs and monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub status: RunStatus,
    pub counts: StageCounts,
    pub batches: Vec<BatchSummary>,
    pub failures: Vec<FailureRecord>,
    pub skipped_relations: Vec<SkippedRelation>,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Share of attempted roots that ended up committed, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.counts.roots == 0 {
            return 0.0;
        }
        self.counts.creatures_loaded as f64 * 100.0 / self.counts.roots as f64
    }

    /// Ids of root creatures that failed in any stage, sorted.
    pub fn failed_creatures(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .failures
            .iter()
            .filter_map(FailureRecord::creature_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn failures_in(&self, stage: Stage) -> impl Iterator<Item = &FailureRecord> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Accumulates counts, batch summaries and failures while a run progresses.
///
/// It also remembers which roots failed for a reason that may not repeat
/// (a transient fetch error, a rolled-back batch, a relation lost to either)
/// so the run can give them one more pass.
#[derive(Debug, Default)]
pub(crate) struct RunTracker {
    counts: StageCounts,
    batches: Vec<BatchSummary>,
    failures: Vec<FailureRecord>,
    skipped: Vec<SkippedRelation>,
    loaded: BTreeSet<i64>,
    retry_roots: BTreeSet<ResourceKey>,
    refetch: BTreeSet<ResourceKey>,
    /// Keys whose absence from the store may be temporary, by display form
    recoverable: HashMap<String, FailureKind>,
}

impl RunTracker {
    pub fn counts(&self) -> StageCounts {
        self.counts
    }

    pub fn discovered(&mut self, roots: usize) {
        self.counts.roots += roots;
    }

    pub fn discovery_failed(&mut self, error: &FetchError, attempts: u32) {
        self.failures.push(FailureRecord {
            resource: format!("{} listing", ResourceKind::Creature),
            stage: Stage::Discover,
            kind: error.kind(),
            message: error.to_string(),
            attempts,
            batch: None,
        });
    }

    pub fn extracted(&mut self, batch: &mut BatchSummary, report: &FetchReport) {
        batch.fetched = report.fetched();
        batch.fetch_failed = report.failed();
        self.counts.fetched += batch.fetched;
        self.counts.fetch_failed += batch.fetch_failed;

        // A key fetched now no longer counts as a transient failure
        for key in report.fetched_keys() {
            let resource = key.to_string();
            self.failures
                .retain(|f| !(f.kind == FailureKind::TransientFetch && f.resource == resource));
            self.recoverable.remove(&resource);
        }

        for (key, attempts, error) in report.failures() {
            self.failures
                .push(FailureRecord::fetch(key, attempts, error, batch.index));
            if error.is_transient() {
                self.recoverable.insert(key.to_string(), FailureKind::TransientFetch);
                if key.kind == ResourceKind::Creature {
                    self.retry_roots.insert(key.clone());
                } else {
                    self.refetch.insert(key.clone());
                }
            }
        }
    }

    /// Record a payload rejected outright, or an entity dropped from an
    /// otherwise valid payload.
    pub fn invalid(&mut self, batch: &mut BatchSummary, error: &ValidationError, whole_payload: bool) {
        if whole_payload {
            batch.transform_failed += 1;
            self.counts.transform_failed += 1;
        }
        self.failures.push(FailureRecord::validation(error, batch.index));
    }

    pub fn transformed(&mut self, batch: &mut BatchSummary) {
        batch.transformed += 1;
        self.counts.transformed += 1;
    }

    /// Record a committed batch.
    ///
    /// Earlier recoverable failures of the committed creatures are cleared.
    /// A creature that lost a relation because its target is only missing
    /// for now is reported as failed and queued for another pass.
    pub fn committed(&mut self, batch: &mut BatchSummary, report: LoadReport) {
        batch.committed = true;
        batch.rows_written = report.rows_written();
        batch.creatures_loaded = report.creatures.len();
        self.counts.loaded += batch.transformed;
        self.counts.rows_written += batch.rows_written;
        self.counts.batches_committed += 1;

        let committed: BTreeSet<i64> = report.creatures.iter().copied().collect();
        self.failures.retain(|f| {
            !(is_recoverable(f.kind) && f.creature_id().is_some_and(|id| committed.contains(&id)))
        });
        self.skipped
            .retain(|s| !skipped_creature(s).is_some_and(|id| committed.contains(&id)));
        self.loaded.extend(committed);
        self.counts.creatures_loaded = self.loaded.len();

        let mut incomplete = BTreeMap::new();
        for relation in &report.skipped {
            let Some(kind) = self.recoverable.get(&relation.missing) else {
                continue;
            };
            if let Some(id) = skipped_creature(relation) {
                incomplete.entry(id).or_insert((*kind, relation.missing.clone()));
            }
        }
        for (id, (kind, missing)) in incomplete {
            let root = ResourceKey::creature(id);
            self.failures.push(FailureRecord {
                resource: root.to_string(),
                stage: Stage::Load,
                kind,
                message: format!("relation to {} skipped, it was not in the store", missing),
                attempts: 1,
                batch: Some(batch.index),
            });
            self.retry_roots.insert(root);
        }
        self.skipped.extend(report.skipped);
    }

    /// Record a rolled-back batch. Every root of the batch is reported so it
    /// can be retried on its own, and `released` are the keys the batch had
    /// fetched, now missing from the store.
    pub fn load_failed(
        &mut self,
        batch: &mut BatchSummary,
        roots: &[ResourceKey],
        released: &[ResourceKey],
        error: &PersistenceError,
        attempts: u32,
    ) {
        batch.committed = false;
        batch.error = Some(error.to_string());
        self.counts.load_failed += batch.transformed;
        self.counts.batches_failed += 1;
        for root in roots {
            self.failures
                .push(FailureRecord::persistence(root, error, attempts, batch.index));
            self.retry_roots.insert(root.clone());
        }
        for key in released {
            self.recoverable
                .entry(key.to_string())
                .or_insert(FailureKind::Persistence);
        }
    }

    pub fn finish_batch(&mut self, batch: BatchSummary) {
        self.batches.push(batch);
    }

    /// Roots to give another pass, and every key that must be fetchable
    /// again for them. Both sets are emptied.
    pub fn take_retry(&mut self) -> (Vec<ResourceKey>, Vec<ResourceKey>) {
        let roots: Vec<ResourceKey> = std::mem::take(&mut self.retry_roots).into_iter().collect();
        let release = roots
            .iter()
            .cloned()
            .chain(std::mem::take(&mut self.refetch))
            .collect();
        (roots, release)
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn into_report(self, status: RunStatus, elapsed: Duration) -> RunReport {
        RunReport {
            status,
            counts: self.counts,
            batches: self.batches,
            failures: self.failures,
            skipped_relations: self.skipped,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

fn is_recoverable(kind: FailureKind) -> bool {
    matches!(kind, FailureKind::TransientFetch | FailureKind::Persistence)
}

/// Creature a skipped relation row belonged to.
fn skipped_creature(relation: &SkippedRelation) -> Option<i64> {
    match relation.table {
        "creature_moves" | "creatures.species_name" => {
            relation.row.split('/').next()?.parse().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(RunStatus::PartialSuccess).unwrap();
        assert_eq!(json["status"], "PartialSuccess");

        let json = serde_json::to_value(RunStatus::Failed {
            cause: "cancelled".into(),
        }).unwrap();
        assert_eq!(json["status"], "Failed");
        assert_eq!(json["cause"], "cancelled");
    }

    #[test]
    fn test_report_lists_failed_creatures() {
        let mut tracker = RunTracker::default();
        tracker.discovered(3);
        let mut batch = BatchSummary::default();

        let mut fetches = FetchReport::default();
        fetches.record_failure(
            ResourceKey::creature(7),
            1,
            FetchError::Permanent {
                status: Some(404),
                message: "Not Found".into(),
            },
        );
        fetches.record_failure(
            ResourceKey::new(ResourceKind::Move, "cut"),
            4,
            FetchError::transient("timeout"),
        );
        fetches.record_success(ResourceKey::creature(1), 1);
        tracker.extracted(&mut batch, &fetches);
        tracker.finish_batch(batch);

        let report = tracker.into_report(RunStatus::PartialSuccess, Duration::from_millis(5));
        assert_eq!(report.failed_creatures(), vec![7]);
        assert_eq!(report.counts.fetch_failed, 2);
        assert_eq!(report.failures_in(Stage::Extract).count(), 2);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "PartialSuccess");
        assert_eq!(json["failures"][0]["kind"], "PermanentFetchError");
        assert_eq!(json["failures"][0]["resource"], "pokemon/7");
        assert_eq!(json["failures"][0]["stage"], "extract");
    }

    fn committed_report(ids: &[i64]) -> LoadReport {
        LoadReport {
            creatures: ids.to_vec(),
            ..LoadReport::default()
        }
    }

    #[test]
    fn test_relation_lost_to_rollback_fails_creature() {
        let mut tracker = RunTracker::default();
        let tackle = ResourceKey::new(ResourceKind::Move, "tackle");
        let error = PersistenceError::Worker("boom".into());

        let mut first = BatchSummary::default();
        tracker.load_failed(&mut first, &[ResourceKey::creature(1)], &[tackle.clone()], &error, 1);

        let mut second = BatchSummary {
            index: 1,
            ..BatchSummary::default()
        };
        let mut load = committed_report(&[2]);
        load.skip("creature_moves", "2/tackle/level-up", "move/tackle");
        load.skip("creature_moves", "2/growl/egg", "move/growl");
        tracker.committed(&mut second, load);

        let report_failures: Vec<_> = tracker
            .failures
            .iter()
            .filter(|f| f.stage == Stage::Load)
            .map(|f| (f.resource.clone(), f.kind))
            .collect();
        assert_eq!(
            report_failures,
            vec![
                ("pokemon/1".to_string(), FailureKind::Persistence),
                ("pokemon/2".to_string(), FailureKind::Persistence),
            ]
        );

        let (roots, release) = tracker.take_retry();
        assert_eq!(roots, vec![ResourceKey::creature(1), ResourceKey::creature(2)]);
        assert_eq!(release, roots);
        assert!(tracker.take_retry().0.is_empty());
    }

    #[test]
    fn test_recovered_roots_clear_their_failures() {
        let mut tracker = RunTracker::default();
        let mut first = BatchSummary::default();
        let mut fetches = FetchReport::default();
        fetches.record_failure(ResourceKey::creature(3), 4, FetchError::transient("503"));
        fetches.record_failure(
            ResourceKey::new(ResourceKind::Move, "cut"),
            4,
            FetchError::transient("503"),
        );
        tracker.extracted(&mut first, &fetches);
        tracker.committed(&mut first, committed_report(&[]));

        let (roots, release) = tracker.take_retry();
        assert_eq!(roots, vec![ResourceKey::creature(3)]);
        assert_eq!(release.len(), 2);

        let mut retry = BatchSummary {
            index: 1,
            ..BatchSummary::default()
        };
        let mut fetches = FetchReport::default();
        fetches.record_success(ResourceKey::creature(3), 1);
        fetches.record_success(ResourceKey::new(ResourceKind::Move, "cut"), 1);
        tracker.extracted(&mut retry, &fetches);
        tracker.committed(&mut retry, committed_report(&[3]));

        assert!(!tracker.has_failures());
        assert_eq!(tracker.counts().creatures_loaded, 1);
        assert_eq!(tracker.counts().fetch_failed, 2);
    }

    #[test]
    fn test_permanent_failures_are_not_retried() {
        let mut tracker = RunTracker::default();
        let mut batch = BatchSummary::default();
        let mut fetches = FetchReport::default();
        fetches.record_failure(ResourceKey::creature(7), 1, FetchError::permanent("404"));
        tracker.extracted(&mut batch, &fetches);

        assert!(tracker.take_retry().0.is_empty());
        assert!(tracker.has_failures());
    }

    #[test]
    fn test_success_rate() {
        let mut tracker = RunTracker::default();
        tracker.discovered(20);
        let mut report = tracker.into_report(RunStatus::PartialSuccess, Duration::ZERO);
        report.counts.creatures_loaded = 19;
        assert!((report.success_rate() - 95.0).abs() < f64::EPSILON);
    }
}
