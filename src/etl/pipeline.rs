//! Pipeline orchestration for ETL operations

use super::report::{BatchSummary, RunReport, RunStatus, RunTracker, StageCounts};
use super::{Extractor, Loader, Transformer};
use crate::config::{BatchFailurePolicy, PipelineMode, RunConfig};
use crate::error::{ConfigError, PersistenceError, ValidationError};
use crate::model::{NormalizedRecordSet, RawPayload, ResourceKey};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const CANCELLED: &str = "cancelled";

/// ETL Pipeline that orchestrates Extract, Transform, and Load operations
///
/// Roots are discovered once, split into batches of `batchSize`, and every
/// batch is fetched, normalized and committed as a unit. In
/// [`PipelineMode::Pipelined`] the three stages work on different batches at
/// the same time, connected by bounded queues of `queueDepth` batches.
///
/// # Type Parameters
/// - `E`: Extractor producing raw payloads
/// - `T`: Transformer normalizing payloads into record sets
/// - `L`: Loader committing record sets
///
/// # Example
/// ```no_run
/// use pokedex_sync::client::PokeApiClient;
/// use pokedex_sync::config::RunConfig;
/// use pokedex_sync::etl::Pipeline;
/// use pokedex_sync::pokeapi::GraphExtractor;
/// use pokedex_sync::storage::{Store, StoreLoader};
/// use pokedex_sync::transform::PayloadTransformer;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> eyre::Result<()> {
/// let config = RunConfig::default();
/// let client = Arc::new(PokeApiClient::try_new(config.base_url.clone(), config.request_timeout)?);
/// let store = Arc::new(Store::open(&config.database)?);
///
/// let pipeline = Pipeline::try_new(
///     config.clone(),
///     GraphExtractor::new(client, &config),
///     PayloadTransformer::new(config.related_limit),
///     StoreLoader::new(store),
/// )?;
///
/// let report = pipeline.run(&CancellationToken::new()).await;
/// println!("{}: {} creature(s) loaded", report.status, report.counts.creatures_loaded);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<E, T, L> {
    config: RunConfig,
    extractor: E,
    transformer: T,
    loader: L,
    progress: watch::Sender<StageCounts>,
}

/// A batch on its way through the stages.
struct InFlight<I> {
    summary: BatchSummary,
    roots: Vec<ResourceKey>,
    /// Keys the batch fetched, released again if it is rolled back
    fetched: Vec<ResourceKey>,
    items: Vec<I>,
}

/// Tracker shared by the stages; every update is published to subscribers.
struct Progress<'a> {
    tracker: Mutex<RunTracker>,
    sender: &'a watch::Sender<StageCounts>,
}

impl<'a> Progress<'a> {
    fn new(sender: &'a watch::Sender<StageCounts>) -> Self {
        sender.send_replace(StageCounts::default());
        Self {
            tracker: Mutex::new(RunTracker::default()),
            sender,
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut RunTracker) -> R) -> R {
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut tracker);
        self.sender.send_replace(tracker.counts());
        result
    }

    fn finish(self, status: RunStatus, started: Instant) -> RunReport {
        let tracker = self
            .tracker
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        tracker.into_report(status, started.elapsed())
    }
}

impl<E, T, L> Pipeline<E, T, L>
where
    E: Extractor<Item = RawPayload>,
    T: Transformer<Input = RawPayload, Output = NormalizedRecordSet, Error = ValidationError>,
    L: Loader<Item = NormalizedRecordSet>,
{
    /// Create a new pipeline
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if `config` does not validate. Nothing has
    /// been fetched or written at that point.
    pub fn try_new(config: RunConfig, extractor: E, transformer: T, loader: L) -> Result<Self, ConfigError> {
        config.validate()?;
        let (progress, _) = watch::channel(StageCounts::default());
        Ok(Self {
            config,
            extractor,
            transformer,
            loader,
            progress,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Watch the running stage counts.
    pub fn subscribe(&self) -> watch::Receiver<StageCounts> {
        self.progress.subscribe()
    }

    /// Run the complete ETL pipeline
    ///
    /// Steps:
    /// 1. Discover `rootLimit` roots from `offset`
    /// 2. Extract, transform and load them batch by batch
    /// 3. Report what happened
    ///
    /// Resource-level failures are recorded and the run goes on. With
    /// `retryFailed`, roots that failed for a recoverable reason get one more
    /// pass once every batch has been through. The run stops with
    /// [`RunStatus::Failed`] when `cancel` fires, when the store becomes
    /// unusable, or when a batch fails under [`BatchFailurePolicy::Abort`].
    /// Batches committed before that stay committed.
    pub async fn run(&self, cancel: &CancellationToken) -> RunReport {
        let started = Instant::now();
        let progress = Progress::new(&self.progress);
        log::info!(
            "Starting ETL run: {} root(s) from offset {}, batches of {}, {:?} mode",
            self.config.root_limit,
            self.config.offset,
            self.config.batch_size,
            self.config.pipeline_mode
        );

        let session = self.extractor.start_session();
        let roots = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            listed = self.extractor.discover_roots(&session, self.config.offset, self.config.root_limit) => Some(listed),
        };
        let roots = match roots {
            None => return self.finish(progress, failed(CANCELLED), started),
            Some(Err(e)) => {
                log::error!("Failed to discover roots: {}", e);
                let attempts = if e.is_transient() {
                    self.config.max_retries + 1
                } else {
                    1
                };
                let cause = format!("root discovery failed: {}", e);
                progress.update(|t| t.discovery_failed(&e, attempts));
                return self.finish(progress, failed(cause), started);
            }
            Some(Ok(roots)) => roots,
        };

        progress.update(|t| t.discovered(roots.len()));
        if roots.is_empty() {
            log::warn!("No roots found from offset {}, nothing to do", self.config.offset);
        }

        let batches: Vec<Vec<ResourceKey>> = roots
            .chunks(self.config.batch_size)
            .map(<[ResourceKey]>::to_vec)
            .collect();

        let batch_count = batches.len();
        let stopped = match self.config.pipeline_mode {
            PipelineMode::Sequential => self.run_sequential(&session, batches, 0, &progress, cancel).await,
            PipelineMode::Pipelined => self.run_pipelined(&session, batches, &progress, cancel).await,
        };
        let stopped = match stopped {
            None if self.config.retry_failed && !cancel.is_cancelled() => {
                self.retry_failed(&session, batch_count, &progress, cancel).await
            }
            stopped => stopped,
        };

        let status = match stopped {
            Some(status) => status,
            None if cancel.is_cancelled() => failed(CANCELLED),
            None if progress.update(|t| t.has_failures()) => RunStatus::PartialSuccess,
            None => RunStatus::Success,
        };
        self.finish(progress, status, started)
    }

    fn finish(&self, progress: Progress<'_>, status: RunStatus, started: Instant) -> RunReport {
        let report = progress.finish(status, started);
        let counts = &report.counts;
        match &report.status {
            RunStatus::Failed { cause } => log::error!(
                "ETL run failed ({}): {} of {} creature(s) loaded",
                cause,
                counts.creatures_loaded,
                counts.roots
            ),
            status => log::info!(
                "ETL run finished with {}: {} of {} creature(s) loaded, {} failure(s)",
                status,
                counts.creatures_loaded,
                counts.roots,
                report.failures.len()
            ),
        }
        report
    }

    /// One batch at a time, numbered from `first_index`. Returns the status
    /// to stop with, if any.
    async fn run_sequential(
        &self,
        session: &E::Session,
        batches: Vec<Vec<ResourceKey>>,
        first_index: usize,
        progress: &Progress<'_>,
        cancel: &CancellationToken,
    ) -> Option<RunStatus> {
        let total = first_index + batches.len();
        for (offset, roots) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Some(failed(CANCELLED));
            }
            let index = first_index + offset;
            let Some(batch) = self.extract_batch(session, index, roots, progress, cancel).await else {
                return Some(failed(CANCELLED));
            };
            let batch = self.transform_batch(batch, progress);
            if cancel.is_cancelled() {
                return Some(failed(CANCELLED));
            }
            if let Some(status) = self.load_batch(session, batch, total, progress, cancel).await {
                return Some(status);
            }
        }
        None
    }

    /// Give roots that failed for a recoverable reason one more pass, each
    /// in its own batch so one bad root cannot roll back the others. Retry
    /// batches are numbered after the regular ones.
    async fn retry_failed(
        &self,
        session: &E::Session,
        first_index: usize,
        progress: &Progress<'_>,
        cancel: &CancellationToken,
    ) -> Option<RunStatus> {
        let (roots, release) = progress.update(RunTracker::take_retry);
        if roots.is_empty() {
            return None;
        }
        log::info!("Retrying {} root(s) that failed in a recoverable way", roots.len());
        self.extractor.release(session, &release);

        let batches = roots.into_iter().map(|root| vec![root]).collect();
        self.run_sequential(session, batches, first_index, progress, cancel).await
    }

    /// All three stages at once, joined by bounded queues. The load stage
    /// decides when to stop and cancels the upstream stages through a child
    /// token; every queue operation also watches that token, so a stage
    /// blocked on a full queue is released when a downstream stage stops.
    async fn run_pipelined(
        &self,
        session: &E::Session,
        batches: Vec<Vec<ResourceKey>>,
        progress: &Progress<'_>,
        cancel: &CancellationToken,
    ) -> Option<RunStatus> {
        let total = batches.len();
        let stop = cancel.child_token();
        let (fetched_tx, mut fetched_rx) = mpsc::channel::<InFlight<RawPayload>>(self.config.queue_depth);
        let (normalized_tx, mut normalized_rx) =
            mpsc::channel::<InFlight<NormalizedRecordSet>>(self.config.queue_depth);

        let extract = async {
            for (index, roots) in batches.into_iter().enumerate() {
                if stop.is_cancelled() {
                    break;
                }
                let Some(batch) = self.extract_batch(session, index, roots, progress, &stop).await else {
                    break;
                };
                let sent = tokio::select! {
                    biased;
                    _ = stop.cancelled() => false,
                    sent = fetched_tx.send(batch) => sent.is_ok(),
                };
                if !sent {
                    break;
                }
            }
            drop(fetched_tx);
        };

        let transform = async {
            loop {
                let received = tokio::select! {
                    biased;
                    _ = stop.cancelled() => None,
                    received = fetched_rx.recv() => received,
                };
                let Some(batch) = received else {
                    break;
                };
                let batch = self.transform_batch(batch, progress);
                let sent = tokio::select! {
                    biased;
                    _ = stop.cancelled() => false,
                    sent = normalized_tx.send(batch) => sent.is_ok(),
                };
                if !sent {
                    break;
                }
            }
            fetched_rx.close();
            drop(normalized_tx);
        };

        let load = async {
            let stopped = loop {
                let Some(batch) = normalized_rx.recv().await else {
                    break None;
                };
                if stop.is_cancelled() {
                    break None;
                }
                if let Some(status) = self.load_batch(session, batch, total, progress, cancel).await {
                    break Some(status);
                }
            };
            stop.cancel();
            normalized_rx.close();
            stopped
        };

        let ((), (), stopped) = tokio::join!(extract, transform, load);
        stopped
    }

    async fn extract_batch(
        &self,
        session: &E::Session,
        index: usize,
        roots: Vec<ResourceKey>,
        progress: &Progress<'_>,
        cancel: &CancellationToken,
    ) -> Option<InFlight<RawPayload>> {
        let mut summary = BatchSummary {
            index,
            roots: roots.len(),
            ..BatchSummary::default()
        };
        log::debug!("Batch {}: extracting {} root(s)", index + 1, roots.len());
        let extraction = match self.extractor.extract(session, roots.clone(), cancel).await {
            Ok(extraction) => extraction,
            Err(_) => {
                log::warn!("Batch {}: extraction cancelled", index + 1);
                return None;
            }
        };
        progress.update(|t| t.extracted(&mut summary, &extraction.report));
        Some(InFlight {
            summary,
            roots,
            fetched: extraction.report.fetched_keys().cloned().collect(),
            items: extraction.items,
        })
    }

    fn transform_batch(
        &self,
        batch: InFlight<RawPayload>,
        progress: &Progress<'_>,
    ) -> InFlight<NormalizedRecordSet> {
        let InFlight {
            mut summary,
            roots,
            fetched,
            items,
        } = batch;

        let mut sets = Vec::with_capacity(items.len());
        for (payload, result) in items.iter().zip(self.transformer.transform_many(&items)) {
            match result {
                Ok(set) => {
                    progress.update(|t| {
                        t.transformed(&mut summary);
                        for error in &set.errors {
                            t.invalid(&mut summary, error, false);
                        }
                    });
                    sets.push(set);
                }
                Err(error) => {
                    log::warn!("Dropping {}: {}", payload.key, error);
                    progress.update(|t| t.invalid(&mut summary, &error, true));
                }
            }
        }

        InFlight {
            summary,
            roots,
            fetched,
            items: sets,
        }
    }

    /// Commit one batch. Returns the status to stop the run with, if any.
    ///
    /// The resources of a rolled-back batch are released from the session so
    /// later batches fetch them again instead of linking to rows that were
    /// never written.
    async fn load_batch(
        &self,
        session: &E::Session,
        batch: InFlight<NormalizedRecordSet>,
        total: usize,
        progress: &Progress<'_>,
        cancel: &CancellationToken,
    ) -> Option<RunStatus> {
        let InFlight {
            mut summary,
            roots,
            fetched,
            items,
        } = batch;
        let index = summary.index;

        let stop = match self.loader.load(items, cancel).await {
            Ok(report) => {
                log::info!(
                    "Batch {}/{}: fetched {}, transformed {}, committed {} creature(s) ({} row(s))",
                    index + 1,
                    total,
                    summary.fetched,
                    summary.transformed,
                    report.creatures.len(),
                    report.rows_written()
                );
                progress.update(|t| t.committed(&mut summary, report));
                None
            }
            Err(PersistenceError::Cancelled) => {
                log::warn!("Batch {}/{}: load cancelled, rolled back", index + 1, total);
                Some(failed(CANCELLED))
            }
            Err(error) => {
                let attempts = if error.is_unavailable() {
                    self.config.store_retries + 1
                } else {
                    1
                };
                log::error!("Batch {}/{} rolled back: {}", index + 1, total, error);
                self.extractor.release(session, &fetched);
                progress.update(|t| t.load_failed(&mut summary, &roots, &fetched, &error, attempts));

                if error.is_fatal() {
                    Some(failed(format!("store unavailable: {}", error)))
                } else if self.config.on_batch_failure == BatchFailurePolicy::Abort {
                    Some(failed(format!("batch {} failed: {}", index + 1, error)))
                } else {
                    None
                }
            }
        };

        progress.update(|t| t.finish_batch(summary));
        stop
    }
}

fn failed(cause: impl Into<String>) -> RunStatus {
    RunStatus::Failed {
        cause: cause.into(),
    }
}
