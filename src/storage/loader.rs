//! Async loader over the blocking store

use super::sqlite::Store;
use crate::error::PersistenceError;
use crate::etl::{LoadReport, Loader};
use crate::model::{NormalizedRecordSet, RecordBatch};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_BACKOFF: Duration = Duration::from_millis(200);

/// Persists record sets into a [`Store`], one transaction per batch.
///
/// The store is driven from the blocking thread pool. A batch that finds the
/// store unavailable (locked, busy) is retried after a pause; any other error
/// is returned straight away.
#[derive(Debug, Clone)]
pub struct StoreLoader {
    store: Arc<Store>,
    retries: u32,
    backoff: Duration,
}

impl StoreLoader {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            retries: 0,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Retry a batch up to `retries` more times while the store is
    /// unavailable, pausing `backoff` (doubled each time) in between.
    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.backoff = backoff;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Merge `sets` into one batch and persist it.
    pub async fn persist(
        &self,
        sets: Vec<NormalizedRecordSet>,
        cancel: &CancellationToken,
    ) -> Result<LoadReport, PersistenceError> {
        let batch = Arc::new(RecordBatch::merge(sets));
        if batch.is_empty() {
            log::debug!("Nothing to persist");
            return Ok(LoadReport::default());
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.persist_once(Arc::clone(&batch), cancel).await {
                Err(e) if e.is_unavailable() && attempt <= self.retries => {
                    let pause = self.backoff.saturating_mul(1u32 << (attempt - 1).min(16));
                    log::warn!(
                        "Store unavailable (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        self.retries + 1,
                        pause,
                        e
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(PersistenceError::Cancelled),
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
                result => return result,
            }
        }
    }

    async fn persist_once(
        &self,
        batch: Arc<RecordBatch>,
        cancel: &CancellationToken,
    ) -> Result<LoadReport, PersistenceError> {
        let store = Arc::clone(&self.store);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || store.persist(&batch, &cancel))
            .await
            .map_err(|e| PersistenceError::Worker(e.to_string()))?
    }
}

#[async_trait]
impl Loader for StoreLoader {
    type Item = NormalizedRecordSet;

    async fn load(
        &self,
        items: Vec<Self::Item>,
        cancel: &CancellationToken,
    ) -> Result<LoadReport, PersistenceError> {
        let creatures: usize = items.iter().map(|set| set.creatures.len()).sum();
        log::debug!("Loading {} record set(s), {} creature(s)", items.len(), creatures);
        let report = self.persist(items, cancel).await?;
        log::debug!(
            "Committed {} row(s), skipped {} relation(s)",
            report.rows_written(),
            report.skipped.len()
        );
        Ok(report)
    }
}
