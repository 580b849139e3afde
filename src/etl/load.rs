//! Loader trait for persisting normalized records

use crate::error::PersistenceError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Loader trait for writing one batch to a destination
///
/// A call is all-or-nothing: either every item of the batch is committed or
/// none is.
///
/// # Example
/// ```no_run
/// use async_trait::async_trait;
/// use pokedex_sync::error::PersistenceError;
/// use pokedex_sync::etl::{LoadReport, Loader};
/// use tokio_util::sync::CancellationToken;
///
/// struct CountingLoader;
///
/// #[async_trait]
/// impl Loader for CountingLoader {
///     type Item = String;
///
///     async fn load(
///         &self,
///         items: Vec<Self::Item>,
///         cancel: &CancellationToken,
///     ) -> Result<LoadReport, PersistenceError> {
///         if cancel.is_cancelled() {
///             return Err(PersistenceError::Cancelled);
///         }
///         let mut report = LoadReport::default();
///         report.rows.insert("names", items.len());
///         Ok(report)
///     }
/// }
/// ```
#[async_trait]
pub trait Loader: Send + Sync {
    /// The type of items to load
    type Item: Send;

    /// Load one batch
    ///
    /// # Errors
    /// Returns [`PersistenceError::Cancelled`] if `cancel` fired before the
    /// commit, or the store error that caused the batch to roll back.
    async fn load(
        &self,
        items: Vec<Self::Item>,
        cancel: &CancellationToken,
    ) -> Result<LoadReport, PersistenceError>;
}

/// What one committed batch wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Rows inserted or updated, per table
    pub rows: BTreeMap<&'static str, usize>,
    /// Creatures committed by the batch
    pub creatures: Vec<i64>,
    /// Relations not written because their parent row does not exist
    pub skipped: Vec<SkippedRelation>,
}

impl LoadReport {
    pub fn rows_written(&self) -> usize {
        self.rows.values().sum()
    }

    pub fn skip(&mut self, table: &'static str, row: impl Into<String>, missing: impl Into<String>) {
        self.skipped.push(SkippedRelation {
            table,
            row: row.into(),
            missing: missing.into(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRelation {
    pub table: &'static str,
    pub row: String,
    pub missing: String,
}
