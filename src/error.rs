//! Error taxonomy for the ingestion stages
//!
//! Each stage owns one error type so failures can be recorded with the stage
//! they came from. Only [`ConfigError`] and an unavailable store end a run.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Failure fetching one upstream resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network timeout, connection reset, 5xx or 429. Retried per policy.
    #[error("transient fetch failure{}: {message}", status_suffix(.status))]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// Any other 4xx, or a body that is not the JSON we expect. Never retried.
    #[error("permanent fetch failure{}: {message}", status_suffix(.status))]
    Permanent {
        status: Option<u16>,
        message: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {})", code),
        None => String::new(),
    }
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient { .. } => FailureKind::TransientFetch,
            Self::Permanent { .. } => FailureKind::PermanentFetch,
        }
    }
}

/// A required field was absent or malformed, or a value broke an invariant.
///
/// Fatal to the entity named in `entity` only.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("invalid {entity}: {field}: {message}")]
pub struct ValidationError {
    pub entity: String,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(
        entity: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn missing(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(entity, field, "required field is missing")
    }
}

/// Failure writing a batch to the store. The batch transaction is rolled back.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The store refused the batch (constraint violation, bad statement).
    #[error("store rejected batch during {operation}: {source}")]
    Rejected {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// The store could not be reached or stayed locked.
    #[error("store unavailable during {operation}: {source}")]
    Unavailable {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database schema version {found} does not match expected version {expected}")]
    SchemaMismatch { found: i64, expected: i64 },

    #[error("batch load cancelled")]
    Cancelled,

    #[error("store worker failed: {0}")]
    Worker(String),
}

impl PersistenceError {
    /// Sort a SQLite error into batch-level or infrastructure-level failure.
    pub fn from_sqlite(operation: &'static str, source: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        let unavailable = match &source {
            rusqlite::Error::SqliteFailure(err, _) => matches!(
                err.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DiskFull
                    | ErrorCode::NotADatabase
                    | ErrorCode::PermissionDenied
            ),
            _ => false,
        };

        if unavailable {
            Self::Unavailable { operation, source }
        } else {
            Self::Rejected { operation, source }
        }
    }

    /// True when the store could not be reached; worth retrying.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// True when the store itself is unusable, as opposed to this batch being
    /// bad. Ends the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::SchemaMismatch { .. } | Self::Worker(_)
        )
    }
}

/// Invalid run configuration. Raised before any work starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be positive, got {value}")]
    NonPositive { key: &'static str, value: String },

    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}

/// The run-scoped cancellation signal fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("run cancelled")]
pub struct Cancelled;

/// Error kind as it appears in the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    #[serde(rename = "TransientFetchError")]
    TransientFetch,
    #[serde(rename = "PermanentFetchError")]
    PermanentFetch,
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "PersistenceError")]
    Persistence,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransientFetch => "TransientFetchError",
            Self::PermanentFetch => "PermanentFetchError",
            Self::Validation => "ValidationError",
            Self::Persistence => "PersistenceError",
        };
        f.write_str(name)
    }
}
