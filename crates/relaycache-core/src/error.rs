//! Store error types.

use crate::record::MalformedRecord;
use crate::registry::RecordCategory;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The connection is not open (or was closed). Retry once the store is ready.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The partition exists in the registry but not on disk yet.
    #[error("partition '{0}' does not exist at the current schema version")]
    PartitionMissing(String),

    /// No registry partition carries this name.
    #[error("unknown partition: {0}")]
    UnknownPartition(String),

    /// A candidate record failed validation.
    #[error("malformed record: {0}")]
    Malformed(#[from] MalformedRecord),

    /// The operation requires semantics the category does not have.
    #[error("{operation} is not supported for category {category} ({reason})")]
    CategoryMismatch {
        operation: &'static str,
        category: RecordCategory,
        reason: &'static str,
    },

    /// The database on disk was written by a newer version.
    #[error("schema version on disk ({on_disk}) is newer than requested ({requested})")]
    SchemaTooNew { on_disk: u32, requested: u32 },

    /// An internal bookkeeping check failed.
    #[error("consistency check failed: {0}")]
    Inconsistent(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The record source failed to deliver candidates.
    #[error("record source error: {0}")]
    Source(String),
}

impl StoreError {
    /// Create an Unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a CategoryMismatch error.
    pub fn category_mismatch(
        operation: &'static str,
        category: RecordCategory,
        reason: &'static str,
    ) -> Self {
        Self::CategoryMismatch {
            operation,
            category,
            reason,
        }
    }

    /// Whether the caller may retry the same operation later without
    /// changing anything (only connection availability qualifies).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
