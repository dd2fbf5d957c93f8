pub mod db;

use async_trait::async_trait;
use shared::types::ScanRecord;
use thiserror::Error;

/// Result of a conditional upsert. Every variant is a successful write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed for the key
    Inserted,
    /// The stored row was older and has been overwritten
    Updated,
    /// The stored row is as new or newer; nothing changed
    IgnoredStale,
}

impl UpsertOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::IgnoredStale => "ignored_stale",
        }
    }
}

/// Infrastructure failures. Staleness is never reported here.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store workers are not running")]
    Unavailable,

    #[error("store did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

impl StorageError {
    /// Log classification
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Timeout(_) => "timeout",
            StorageError::Database(_) | StorageError::Unavailable => "infrastructure",
        }
    }
}

/// Durable home for scan records.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Insert the record, overwrite an older row for the same key, or ignore it
    /// if the stored row is at least as new. Check and write are one atomic step.
    async fn persist(&self, record: ScanRecord) -> Result<UpsertOutcome, StorageError>;
}
