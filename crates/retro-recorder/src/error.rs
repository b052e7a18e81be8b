//! Error types for the recorder

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type for recorder operations
pub type RecorderResult<T> = Result<T, RecorderError>;

/// Errors surfaced by the recorder handle
#[derive(Debug, Error)]
pub enum RecorderError {
    /// The worker thread could not be spawned
    #[error("failed to spawn recorder thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker thread panicked
    #[error("recorder thread panicked")]
    WorkerPanicked,

    /// Waiting on the worker thread failed
    #[error("failed to join recorder thread: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors from the log store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("payload is not JSON serializable: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The storage backend cannot be reached right now
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True when retrying the same operation later may succeed
    ///
    /// Connectivity-type failures are transient. Serialization and
    /// schema/constraint failures are permanent for the item at hand.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Serialize(_) => false,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen
                    | ErrorCode::DiskFull
                    | ErrorCode::FileLockingProtocolFailed
                    | ErrorCode::OutOfMemory
            ),
            StoreError::Sqlite(_) => false,
        }
    }
}
