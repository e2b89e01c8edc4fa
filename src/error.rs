//! Error types for the store and sync layers.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of the relational chunk store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The database could not be opened after all retries.
    #[error("could not open database at {path} after {attempts} attempts: {source}")]
    Unavailable {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// The database was corrupt, moved aside, and could not be recreated.
    #[error("database at {path} was corrupt (quarantined to {quarantined_to}) and could not be recreated: {source}")]
    Unrecoverable {
        path: PathBuf,
        quarantined_to: PathBuf,
        #[source]
        source: sqlx::Error,
    },
}

/// Failures of a vector index engine.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index {op} timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },

    #[error("vector index storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("vector index io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vector index metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("no shadow index exists")]
    NoShadow,
}

/// Failures surfaced by the embedding sync engine and the reindex orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("embedding backend is not reachable: {0}")]
    BackendUnreachable(String),

    #[error("embedding model '{0}' is not available on the backend")]
    ModelUnavailable(String),

    #[error("embedding provider is disabled")]
    Disabled,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    /// A full rebuild failed; the shadow index was discarded and the live
    /// index left untouched.
    #[error("reindex failed at batch {batch}: {message}")]
    ReindexFailed { batch: usize, message: String },
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
