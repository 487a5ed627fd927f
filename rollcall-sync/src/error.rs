//! Error types for rollcall-sync.

use std::path::PathBuf;

use thiserror::Error;

use rollcall_core::error::ConfigError;

use crate::backend::BackendError;

/// All errors that can arise from a reconciliation pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A backend call failed and was not retried.
    #[error("{backend}: {operation} failed: {source}")]
    Backend {
        backend: String,
        operation: String,
        #[source]
        source: BackendError,
    },

    /// A retryable call kept failing until the attempt budget ran out.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: BackendError,
    },

    /// Lookup and creation both failed to produce a group.
    #[error("{backend}: could not resolve group {address}")]
    GroupUnresolved { backend: String, address: String },

    /// One or more member operations failed; the rest of the plan was applied.
    #[error("{backend}: {failed} member operation(s) failed; first: {first}")]
    MemberFailures {
        backend: String,
        failed: usize,
        first: String,
    },

    /// A worker task panicked or was cancelled.
    #[error("task {task} did not complete: {message}")]
    TaskPanic { task: String, message: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (directory snapshots).
    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
