//! Storage error types.

use crate::types::{BatchStatus, JobStatus};
use thiserror::Error;

/// Errors returned by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested row does not exist.
    #[error("row not found: {0}")]
    NotFound(String),
    /// A job status transition violates the state machine.
    #[error("illegal job transition {from} -> {to}")]
    IllegalJobTransition {
        /// Status the row currently holds.
        from: JobStatus,
        /// Status the write attempted.
        to: JobStatus,
    },
    /// A batch status transition violates the state machine.
    #[error("illegal batch transition {from} -> {to}")]
    IllegalBatchTransition {
        /// Status the row currently holds.
        from: BatchStatus,
        /// Status the write attempted.
        to: BatchStatus,
    },
    /// A database error occurred.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    /// Any other error, e.g. a serialization failure.
    #[error(transparent)]
    Internal(#[from] eyre::Error),
}
