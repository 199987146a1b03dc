//! Store error types.

use encodeq_core::JobId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing medium could not be written or read. Retryable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A finalize call named a job that is not currently running.
    #[error("unknown job: {0} is not running")]
    UnknownJob(JobId),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("store is closed")]
    Closed,

    #[error("store has not been recovered yet")]
    NotRecovered,

    /// A persisted record could not be trusted. Fatal at startup.
    #[error("corrupt job record {}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },
}

impl StoreError {
    pub(crate) fn unavailable(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable(format!("{}: {}", context, err))
    }

    /// Whether a client may retry the operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::NotRecovered)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
