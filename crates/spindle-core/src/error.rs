use thiserror::Error;

use crate::domain::{JobId, JobStatus};

/// Caller-facing errors. Ordinary job failures never surface here; they are
/// contained in the worker and reported via events and `failure_reason`.
#[derive(Debug, Error)]
pub enum SpindleError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown job {0}")]
    UnknownJob(JobId),

    #[error("clean only applies to terminal jobs, got status {0}")]
    InvalidCleanTarget(JobStatus),

    #[error("a worker is already registered for queue {0:?}")]
    DuplicateWorker(String),
}
