//! The processor contract: the caller-supplied unit of business logic.
//!
//! A processor receives a claimed job and returns a JSON result or an error.
//! Delivery is at-least-once (a job may be reprocessed after stuck-job
//! recovery), so processors must be idempotent-safe.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::domain::{JobId, JobRecord};

/// Failure reported by a processor.
///
/// `Retryable` routes through the retry policy until the attempt budget runs
/// out. `Fatal` skips the remaining budget and fails the job immediately,
/// for errors a retry cannot fix (malformed payload, permanent rejection).
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    Fatal(String),
}

impl ProcessorError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        ProcessorError::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        ProcessorError::Fatal(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ProcessorError::Fatal(_))
    }
}

/// The slice of a job a processor is allowed to see.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub queue_name: String,
    pub data: serde_json::Value,

    /// Failed attempts before this one (0 on the first invocation).
    pub attempts: u32,
    pub max_attempts: u32,
}

impl ClaimedJob {
    pub(crate) fn from_record(record: &JobRecord) -> Self {
        Self {
            id: record.id,
            queue_name: record.queue_name.clone(),
            data: record.data.clone(),
            attempts: record.attempts,
            max_attempts: record.max_attempts,
        }
    }

    /// Decode the opaque payload into the shape this processor expects.
    /// A mismatch is fatal: the payload will not improve on retry.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, ProcessorError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| ProcessorError::Fatal(format!("malformed job payload: {e}")))
    }
}

/// Caller-supplied business logic, invoked once per claimed job.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, job: &ClaimedJob) -> Result<serde_json::Value, ProcessorError>;
}
