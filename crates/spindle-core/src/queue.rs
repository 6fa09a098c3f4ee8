//! Producer-facing API over the persisted job collection for one queue name.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::domain::{JobId, JobRecord, JobStatus};
use crate::error::SpindleError;
use crate::observability::QueueCounts;
use crate::store::JobStore;

/// Options recognized by [`Queue::add`].
#[derive(Debug, Clone)]
pub struct AddOptions {
    /// Higher values claim before lower values.
    pub priority: i32,

    /// Initial delay before the job becomes claimable.
    pub delay: Duration,

    /// Maximum processing attempts before permanent failure.
    pub attempts: u32,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay: Duration::ZERO,
            attempts: 3,
        }
    }
}

impl AddOptions {
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Handle for enqueueing and inspecting jobs of one queue name.
///
/// Cheap to clone; all state lives in the store. Storage errors propagate to
/// the caller untouched.
#[derive(Clone)]
pub struct Queue {
    store: Arc<dyn JobStore>,
    queue_name: String,
}

impl Queue {
    pub fn new(store: Arc<dyn JobStore>, queue_name: impl Into<String>) -> Self {
        Self {
            store,
            queue_name: queue_name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.queue_name
    }

    /// Persist one new job and return its id. No side effects beyond the
    /// single insert.
    pub async fn add<D: Serialize>(
        &self,
        data: D,
        opts: AddOptions,
    ) -> Result<JobId, SpindleError> {
        if opts.attempts == 0 {
            return Err(SpindleError::Config(
                "attempts must be at least 1".to_string(),
            ));
        }

        let id = JobId::generate();
        let record = JobRecord::new(
            id,
            self.queue_name.clone(),
            serde_json::to_value(data)?,
            opts.priority,
            opts.attempts,
            opts.delay.as_millis() as u64,
            Utc::now(),
        );
        let status = record.status;

        self.store.insert(record).await?;
        debug!(job_id = %id, queue = %self.queue_name, status = %status, "enqueued job");

        Ok(id)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<JobRecord>, SpindleError> {
        self.store.get(id).await
    }

    /// Waiting jobs, ordered (priority desc, created_at asc).
    pub async fn get_waiting(&self) -> Result<Vec<JobRecord>, SpindleError> {
        self.store
            .list_by_status(&self.queue_name, JobStatus::Waiting)
            .await
    }

    /// Active jobs, oldest claim first.
    pub async fn get_active(&self) -> Result<Vec<JobRecord>, SpindleError> {
        self.store
            .list_by_status(&self.queue_name, JobStatus::Active)
            .await
    }

    /// Delayed jobs, soonest schedule first.
    pub async fn get_delayed(&self) -> Result<Vec<JobRecord>, SpindleError> {
        self.store
            .list_by_status(&self.queue_name, JobStatus::Delayed)
            .await
    }

    /// Completed jobs, most recently finished first.
    pub async fn get_completed(&self) -> Result<Vec<JobRecord>, SpindleError> {
        self.store
            .list_by_status(&self.queue_name, JobStatus::Completed)
            .await
    }

    /// Failed jobs, most recently finished first.
    pub async fn get_failed(&self) -> Result<Vec<JobRecord>, SpindleError> {
        self.store
            .list_by_status(&self.queue_name, JobStatus::Failed)
            .await
    }

    /// Per-status counts, for monitoring and backpressure decisions.
    pub async fn stats(&self) -> Result<QueueCounts, SpindleError> {
        self.store.counts(&self.queue_name).await
    }

    /// Delete terminal jobs of `status` that finished more than
    /// `grace_period` ago. Returns the number deleted.
    pub async fn clean(
        &self,
        grace_period: Duration,
        status: JobStatus,
    ) -> Result<u64, SpindleError> {
        if !status.is_terminal() {
            return Err(SpindleError::InvalidCleanTarget(status));
        }

        let cutoff = Utc::now() - chrono::Duration::milliseconds(grace_period.as_millis() as i64);
        let deleted = self
            .store
            .delete_finished_before(&self.queue_name, status, cutoff)
            .await?;
        if deleted > 0 {
            debug!(queue = %self.queue_name, status = %status, deleted, "cleaned terminal jobs");
        }

        Ok(deleted)
    }
}
