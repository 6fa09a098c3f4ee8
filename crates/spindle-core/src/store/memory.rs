//! Embedded in-memory store.
//!
//! The whole job table lives behind one async mutex; every operation runs
//! entirely inside its lock scope, which is what makes the claim atomic.
//! The lock is never held across an await.

use std::cmp::Reverse;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{ClaimToken, JobId, JobRecord, JobStatus, WorkerId};
use crate::error::SpindleError;
use crate::observability::QueueCounts;
use crate::store::JobStore;

/// In-memory job table. The default store for tests and single-process use;
/// swap in the SQLite store when jobs must survive a restart.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, record: JobRecord) -> Result<(), SpindleError> {
        let mut jobs = self.jobs.lock().await;
        jobs.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, SpindleError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.get(&id).cloned())
    }

    async fn claim_next(
        &self,
        queue_name: &str,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, SpindleError> {
        let mut jobs = self.jobs.lock().await;

        let best = jobs
            .values()
            .filter(|j| j.queue_name == queue_name && j.status.is_claimable())
            .min_by_key(|j| (Reverse(j.priority), j.created_at, j.id))
            .map(|j| j.id);

        if let Some(id) = best {
            if let Some(record) = jobs.get_mut(&id) {
                record.begin_attempt(*worker_id, now);
                return Ok(Some(record.clone()));
            }
        }

        Ok(None)
    }

    async fn promote_due(
        &self,
        queue_name: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, SpindleError> {
        let mut jobs = self.jobs.lock().await;

        let mut promoted = 0;
        for record in jobs.values_mut() {
            if record.queue_name == queue_name && record.is_due(now) {
                record.promote(now);
                promoted += 1;
            }
        }

        Ok(promoted)
    }

    async fn recover_stuck(
        &self,
        queue_name: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, SpindleError> {
        let mut jobs = self.jobs.lock().await;

        let mut recovered = Vec::new();
        for record in jobs.values_mut() {
            let stuck = record.queue_name == queue_name
                && record.status == JobStatus::Active
                && record.processed_on.is_some_and(|at| at < cutoff);
            if stuck {
                record.reset_to_waiting(now);
                recovered.push(record.id);
            }
        }

        Ok(recovered)
    }

    async fn complete(
        &self,
        id: JobId,
        token: &ClaimToken,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool, SpindleError> {
        let mut jobs = self.jobs.lock().await;

        match jobs.get_mut(&id) {
            Some(record) if record.matches_claim(token) => {
                record.complete(result, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn schedule_retry(
        &self,
        id: JobId,
        token: &ClaimToken,
        reason: &str,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, SpindleError> {
        let mut jobs = self.jobs.lock().await;

        match jobs.get_mut(&id) {
            Some(record) if record.matches_claim(token) => {
                record.schedule_retry(reason, scheduled_for, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(
        &self,
        id: JobId,
        token: &ClaimToken,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SpindleError> {
        let mut jobs = self.jobs.lock().await;

        match jobs.get_mut(&id) {
            Some(record) if record.matches_claim(token) => {
                record.fail(reason, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_status(
        &self,
        queue_name: &str,
        status: JobStatus,
    ) -> Result<Vec<JobRecord>, SpindleError> {
        let jobs = self.jobs.lock().await;

        let mut records: Vec<JobRecord> = jobs
            .values()
            .filter(|j| j.queue_name == queue_name && j.status == status)
            .cloned()
            .collect();

        match status {
            JobStatus::Waiting => {
                records.sort_by_key(|j| (Reverse(j.priority), j.created_at, j.id));
            }
            JobStatus::Active => records.sort_by_key(|j| j.processed_on),
            JobStatus::Delayed => records.sort_by_key(|j| j.scheduled_for),
            JobStatus::Completed | JobStatus::Failed => {
                records.sort_by_key(|j| Reverse(j.finished_on));
            }
        }

        Ok(records)
    }

    async fn counts(&self, queue_name: &str) -> Result<QueueCounts, SpindleError> {
        let jobs = self.jobs.lock().await;

        let mut counts = QueueCounts::default();
        for record in jobs.values() {
            if record.queue_name == queue_name {
                counts.bump(record.status);
            }
        }

        Ok(counts)
    }

    async fn delete_finished_before(
        &self,
        queue_name: &str,
        status: JobStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, SpindleError> {
        let mut jobs = self.jobs.lock().await;

        let before = jobs.len();
        jobs.retain(|_, j| {
            !(j.queue_name == queue_name
                && j.status == status
                && j.finished_on.is_some_and(|at| at < cutoff))
        });

        Ok((before - jobs.len()) as u64)
    }
}
