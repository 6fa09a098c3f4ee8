//! Storage seam: the atomic operations the core requires of its storage
//! collaborator.
//!
//! Design intent:
//! - Every mutation is a single atomic operation at the store. Claim
//!   atomicity is the core correctness property: at most one claimant per
//!   job, even under concurrent pollers.
//! - Outcome writes (`complete`/`schedule_retry`/`fail`) are fenced by the
//!   claim token and return `false` when the claim is no longer current, so
//!   a late result from a recovered job is discarded instead of clobbering
//!   newer state.
//! - Mutating operations take an explicit `now` so transition logic stays
//!   deterministic under test.

mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ClaimToken, JobId, JobRecord, JobStatus, WorkerId};
use crate::error::SpindleError;
use crate::observability::QueueCounts;

/// Listing order per status, matching the producer API:
/// - waiting: priority desc, created_at asc
/// - active: processed_on asc
/// - delayed: scheduled_for asc
/// - completed / failed: finished_on desc
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a freshly created record. Single insert, no side effects.
    async fn insert(&self, record: JobRecord) -> Result<(), SpindleError>;

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, SpindleError>;

    /// Atomically select the best waiting job (priority desc, created_at
    /// asc) for `queue_name` and flip it to active, stamping `worker_id` and
    /// `processed_on`. Returns `None` when no job is eligible.
    async fn claim_next(
        &self,
        queue_name: &str,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, SpindleError>;

    /// Batch-promote delayed jobs whose schedule has elapsed. Returns the
    /// number promoted.
    async fn promote_due(
        &self,
        queue_name: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, SpindleError>;

    /// Batch-reset active jobs claimed before `cutoff` back to waiting,
    /// clearing their claim. Returns the recovered ids so the caller can
    /// emit one stalled notification per job.
    async fn recover_stuck(
        &self,
        queue_name: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, SpindleError>;

    /// Fenced: applies only while `token` still matches the active row.
    async fn complete(
        &self,
        id: JobId,
        token: &ClaimToken,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool, SpindleError>;

    /// Fenced: consumes one attempt and schedules the retry.
    async fn schedule_retry(
        &self,
        id: JobId,
        token: &ClaimToken,
        reason: &str,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, SpindleError>;

    /// Fenced: consumes the final attempt and fails the job permanently.
    async fn fail(
        &self,
        id: JobId,
        token: &ClaimToken,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SpindleError>;

    async fn list_by_status(
        &self,
        queue_name: &str,
        status: JobStatus,
    ) -> Result<Vec<JobRecord>, SpindleError>;

    async fn counts(&self, queue_name: &str) -> Result<QueueCounts, SpindleError>;

    /// Delete terminal jobs of `status` finished before `cutoff`. Returns
    /// the number deleted. Callers validate that `status` is terminal.
    async fn delete_finished_before(
        &self,
        queue_name: &str,
        status: JobStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, SpindleError>;
}
