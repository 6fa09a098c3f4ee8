//! The persisted job record and its status transitions.
//!
//! Design:
//! - `JobRecord` is the single source of truth for one unit of work.
//! - Every transition is a method here, stamping `updated_at`, so both store
//!   implementations share the same transition logic instead of re-deriving
//!   it per backend.
//! - Outcome transitions are fenced: the worker presents the `ClaimToken` it
//!   observed at claim time, and a store only applies the write when the
//!   token still matches the active row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, WorkerId};
use super::status::JobStatus;

/// Proof of a specific claim. An outcome write carrying a token that no
/// longer matches the row (the job was recovered and possibly reclaimed) is
/// discarded instead of clobbering newer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimToken {
    pub worker_id: WorkerId,
    pub processed_on: DateTime<Utc>,
}

/// A durable row describing one unit of work and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,

    /// Partition key. A worker operates on exactly one queue name.
    pub queue_name: String,

    /// Opaque payload. The processor owns its shape.
    pub data: serde_json::Value,

    pub status: JobStatus,

    /// Higher values claim before lower values.
    pub priority: i32,

    /// Failed processor invocations so far. Never exceeds `max_attempts`.
    pub attempts: u32,

    pub max_attempts: u32,

    /// Most recent delay applied (initial delay or retry backoff), millis.
    pub delay_ms: Option<u64>,

    /// Set while delayed; the instant the job becomes promotable.
    pub scheduled_for: Option<DateTime<Utc>>,

    /// Set while active, together with `processed_on`.
    pub worker_id: Option<WorkerId>,

    /// Claim time of the current (or last) attempt.
    pub processed_on: Option<DateTime<Utc>>,

    /// Set exactly when the job reaches a terminal status.
    pub finished_on: Option<DateTime<Utc>>,

    pub result: Option<serde_json::Value>,

    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a record in its initial status. `delay_ms > 0` starts the job
    /// delayed with `scheduled_for = now + delay`, otherwise waiting.
    pub fn new(
        id: JobId,
        queue_name: impl Into<String>,
        data: serde_json::Value,
        priority: i32,
        max_attempts: u32,
        delay_ms: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let (status, scheduled_for, delay) = if delay_ms > 0 {
            (
                JobStatus::Delayed,
                Some(now + chrono::Duration::milliseconds(delay_ms as i64)),
                Some(delay_ms),
            )
        } else {
            (JobStatus::Waiting, None, None)
        };

        Self {
            id,
            queue_name: queue_name.into(),
            data,
            status,
            priority,
            attempts: 0,
            max_attempts,
            delay_ms: delay,
            scheduled_for,
            worker_id: None,
            processed_on: None,
            finished_on: None,
            result: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Waiting -> Active. Stamps the claiming worker and the claim time.
    pub fn begin_attempt(&mut self, worker_id: WorkerId, now: DateTime<Utc>) {
        self.status = JobStatus::Active;
        self.worker_id = Some(worker_id);
        self.processed_on = Some(now);
        self.updated_at = now;
    }

    /// Active -> Completed.
    pub fn complete(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.finished_on = Some(now);
        self.worker_id = None;
        self.updated_at = now;
    }

    /// Active -> Delayed. Consumes one attempt and schedules the retry.
    pub fn schedule_retry(
        &mut self,
        reason: impl Into<String>,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        debug_assert!(self.attempts < self.max_attempts);
        self.status = JobStatus::Delayed;
        self.attempts += 1;
        self.failure_reason = Some(reason.into());
        self.scheduled_for = Some(scheduled_for);
        self.delay_ms = Some((scheduled_for - now).num_milliseconds().max(0) as u64);
        self.worker_id = None;
        self.processed_on = None;
        self.updated_at = now;
    }

    /// Active -> Failed. Consumes the final attempt; terminal.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.attempts += 1;
        self.failure_reason = Some(reason.into());
        self.finished_on = Some(now);
        self.worker_id = None;
        self.processed_on = None;
        self.updated_at = now;
    }

    /// Delayed -> Waiting, once `scheduled_for` has elapsed.
    pub fn promote(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Waiting;
        self.scheduled_for = None;
        self.updated_at = now;
    }

    /// Active -> Waiting (stuck-job recovery). Does not consume an attempt:
    /// attempts count processor failures, not crashed hosts.
    pub fn reset_to_waiting(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Waiting;
        self.worker_id = None;
        self.processed_on = None;
        self.updated_at = now;
    }

    /// The token a worker must present with this claim's outcome.
    pub fn claim_token(&self) -> Option<ClaimToken> {
        match (self.worker_id, self.processed_on) {
            (Some(worker_id), Some(processed_on)) if self.status == JobStatus::Active => {
                Some(ClaimToken {
                    worker_id,
                    processed_on,
                })
            }
            _ => None,
        }
    }

    /// Whether an outcome write carrying `token` may still be applied.
    pub fn matches_claim(&self, token: &ClaimToken) -> bool {
        self.status == JobStatus::Active
            && self.worker_id == Some(token.worker_id)
            && self.processed_on == Some(token.processed_on)
    }

    /// Whether one more failure would exhaust the retry budget.
    pub fn retries_remaining(&self) -> bool {
        self.attempts + 1 < self.max_attempts
    }

    /// Delayed and due for promotion at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Delayed
            && self.scheduled_for.is_some_and(|at| at <= now)
    }
}
