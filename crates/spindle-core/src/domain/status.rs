//! Job status state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
///
/// Transitions:
/// - Waiting -> Active (atomic claim by a worker)
/// - Delayed -> Waiting (promotion once `scheduled_for` elapses)
/// - Active -> Completed (processor succeeded)
/// - Active -> Delayed (processor failed, retry budget remains)
/// - Active -> Failed (processor failed, retry budget exhausted)
/// - Active -> Waiting (stuck-job recovery)
///
/// Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible to be claimed.
    Waiting,

    /// Scheduled for a future instant (initial delay or retry backoff).
    Delayed,

    /// Claimed by a worker, processor in flight.
    Active,

    /// Processor succeeded.
    Completed,

    /// Retry budget exhausted, kept for inspection until cleaned.
    Failed,
}

impl JobStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Only waiting jobs are eligible for the atomic claim.
    pub fn is_claimable(self) -> bool {
        matches!(self, JobStatus::Waiting)
    }

    /// Storage form, also used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Delayed => "delayed",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "delayed" => Ok(JobStatus::Delayed),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}
