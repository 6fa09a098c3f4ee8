//! Status views for monitoring and backpressure decisions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{JobStatus, WorkerId};

/// Per-status job counts for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn bump(&mut self, status: JobStatus) {
        match status {
            JobStatus::Waiting => self.waiting += 1,
            JobStatus::Delayed => self.delayed += 1,
            JobStatus::Active => self.active += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }

    /// Jobs that still have work ahead of them.
    pub fn outstanding(&self) -> usize {
        self.waiting + self.delayed + self.active
    }
}

/// Point-in-time view of a worker.
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub running: bool,
    pub active_jobs: usize,
    pub max_concurrency: usize,
    pub worker_id: WorkerId,
    pub queue_name: String,
    pub current_poll_interval: Duration,
}
