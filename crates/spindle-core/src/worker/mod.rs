//! Consumer engine: scheduling loop and concurrency-bounded execution.
//!
//! One worker owns one queue name. Its loop promotes due delayed jobs,
//! recovers stuck ones, then claims up to the free concurrency slots and
//! dispatches each claimed job as its own task, never blocking the loop on a
//! single job. Outcomes are persisted behind the claim fence, so a result
//! arriving after stuck-job recovery cannot clobber newer state.

mod retry;

pub use retry::RetryPolicy;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::domain::{JobId, JobRecord, WorkerId};
use crate::error::SpindleError;
use crate::observability::WorkerStats;
use crate::processor::{ClaimedJob, Processor};
use crate::store::JobStore;

/// Safety ceiling on simultaneous in-flight jobs per worker.
pub const MAX_CONCURRENCY: usize = 15;

/// Events are informational only; correctness never depends on anyone
/// listening, and a lagging subscriber just loses old events.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was dispatched to the processor.
    Active { id: JobId },

    /// The processor succeeded and the result was persisted.
    Completed { id: JobId, duration: Duration },

    /// The processor failed this attempt (retryable or terminal alike).
    Failed {
        id: JobId,
        error: String,
        duration: Duration,
    },

    /// A stuck job was returned to the waiting state.
    Stalled { id: JobId },
}

/// Options recognized by [`Worker::new`].
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Max simultaneous in-flight jobs, capped at [`MAX_CONCURRENCY`].
    pub concurrency: usize,

    /// Loop cadence while there is (or recently was) work.
    pub poll_interval: Duration,

    /// Idle ceiling for the adaptive poll backoff.
    pub max_poll_interval: Duration,

    /// Age of an active claim after which the job is presumed stuck.
    pub stuck_timeout: Duration,

    pub retry_policy: RetryPolicy,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: MAX_CONCURRENCY,
            poll_interval: Duration::from_secs(1),
            max_poll_interval: Duration::from_secs(15),
            stuck_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Adaptive idle polling: after three consecutive empty claims the interval
/// grows by 1.5x per empty poll up to the ceiling, and snaps back to the
/// floor as soon as work shows up (or the worker is saturated).
struct IdleBackoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
    empty_polls: u32,
}

impl IdleBackoff {
    fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling,
            current: floor,
            empty_polls: 0,
        }
    }

    fn reset(&mut self) {
        self.empty_polls = 0;
        self.current = self.floor;
    }

    fn note_empty_poll(&mut self) {
        self.empty_polls = self.empty_polls.saturating_add(1);
        if self.empty_polls > 2 {
            self.current = self.current.mul_f64(1.5).min(self.ceiling);
        }
    }

    fn current(&self) -> Duration {
        self.current
    }
}

/// Polls one queue and executes claimed jobs through the supplied processor.
pub struct Worker {
    queue_name: String,
    worker_id: WorkerId,
    store: Arc<dyn JobStore>,
    processor: Arc<dyn Processor>,
    options: WorkerOptions,
    events: broadcast::Sender<WorkerEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<bool>,
    running: AtomicBool,
    active_jobs: AtomicUsize,
    current_poll_ms: AtomicU64,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("queue_name", &self.queue_name)
            .field("worker_id", &self.worker_id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Fails fast on a configuration that could never work; silently caps
    /// oversized concurrency at [`MAX_CONCURRENCY`].
    pub fn new(
        store: Arc<dyn JobStore>,
        queue_name: impl Into<String>,
        processor: Arc<dyn Processor>,
        options: WorkerOptions,
    ) -> Result<Self, SpindleError> {
        if options.concurrency == 0 {
            return Err(SpindleError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if options.poll_interval.is_zero() {
            return Err(SpindleError::Config(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        if options.stuck_timeout.is_zero() {
            return Err(SpindleError::Config(
                "stuck_timeout must be non-zero".to_string(),
            ));
        }

        let mut options = options;
        options.concurrency = options.concurrency.min(MAX_CONCURRENCY);
        options.max_poll_interval = options.max_poll_interval.max(options.poll_interval);

        let (events, _) = broadcast::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(false);
        let worker_id = WorkerId::generate();
        let queue_name = queue_name.into();
        let poll_ms = options.poll_interval.as_millis() as u64;

        debug!(queue = %queue_name, %worker_id, "worker created");

        Ok(Self {
            queue_name,
            worker_id,
            store,
            processor,
            options,
            events,
            shutdown_tx,
            shutdown_rx,
            state_tx,
            state_rx,
            running: AtomicBool::new(false),
            active_jobs: AtomicUsize::new(0),
            current_poll_ms: AtomicU64::new(poll_ms),
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Subscribe to worker events. Can be called before or during `run`.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            running: self.running.load(Ordering::SeqCst),
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            max_concurrency: self.options.concurrency,
            worker_id: self.worker_id,
            queue_name: self.queue_name.clone(),
            current_poll_interval: Duration::from_millis(
                self.current_poll_ms.load(Ordering::Relaxed),
            ),
        }
    }

    /// Run the scheduling loop until [`Worker::close`] is called. Returns
    /// only after every in-flight dispatch has settled.
    pub async fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(queue = %self.queue_name, "worker already running");
            return;
        }
        let _ = self.state_tx.send(true);
        info!(
            queue = %self.queue_name,
            worker_id = %self.worker_id,
            concurrency = self.options.concurrency,
            "worker started"
        );

        let mut shutdown = self.shutdown_rx.clone();
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut idle = IdleBackoff::new(
            self.options.poll_interval,
            self.options.max_poll_interval,
        );

        while !*shutdown.borrow() {
            let now = Utc::now();

            match self.store.promote_due(&self.queue_name, now).await {
                Ok(0) => {}
                Ok(promoted) => {
                    debug!(queue = %self.queue_name, promoted, "promoted delayed jobs");
                }
                Err(error) => {
                    warn!(queue = %self.queue_name, %error, "failed to promote delayed jobs");
                }
            }

            let cutoff =
                now - chrono::Duration::milliseconds(self.options.stuck_timeout.as_millis() as i64);
            match self.store.recover_stuck(&self.queue_name, cutoff, now).await {
                Ok(recovered) => {
                    if !recovered.is_empty() {
                        warn!(
                            queue = %self.queue_name,
                            count = recovered.len(),
                            "recovered stuck jobs"
                        );
                    }
                    for id in recovered {
                        let _ = self.events.send(WorkerEvent::Stalled { id });
                    }
                }
                Err(error) => {
                    warn!(queue = %self.queue_name, %error, "failed to recover stuck jobs");
                }
            }

            // Reap finished dispatches before filling slots so capacity
            // freed during the sleep is reusable this iteration.
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(error) = joined {
                    if error.is_panic() {
                        warn!(queue = %self.queue_name, %error, "job dispatch panicked");
                    }
                }
            }

            let mut claimed_any = false;
            while in_flight.len() < self.options.concurrency {
                match self
                    .store
                    .claim_next(&self.queue_name, &self.worker_id, Utc::now())
                    .await
                {
                    Ok(Some(record)) => {
                        claimed_any = true;
                        self.dispatch(&mut in_flight, record);
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!(queue = %self.queue_name, %error, "failed to claim job");
                        break;
                    }
                }
            }

            if claimed_any || in_flight.len() >= self.options.concurrency {
                idle.reset();
            } else {
                idle.note_empty_poll();
            }

            self.active_jobs.store(in_flight.len(), Ordering::Relaxed);
            self.current_poll_ms
                .store(idle.current().as_millis() as u64, Ordering::Relaxed);

            tokio::select! {
                _ = tokio::time::sleep(idle.current()) => {}
                _ = shutdown.changed() => {}
            }
        }

        if !in_flight.is_empty() {
            info!(
                queue = %self.queue_name,
                in_flight = in_flight.len(),
                "draining in-flight jobs"
            );
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(error) = joined {
                if error.is_panic() {
                    warn!(queue = %self.queue_name, %error, "job dispatch panicked during drain");
                }
            }
        }

        self.active_jobs.store(0, Ordering::Relaxed);
        self.running.store(false, Ordering::SeqCst);
        let _ = self.state_tx.send(false);
        info!(queue = %self.queue_name, "worker stopped");
    }

    /// Stop the loop and wait for the in-flight drain. Returns immediately
    /// if the worker is not running.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);

        let mut state = self.state_rx.clone();
        while *state.borrow() {
            if state.changed().await.is_err() {
                break;
            }
        }
    }

    fn dispatch(&self, in_flight: &mut JoinSet<()>, record: JobRecord) {
        let store = Arc::clone(&self.store);
        let processor = Arc::clone(&self.processor);
        let events = self.events.clone();
        let policy = self.options.retry_policy.clone();

        in_flight.spawn(async move {
            run_one(store, processor, events, policy, record).await;
        });
    }
}

/// Execute one claimed job and persist its outcome. Processor errors are
/// routed into the retry policy; they never propagate out of the dispatch.
async fn run_one(
    store: Arc<dyn JobStore>,
    processor: Arc<dyn Processor>,
    events: broadcast::Sender<WorkerEvent>,
    policy: RetryPolicy,
    record: JobRecord,
) {
    let Some(token) = record.claim_token() else {
        warn!(job_id = %record.id, "claimed record carries no claim token, skipping");
        return;
    };
    let id = record.id;
    let job = ClaimedJob::from_record(&record);
    let started = Instant::now();

    let _ = events.send(WorkerEvent::Active { id });
    debug!(job_id = %id, attempt = record.attempts + 1, "processing job");

    match processor.process(&job).await {
        Ok(result) => {
            let duration = started.elapsed();
            match store.complete(id, &token, result, Utc::now()).await {
                Ok(true) => {
                    debug!(job_id = %id, ?duration, "job completed");
                    let _ = events.send(WorkerEvent::Completed { id, duration });
                }
                Ok(false) => {
                    debug!(job_id = %id, "claim superseded, discarding completion");
                }
                Err(error) => {
                    warn!(job_id = %id, %error, "failed to persist completion");
                }
            }
        }
        Err(error) => {
            let duration = started.elapsed();
            let reason = error.to_string();
            let failed_attempts = record.attempts + 1;

            let applied = if !error.is_fatal() && record.retries_remaining() {
                let delay = policy.next_delay(failed_attempts);
                let now = Utc::now();
                let scheduled_for = now + chrono::Duration::milliseconds(delay.as_millis() as i64);
                debug!(
                    job_id = %id,
                    attempt = failed_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling retry"
                );
                store
                    .schedule_retry(id, &token, &reason, scheduled_for, now)
                    .await
            } else {
                warn!(
                    job_id = %id,
                    attempts = failed_attempts,
                    reason = %reason,
                    "job failed permanently"
                );
                store.fail(id, &token, &reason, Utc::now()).await
            };

            match applied {
                Ok(true) => {}
                Ok(false) => debug!(job_id = %id, "claim superseded, discarding failure"),
                Err(error) => warn!(job_id = %id, %error, "failed to persist failure"),
            }

            let _ = events.send(WorkerEvent::Failed {
                id,
                error: reason,
                duration,
            });
        }
    }
}
