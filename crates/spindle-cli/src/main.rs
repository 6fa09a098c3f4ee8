//! Demo driver for the spindle job queue.
//!
//! Wires a store, a queue, and a worker together, enqueues a batch of
//! simulated LLM-call jobs (mixed priorities, delays, and induced failures),
//! streams worker events, and shuts down gracefully once the queue drains or
//! on ctrl-c.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use rand::Rng;
use spindle_core::{
    AddOptions, ClaimedJob, JobStatus, JobStore, MemoryStore, Processor, ProcessorError, Queue,
    Registry, SpindleError, Worker, WorkerEvent, WorkerOptions,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const QUEUE_NAME: &str = "llm-requests";

#[derive(Parser, Debug)]
#[command(about = "Run a spindle worker over a batch of demo jobs", version)]
struct Args {
    /// Number of jobs to enqueue.
    #[arg(short, long, default_value_t = 25)]
    jobs: u32,

    /// Max simultaneous in-flight jobs.
    #[arg(short, long, default_value_t = 5)]
    concurrency: usize,

    /// Fail roughly one in N processor invocations (0 disables failures).
    #[arg(short, long, default_value_t = 7)]
    fail_every: u32,

    /// Enables debug-level logging.
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

/// Stands in for an LLM API call: sleeps a little, fails now and then.
struct SimulatedLlm {
    fail_every: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Processor for SimulatedLlm {
    async fn process(&self, job: &ClaimedJob) -> Result<serde_json::Value, ProcessorError> {
        let latency = rand::thread_rng().gen_range(30..200);
        tokio::time::sleep(Duration::from_millis(latency)).await;

        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(ProcessorError::retryable("simulated LLM API failure"));
        }

        let prompt = job
            .data
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or("<none>");
        Ok(serde_json::json!({
            "response": format!("response for {prompt}"),
            "latency_ms": latency,
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), SpindleError> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), QUEUE_NAME);

    let processor = Arc::new(SimulatedLlm {
        fail_every: args.fail_every,
        calls: AtomicU32::new(0),
    });
    let worker = Arc::new(Worker::new(
        Arc::clone(&store),
        QUEUE_NAME,
        processor,
        WorkerOptions {
            concurrency: args.concurrency,
            poll_interval: Duration::from_millis(100),
            ..WorkerOptions::default()
        },
    )?);

    // Stream events as they happen; purely informational.
    let mut events = worker.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                WorkerEvent::Active { id } => info!(job_id = %id, "job started"),
                WorkerEvent::Completed { id, duration } => {
                    info!(job_id = %id, ?duration, "job completed");
                }
                WorkerEvent::Failed { id, error, duration } => {
                    warn!(job_id = %id, %error, ?duration, "job failed this attempt");
                }
                WorkerEvent::Stalled { id } => warn!(job_id = %id, "job stalled and recovered"),
            }
        }
    });

    let mut registry = Registry::new();
    registry.register(Arc::clone(&worker))?;
    registry.start_all();

    info!(jobs = args.jobs, concurrency = args.concurrency, "enqueueing demo batch");
    for n in 1..=args.jobs {
        let opts = AddOptions::default()
            // A few high-priority jobs jump the line.
            .priority(if n <= 5 { 10 } else { 0 })
            // The tail of the batch arrives later.
            .delay(if n > args.jobs.saturating_sub(5) {
                Duration::from_secs(2)
            } else {
                Duration::ZERO
            });
        queue
            .add(serde_json::json!({"prompt": format!("demo prompt {n}")}), opts)
            .await?;
    }

    // Report progress until the queue drains or the user interrupts.
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = queue.stats().await?;
                info!(
                    waiting = stats.waiting,
                    delayed = stats.delayed,
                    active = stats.active,
                    completed = stats.completed,
                    failed = stats.failed,
                    "queue stats"
                );
                if stats.outstanding() == 0 {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, shutting down");
                break;
            }
        }
    }

    registry.close_all().await;

    let removed_completed = queue.clean(Duration::ZERO, JobStatus::Completed).await?;
    let removed_failed = queue.clean(Duration::ZERO, JobStatus::Failed).await?;
    info!(removed_completed, removed_failed, "retention cleanup done");

    let final_stats = queue.stats().await?;
    info!(?final_stats, "final queue stats");

    Ok(())
}
