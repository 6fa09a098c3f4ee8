//! End-to-end scenarios spanning Queue, Worker, and the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use spindle_core::{
    AddOptions, ClaimedJob, JobStatus, JobStore, MemoryStore, Processor, ProcessorError, Queue,
    RetryPolicy, Worker, WorkerEvent, WorkerOptions,
};

struct OkProcessor;

#[async_trait]
impl Processor for OkProcessor {
    async fn process(&self, _job: &ClaimedJob) -> Result<serde_json::Value, ProcessorError> {
        Ok(serde_json::json!("ok"))
    }
}

struct BoomProcessor;

#[async_trait]
impl Processor for BoomProcessor {
    async fn process(&self, _job: &ClaimedJob) -> Result<serde_json::Value, ProcessorError> {
        Err(ProcessorError::retryable("boom"))
    }
}

fn fast_options(concurrency: usize) -> WorkerOptions {
    WorkerOptions {
        concurrency,
        poll_interval: Duration::from_millis(10),
        max_poll_interval: Duration::from_millis(50),
        stuck_timeout: Duration::from_secs(30),
        retry_policy: RetryPolicy {
            base: Duration::from_millis(20),
            cap: Duration::from_millis(40),
        },
    }
}

fn spawn_worker(worker: &Arc<Worker>) -> tokio::task::JoinHandle<()> {
    let worker = Arc::clone(worker);
    tokio::spawn(async move { worker.run().await })
}

/// Poll the queue until nothing is outstanding, or give up.
async fn wait_until_drained(queue: &Queue, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let stats = queue.stats().await.unwrap();
        if stats.outstanding() == 0 {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "queue did not drain in {timeout:?}: {stats:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn plain_add_is_processed_to_completion() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "e2e");

    let id = queue
        .add(serde_json::json!({"x": 1}), AddOptions::default())
        .await
        .unwrap();

    // Fresh job carries the documented defaults.
    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.priority, 0);
    assert_eq!(job.max_attempts, 3);

    let worker = Arc::new(
        Worker::new(
            Arc::clone(&store),
            "e2e",
            Arc::new(OkProcessor),
            fast_options(2),
        )
        .unwrap(),
    );
    let mut events = worker.subscribe();
    let handle = spawn_worker(&worker);

    wait_until_drained(&queue, Duration::from_secs(2)).await;
    worker.close().await;
    handle.await.unwrap();

    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(serde_json::json!("ok")));
    assert_eq!(job.attempts, 0);
    assert!(job.finished_on.is_some());
    assert!(job.worker_id.is_none());

    // Active fires before Completed for the same job.
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen[0], WorkerEvent::Active { id: seen_id } if seen_id == id));
    assert!(matches!(seen[1], WorkerEvent::Completed { id: seen_id, .. } if seen_id == id));
}

#[tokio::test]
async fn delayed_job_is_not_claimed_before_its_schedule() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "e2e");

    let enqueued_at = Utc::now();
    let id = queue
        .add(
            serde_json::json!({"x": 1}),
            AddOptions::default().delay(Duration::from_millis(300)),
        )
        .await
        .unwrap();

    let worker = Arc::new(
        Worker::new(
            Arc::clone(&store),
            "e2e",
            Arc::new(OkProcessor),
            fast_options(2),
        )
        .unwrap(),
    );
    let handle = spawn_worker(&worker);

    // Well before the schedule the job must still be delayed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Delayed);

    wait_until_drained(&queue, Duration::from_secs(2)).await;
    worker.close().await;
    handle.await.unwrap();

    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    // The claim can only have happened after the delay elapsed.
    let processed_on = job.processed_on.unwrap();
    assert!(processed_on >= enqueued_at + chrono::Duration::milliseconds(300));
}

#[tokio::test]
async fn failing_job_exhausts_its_attempt_budget() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "e2e");

    let id = queue
        .add(
            serde_json::json!({"x": 1}),
            AddOptions::default().attempts(2),
        )
        .await
        .unwrap();

    let worker = Arc::new(
        Worker::new(
            Arc::clone(&store),
            "e2e",
            Arc::new(BoomProcessor),
            fast_options(2),
        )
        .unwrap(),
    );
    let mut events = worker.subscribe();
    let handle = spawn_worker(&worker);

    wait_until_drained(&queue, Duration::from_secs(3)).await;
    worker.close().await;
    handle.await.unwrap();

    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.failure_reason.as_deref(), Some("boom"));
    assert!(job.finished_on.is_some());

    // One Failed event per attempt, retryable and terminal alike.
    let mut failed = 0;
    while let Ok(event) = events.try_recv() {
        if let WorkerEvent::Failed { id: seen, error, .. } = event {
            assert_eq!(seen, id);
            assert_eq!(error, "boom");
            failed += 1;
        }
    }
    assert_eq!(failed, 2);

    // The failed job stays inspectable until explicitly cleaned.
    assert_eq!(queue.get_failed().await.unwrap().len(), 1);
    let deleted = queue
        .clean(Duration::ZERO, JobStatus::Failed)
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(queue.get_job(id).await.unwrap().is_none());
}

#[tokio::test]
async fn higher_priority_jobs_complete_first() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "e2e");

    let low = queue
        .add(serde_json::json!({"p": 1}), AddOptions::default().priority(1))
        .await
        .unwrap();
    let high = queue
        .add(
            serde_json::json!({"p": 10}),
            AddOptions::default().priority(10),
        )
        .await
        .unwrap();

    // One slot, so completion order is claim order.
    let worker = Arc::new(
        Worker::new(
            Arc::clone(&store),
            "e2e",
            Arc::new(OkProcessor),
            fast_options(1),
        )
        .unwrap(),
    );
    let mut events = worker.subscribe();
    let handle = spawn_worker(&worker);

    wait_until_drained(&queue, Duration::from_secs(2)).await;
    worker.close().await;
    handle.await.unwrap();

    let completions: Vec<_> = {
        let mut order = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let WorkerEvent::Completed { id, .. } = event {
                order.push(id);
            }
        }
        order
    };
    assert_eq!(completions, vec![high, low]);
}

#[tokio::test]
async fn equal_priority_jobs_complete_oldest_first() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "e2e");

    let older = queue
        .add(serde_json::json!({"n": 1}), AddOptions::default().priority(5))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = queue
        .add(serde_json::json!({"n": 2}), AddOptions::default().priority(5))
        .await
        .unwrap();

    let worker = Arc::new(
        Worker::new(
            Arc::clone(&store),
            "e2e",
            Arc::new(OkProcessor),
            fast_options(1),
        )
        .unwrap(),
    );
    let mut events = worker.subscribe();
    let handle = spawn_worker(&worker);

    wait_until_drained(&queue, Duration::from_secs(2)).await;
    worker.close().await;
    handle.await.unwrap();

    let completions: Vec<_> = {
        let mut order = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let WorkerEvent::Completed { id, .. } = event {
                order.push(id);
            }
        }
        order
    };
    assert_eq!(completions, vec![older, newer]);
}

#[tokio::test]
async fn retrying_job_passes_through_delayed_between_attempts() {
    // Fail once, then succeed: the record must show exactly one consumed
    // attempt and end completed.
    struct FailOnce(std::sync::atomic::AtomicBool);

    #[async_trait]
    impl Processor for FailOnce {
        async fn process(&self, _job: &ClaimedJob) -> Result<serde_json::Value, ProcessorError> {
            if self.0.swap(false, std::sync::atomic::Ordering::SeqCst) {
                Err(ProcessorError::retryable("first try fails"))
            } else {
                Ok(serde_json::json!("second try"))
            }
        }
    }

    let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "e2e");

    let id = queue
        .add(serde_json::json!({}), AddOptions::default())
        .await
        .unwrap();

    let worker = Arc::new(
        Worker::new(
            Arc::clone(&store),
            "e2e",
            Arc::new(FailOnce(std::sync::atomic::AtomicBool::new(true))),
            fast_options(1),
        )
        .unwrap(),
    );
    let handle = spawn_worker(&worker);

    wait_until_drained(&queue, Duration::from_secs(3)).await;
    worker.close().await;
    handle.await.unwrap();

    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.result, Some(serde_json::json!("second try")));
    // The retry went through the delayed state and recorded its reason.
    assert_eq!(job.failure_reason.as_deref(), Some("first try fails"));
    assert!(job.delay_ms.is_some());
}
