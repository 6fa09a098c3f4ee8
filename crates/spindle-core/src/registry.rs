//! Explicit ownership of workers: construct once at startup, close once at
//! shutdown. There are no lazily-created process-wide singletons; whoever
//! builds the registry owns every lifecycle in it.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::SpindleError;
use crate::worker::Worker;

/// Owns a set of workers, one per queue name.
#[derive(Default)]
pub struct Registry {
    workers: Vec<Arc<Worker>>,
    queue_names: HashSet<String>,
    handles: Vec<JoinHandle<()>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. The design assumes a single worker process per
    /// queue name, so a second worker for the same queue is rejected.
    pub fn register(&mut self, worker: Arc<Worker>) -> Result<(), SpindleError> {
        let queue_name = worker.queue_name().to_string();
        if !self.queue_names.insert(queue_name.clone()) {
            return Err(SpindleError::DuplicateWorker(queue_name));
        }
        self.workers.push(worker);
        Ok(())
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Spawn every registered worker's scheduling loop.
    pub fn start_all(&mut self) {
        for worker in &self.workers {
            let worker = Arc::clone(worker);
            self.handles.push(tokio::spawn(async move {
                worker.run().await;
            }));
        }
        info!(workers = self.workers.len(), "registry started");
    }

    /// Stop every worker and wait for their in-flight jobs to drain.
    pub async fn close_all(&mut self) {
        for worker in &self.workers {
            worker.close().await;
        }
        for handle in self.handles.drain(..) {
            if let Err(error) = handle.await {
                warn!(%error, "worker task ended abnormally");
            }
        }
        info!("registry closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{ClaimedJob, Processor, ProcessorError};
    use crate::queue::{AddOptions, Queue};
    use crate::store::{JobStore, MemoryStore};
    use crate::worker::{RetryPolicy, WorkerOptions};
    use async_trait::async_trait;
    use std::time::Duration;

    struct OkProcessor;

    #[async_trait]
    impl Processor for OkProcessor {
        async fn process(
            &self,
            _job: &ClaimedJob,
        ) -> Result<serde_json::Value, ProcessorError> {
            Ok(serde_json::json!("done"))
        }
    }

    fn fast_options() -> WorkerOptions {
        WorkerOptions {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
            max_poll_interval: Duration::from_millis(50),
            stuck_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy {
                base: Duration::from_millis(10),
                cap: Duration::from_millis(20),
            },
        }
    }

    fn worker(store: Arc<dyn JobStore>, queue: &str) -> Arc<Worker> {
        Arc::new(Worker::new(store, queue, Arc::new(OkProcessor), fast_options()).unwrap())
    }

    #[tokio::test]
    async fn rejects_second_worker_for_same_queue() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
        let mut registry = Registry::new();

        registry.register(worker(Arc::clone(&store), "a")).unwrap();
        registry.register(worker(Arc::clone(&store), "b")).unwrap();

        let err = registry
            .register(worker(Arc::clone(&store), "a"))
            .unwrap_err();
        assert!(matches!(err, SpindleError::DuplicateWorker(name) if name == "a"));
    }

    #[tokio::test]
    async fn start_and_close_processes_work() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
        let queue = Queue::new(Arc::clone(&store), "jobs");

        let mut registry = Registry::new();
        registry
            .register(worker(Arc::clone(&store), "jobs"))
            .unwrap();
        registry.start_all();

        for _ in 0..3 {
            queue
                .add(serde_json::json!({}), AddOptions::default())
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        registry.close_all().await;

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.outstanding(), 0);
        assert!(!registry.workers()[0].stats().running);
    }
}
