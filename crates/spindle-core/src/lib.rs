//! spindle-core
//!
//! A single-process, persistence-backed job queue and worker pool: priority,
//! delay, bounded concurrency, automatic retry with capped exponential
//! backoff, and recovery of jobs stuck behind a crashed or hung processor.
//!
//! # Module layout
//! - **domain**: identifiers, the persisted `JobRecord`, and its status
//!   machine
//! - **store**: the `JobStore` seam (atomic claim, batch promotion and
//!   recovery, fenced outcome writes) with in-memory and SQLite
//!   implementations
//! - **queue**: producer-facing API (enqueue, listings, stats, retention)
//! - **worker**: consumer engine (scheduling loop, concurrent dispatch,
//!   retry policy, events, graceful drain)
//! - **processor**: the caller-supplied business-logic contract
//! - **registry**: explicit startup/shutdown ownership of workers
//!
//! # Example
//! ```ignore
//! let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
//! let queue = Queue::new(Arc::clone(&store), "llm-requests");
//!
//! let worker = Arc::new(Worker::new(
//!     Arc::clone(&store),
//!     "llm-requests",
//!     Arc::new(MyProcessor),
//!     WorkerOptions::default(),
//! )?);
//!
//! queue.add(serde_json::json!({"prompt": "hi"}), AddOptions::default()).await?;
//! ```

pub mod domain;
pub mod error;
pub mod observability;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod store;
pub mod worker;

pub use domain::{ClaimToken, JobId, JobRecord, JobStatus, WorkerId};
pub use error::SpindleError;
pub use observability::{QueueCounts, WorkerStats};
pub use processor::{ClaimedJob, Processor, ProcessorError};
pub use queue::{AddOptions, Queue};
pub use registry::Registry;
pub use store::{JobStore, MemoryStore};
pub use worker::{RetryPolicy, Worker, WorkerEvent, WorkerOptions};

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
