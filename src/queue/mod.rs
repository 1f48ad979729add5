//! Priority job queue with a single active worker.
//!
//! Producers enqueue typed [`JobPayload`]s; one worker task dequeues them in
//! priority order and hands them to a [`JobHandler`]. Retryable failures are
//! re-queued after a backoff delay until the job runs out of attempts.
//!
//! # Architecture
//!
//! ```text
//!  enqueue ──▶ ┌──────────────────────┐   notify   ┌─────────────────┐
//!              │ BinaryHeap           │───────────▶│ worker task     │
//!              │ (priority, sequence) │◀── tick ───│ select! loop    │
//!              └──────────▲───────────┘            └────────┬────────┘
//!                         │ retry timer                     │ process_next
//!                 ┌───────┴────────┐                ┌───────▼────────┐
//!                 │ RetryScheduled │◀── retryable ──│ JobHandler     │
//!                 └────────────────┘                │ (JobExecutor)  │
//!                                                   └───────┬────────┘
//!                                       Completed / Failed ◀┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use feedgate::queue::{JobOptions, JobPayload, JobQueue, Priority, QueueConfig};
//!
//! let queue = Arc::new(JobQueue::new(handler, QueueConfig::default()));
//! let worker = queue.start();
//! queue.enqueue(
//!     JobPayload::CacheCleanup { cache_type: "all".into() },
//!     JobOptions::new().with_priority(Priority::Low),
//! );
//! worker.stop().await;
//! ```

mod config;
mod events;
mod executor;
mod job;
mod job_queue;

pub use config::QueueConfig;
pub use events::JobEvent;
pub use executor::{JobExecutor, JobHandler};
pub use job::{
    BULK_UPSERT, Backoff, CACHE_CLEANUP, DATA_SYNC, JOB_TYPES, Job, JobId, JobOptions, JobPayload,
    JobStatus, Priority, STATUS_BATCH, StatusUpdate,
};
pub use job_queue::{FailedJob, JobOutcome, JobQueue, PriorityCounts, QueueStats, WorkerHandle};
