//! The ingestion pipeline context.
//!
//! [`Pipeline`] owns one instance of every component, built from a
//! [`FeedgateConfig`], and exposes the producer entry point plus the
//! administrative operations.
//!
//! ```text
//! producer ──▶ submit_batch ──▶ duplicate? ──yes──▶ Submission::Duplicate (prior result)
//!                                   │ no
//!                                   ▼
//!                          JobQueue (bulk-upsert) ──▶ JobExecutor ──▶ breaker ──▶ DataSink
//! ```

use crate::cache::{CacheStats, CacheStore, SweeperHandle};
use crate::config::FeedgateConfig;
use crate::dedup::DeduplicationEngine;
use crate::queue::{
    BULK_UPSERT, Job, JobEvent, JobExecutor, JobId, JobOptions, JobOutcome, JobPayload, JobQueue,
    QueueStats, WorkerHandle,
};
use crate::resilience::{BreakerRegistry, CircuitSnapshot, CircuitState};
use crate::sink::DataSink;
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Outcome of submitting a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Submission {
    /// An identical batch completed within the replay window; nothing was
    /// enqueued.
    Duplicate {
        /// Batch fingerprint.
        hash: String,
        /// When the earlier batch completed.
        completed_at: Option<String>,
        /// The earlier batch's result, if still cached.
        result: Option<Value>,
    },
    /// The batch was queued as a `bulk-upsert` job.
    Enqueued {
        /// The new job.
        job_id: JobId,
        /// Batch fingerprint.
        hash: String,
    },
}

impl Submission {
    /// Returns `true` for [`Submission::Duplicate`].
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Snapshot of every component's state.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    /// Queue statistics.
    pub queue: QueueStats,
    /// Cache statistics per namespace.
    pub cache: Vec<CacheStats>,
    /// Breaker states.
    pub breakers: Vec<CircuitSnapshot>,
}

/// The ingestion pipeline.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct Pipeline {
    config: FeedgateConfig,
    cache: Arc<CacheStore>,
    dedup: DeduplicationEngine,
    breakers: BreakerRegistry,
    queue: Arc<JobQueue>,
}

impl Pipeline {
    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the configured sink breaker is not
    /// one of the configured breakers.
    pub fn new(config: FeedgateConfig, sink: Arc<dyn DataSink>) -> Result<Self> {
        let cache = Arc::new(CacheStore::with_namespaces(config.namespaces.iter().cloned()));
        let dedup = DeduplicationEngine::new(Arc::clone(&cache), config.dedup.clone());
        let breakers = BreakerRegistry::new(config.breakers.iter().cloned());

        let mut executor = JobExecutor::new(
            dedup.clone(),
            Arc::clone(&cache),
            sink,
            config.queue.max_status_batch,
        );
        if let Some(name) = &config.sink_breaker {
            executor = executor.with_breaker(breakers.require(name)?);
        }
        let queue = Arc::new(JobQueue::new(Arc::new(executor), config.queue.clone()));

        tracing::info!(
            namespaces = config.namespaces.len(),
            breakers = breakers.names().len(),
            sink_breaker = config.sink_breaker.as_deref().unwrap_or("none"),
            dedup_enabled = config.dedup.enabled,
            "Pipeline initialized"
        );

        Ok(Self {
            config,
            cache,
            dedup,
            breakers,
            queue,
        })
    }

    /// Starts the queue worker and the cache sweeper.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(&self) -> PipelineHandle {
        PipelineHandle {
            worker: self.queue.start(),
            sweeper: self.cache.start_sweeper(),
        }
    }

    /// Submits a batch of records from `source`.
    ///
    /// A batch identical to one completed within the replay window is not
    /// enqueued; the earlier result is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `records` is empty.
    pub fn submit_batch(
        &self,
        source: &str,
        records: Vec<Value>,
        options: JobOptions,
    ) -> Result<Submission> {
        if records.is_empty() {
            return Err(Error::InvalidInput("batch has no records".to_string()));
        }

        let check = self.dedup.is_duplicate_batch(BULK_UPSERT, &records)?;
        if check.is_duplicate {
            return Ok(Submission::Duplicate {
                hash: check.hash,
                completed_at: check.completed_at,
                result: check.prior_result,
            });
        }

        let job_id = self.queue.enqueue(
            JobPayload::BulkUpsert {
                records,
                source: source.to_string(),
            },
            options,
        );
        Ok(Submission::Enqueued {
            job_id,
            hash: check.hash,
        })
    }

    /// Enqueues a typed job.
    pub fn enqueue(&self, payload: JobPayload, options: JobOptions) -> JobId {
        self.queue.enqueue(payload, options)
    }

    /// Enqueues a job from a type string and untyped payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownJobType`] or [`Error::InvalidInput`].
    pub fn enqueue_raw(&self, job_type: &str, payload: Value, options: JobOptions) -> Result<JobId> {
        self.queue.enqueue_raw(job_type, payload, options)
    }

    /// Runs one job without the background worker.
    pub async fn process_next(&self) -> Option<JobOutcome> {
        self.queue.process_next().await
    }

    /// Returns queue statistics.
    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Returns pending jobs in dispatch order.
    #[must_use]
    pub fn queued_jobs(&self) -> Vec<Job> {
        self.queue.queued_jobs()
    }

    /// Discards pending jobs. Returns how many.
    pub fn clear_queue(&self) -> usize {
        self.queue.clear_queue()
    }

    /// Subscribes to job lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.queue.subscribe()
    }

    /// Returns a breaker's state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown breaker.
    pub fn breaker_state(&self, name: &str) -> Result<CircuitState> {
        self.breakers.state(name)
    }

    /// Forces a breaker closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown breaker.
    pub fn reset_breaker(&self, name: &str) -> Result<()> {
        self.breakers.reset(name)
    }

    /// Returns cache statistics for every namespace.
    #[must_use]
    pub fn cache_stats(&self) -> Vec<CacheStats> {
        self.cache.all_stats()
    }

    /// Returns the state of every component.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            queue: self.queue.stats(),
            cache: self.cache.all_stats(),
            breakers: self.breakers.snapshots(),
        }
    }

    /// Waits until the queue is idle or `timeout` elapses.
    ///
    /// Returns `true` if the queue became idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let poll = async {
            while !self.queue.stats().is_idle() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    /// The cache store.
    #[must_use]
    pub const fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// The deduplication engine.
    #[must_use]
    pub const fn dedup(&self) -> &DeduplicationEngine {
        &self.dedup
    }

    /// The breaker registry.
    #[must_use]
    pub const fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// The effective configuration.
    #[must_use]
    pub const fn config(&self) -> &FeedgateConfig {
        &self.config
    }
}

/// Background tasks of a running pipeline. Dropping it aborts them.
#[derive(Debug)]
pub struct PipelineHandle {
    worker: WorkerHandle,
    sweeper: SweeperHandle,
}

impl PipelineHandle {
    /// Stops the worker after its in-flight job, then the sweeper.
    pub async fn stop(mut self) {
        self.sweeper.stop();
        self.worker.stop().await;
        tracing::info!("Pipeline stopped");
    }
}
