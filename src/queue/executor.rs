//! Job handlers.

use super::{BULK_UPSERT, Job, JobPayload, StatusUpdate};
use crate::cache::{AGGREGATES_NAMESPACE, CacheStore};
use crate::dedup::DeduplicationEngine;
use crate::resilience::CircuitBreaker;
use crate::sink::DataSink;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use tracing::instrument;

/// Executes one attempt of a job.
///
/// The queue calls this once per attempt and classifies the error with
/// [`Error::is_retryable`].
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs `job`, returning a JSON summary on success.
    async fn handle(&self, job: &Job) -> Result<Value>;
}

/// The production [`JobHandler`]: dispatches each payload kind to the sink,
/// the cache and the deduplication engine.
///
/// Sink calls go through the optional circuit breaker; an open circuit
/// surfaces as [`Error::CircuitOpen`], which the queue retries.
pub struct JobExecutor {
    dedup: DeduplicationEngine,
    cache: Arc<CacheStore>,
    sink: Arc<dyn DataSink>,
    breaker: Option<Arc<CircuitBreaker>>,
    max_status_batch: usize,
}

impl JobExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        dedup: DeduplicationEngine,
        cache: Arc<CacheStore>,
        sink: Arc<dyn DataSink>,
        max_status_batch: usize,
    ) -> Self {
        Self {
            dedup,
            cache,
            sink,
            breaker: None,
            max_status_batch,
        }
    }

    /// Routes sink calls through `breaker`.
    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    async fn guarded<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match &self.breaker {
            Some(breaker) => breaker.call(operation).await.map_err(Error::from),
            None => operation().await,
        }
    }

    #[instrument(skip(self, records), fields(records = records.len()))]
    async fn bulk_upsert(&self, records: &[Value], source: &str) -> Result<Value> {
        if records.is_empty() {
            return Err(Error::InvalidInput("bulk-upsert requires at least one record".to_string()));
        }

        let check = self.dedup.is_duplicate_batch(BULK_UPSERT, records)?;
        if check.is_duplicate {
            return Ok(check.prior_result.unwrap_or_else(|| {
                json!({ "duplicate": true, "hash": check.hash, "completedAt": check.completed_at })
            }));
        }

        let outcome = self.dedup.diff_changed(records);
        let written = if outcome.changed.is_empty() {
            0
        } else {
            self.guarded(|| self.sink.bulk_write(source, &outcome.changed))
                .await?
        };
        self.dedup.commit_snapshots(&outcome);

        let summary = json!({
            "source": source,
            "hash": check.hash,
            "total": outcome.total_original,
            "written": written,
            "skipped": outcome.skipped.len(),
        });
        if let Err(e) = self
            .dedup
            .mark_completed(BULK_UPSERT, &check.hash, &summary, None)
        {
            tracing::warn!(error = %e, "Failed to record batch completion");
        }
        tracing::info!(
            source,
            total = outcome.total_original,
            written,
            skipped = outcome.skipped.len(),
            "Bulk upsert applied"
        );
        Ok(summary)
    }

    async fn status_batch(&self, updates: &[StatusUpdate]) -> Result<Value> {
        if updates.is_empty() {
            return Err(Error::InvalidInput("status-batch requires at least one update".to_string()));
        }
        if updates.len() > self.max_status_batch {
            return Err(Error::InvalidInput(format!(
                "status-batch holds {} updates, limit is {}",
                updates.len(),
                self.max_status_batch
            )));
        }
        if let Some(bad) = updates.iter().find(|u| u.id.is_empty() || u.status.is_empty()) {
            return Err(Error::InvalidInput(format!(
                "status update needs an id and a status (id: '{}')",
                bad.id
            )));
        }

        let applied = self
            .guarded(|| self.sink.apply_status_updates(updates))
            .await?;
        Ok(json!({ "applied": applied }))
    }

    fn cache_cleanup(&self, cache_type: &str) -> Result<Value> {
        let removed = if cache_type == "all" {
            self.cache.flush_all()
        } else {
            self.cache.flush(cache_type)?
        };
        Ok(json!({ "cacheType": cache_type, "removed": removed }))
    }

    async fn data_sync(&self, sync_type: &str) -> Result<Value> {
        if sync_type.is_empty() {
            return Err(Error::InvalidInput("data-sync requires a sync type".to_string()));
        }
        let view = self
            .guarded(|| self.sink.load_aggregate(sync_type))
            .await?;
        self.cache.set(AGGREGATES_NAMESPACE, sync_type, view, None)?;
        Ok(json!({ "syncType": sync_type, "cached": true }))
    }
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("breaker", &self.breaker.as_ref().map(|b| b.name().to_string()))
            .field("max_status_batch", &self.max_status_batch)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl JobHandler for JobExecutor {
    async fn handle(&self, job: &Job) -> Result<Value> {
        match &job.payload {
            JobPayload::BulkUpsert { records, source } => self.bulk_upsert(records, source).await,
            JobPayload::StatusBatch { status_updates } => self.status_batch(status_updates).await,
            JobPayload::CacheCleanup { cache_type } => self.cache_cleanup(cache_type),
            JobPayload::DataSync { sync_type } => self.data_sync(sync_type).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DEDUP_NAMESPACE, NamespaceConfig, RESULTS_NAMESPACE, SNAPSHOT_NAMESPACE};
    use crate::dedup::DedupConfig;
    use crate::queue::Priority;
    use crate::resilience::BreakerConfig;
    use crate::sink::MemorySink;
    use std::time::Duration;

    struct Fixture {
        executor: JobExecutor,
        sink: Arc<MemorySink>,
        cache: Arc<CacheStore>,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(CacheStore::with_namespaces(
            [DEDUP_NAMESPACE, SNAPSHOT_NAMESPACE, RESULTS_NAMESPACE, AGGREGATES_NAMESPACE]
                .map(|ns| NamespaceConfig::new(ns, Duration::from_secs(600), 100)),
        ));
        let sink = Arc::new(MemorySink::new());
        let dedup = DeduplicationEngine::new(Arc::clone(&cache), DedupConfig::default());
        let executor = JobExecutor::new(dedup, Arc::clone(&cache), sink.clone(), 3);
        Fixture {
            executor,
            sink,
            cache,
        }
    }

    fn job(payload: JobPayload) -> Job {
        Job::new(payload, Priority::Normal, 3, 10)
    }

    fn bulk(records: Vec<Value>) -> Job {
        job(JobPayload::BulkUpsert {
            records,
            source: "cams".to_string(),
        })
    }

    #[tokio::test]
    async fn test_bulk_upsert_writes_only_changes() {
        let f = fixture();
        let first = vec![json!({"id": 1, "s": "a"}), json!({"id": 2, "s": "b"})];
        let summary = f.executor.handle(&bulk(first)).await.unwrap();
        assert_eq!(summary["written"], 2);

        let second = vec![json!({"id": 1, "s": "a"}), json!({"id": 2, "s": "c"})];
        let summary = f.executor.handle(&bulk(second)).await.unwrap();
        assert_eq!(summary["written"], 1);
        assert_eq!(summary["skipped"], 1);
        assert_eq!(f.sink.written_count(), 3);
    }

    #[tokio::test]
    async fn test_bulk_upsert_replays_duplicate_batch() {
        let f = fixture();
        let records = vec![json!({"id": 1})];
        let first = f.executor.handle(&bulk(records.clone())).await.unwrap();
        let calls = f.sink.call_count();

        let replay = f.executor.handle(&bulk(records)).await.unwrap();
        assert_eq!(replay, first);
        assert_eq!(f.sink.call_count(), calls);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_delta_for_retry() {
        let f = fixture();
        let records = vec![json!({"id": 1}), json!({"id": 2})];
        f.sink.fail_next(1);

        let err = f.executor.handle(&bulk(records.clone())).await.unwrap_err();
        assert!(err.is_retryable());

        let summary = f.executor.handle(&bulk(records)).await.unwrap();
        assert_eq!(summary["written"], 2);
    }

    #[tokio::test]
    async fn test_empty_bulk_is_invalid() {
        let err = fixture().executor.handle(&bulk(vec![])).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_status_batch_limits() {
        let f = fixture();
        let updates = |n: usize| {
            job(JobPayload::StatusBatch {
                status_updates: (0..n)
                    .map(|i| StatusUpdate::new(format!("cam-{i}"), "online"))
                    .collect(),
            })
        };

        assert!(matches!(
            f.executor.handle(&updates(0)).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            f.executor.handle(&updates(4)).await,
            Err(Error::InvalidInput(_))
        ));
        let summary = f.executor.handle(&updates(3)).await.unwrap();
        assert_eq!(summary["applied"], 3);
        assert_eq!(f.sink.status_of("cam-2").as_deref(), Some("online"));
    }

    #[tokio::test]
    async fn test_cache_cleanup() {
        let f = fixture();
        f.cache.set(AGGREGATES_NAMESPACE, "a", json!(1), None).unwrap();
        f.cache.set(SNAPSHOT_NAMESPACE, "b", json!(1), None).unwrap();

        let one = job(JobPayload::CacheCleanup {
            cache_type: AGGREGATES_NAMESPACE.to_string(),
        });
        assert_eq!(f.executor.handle(&one).await.unwrap()["removed"], 1);

        let all = job(JobPayload::CacheCleanup {
            cache_type: "all".to_string(),
        });
        assert_eq!(f.executor.handle(&all).await.unwrap()["removed"], 1);

        let bad = job(JobPayload::CacheCleanup {
            cache_type: "nope".to_string(),
        });
        let err = f.executor.handle(&bad).await.unwrap_err();
        assert!(matches!(err, Error::Namespace(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_data_sync_caches_view() {
        let f = fixture();
        let sync = job(JobPayload::DataSync {
            sync_type: "incident-summary".to_string(),
        });
        f.executor.handle(&sync).await.unwrap();

        let view = f
            .cache
            .get(AGGREGATES_NAMESPACE, "incident-summary")
            .unwrap()
            .unwrap();
        assert_eq!(view["syncType"], "incident-summary");
    }

    #[tokio::test]
    async fn test_open_breaker_is_retryable() {
        let f = fixture();
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::new("database", 1, 60_000)));
        let executor = f.executor.with_breaker(Arc::clone(&breaker));
        f.sink.fail_next(1);

        let sync = job(JobPayload::DataSync {
            sync_type: "x".to_string(),
        });
        assert!(matches!(
            executor.handle(&sync).await,
            Err(Error::Transient { .. })
        ));
        let calls = f.sink.call_count();

        let err = executor.handle(&sync).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { ref breaker } if breaker == "database"));
        assert!(err.is_retryable());
        assert_eq!(f.sink.call_count(), calls);
    }
}
