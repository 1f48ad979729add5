//! The deduplication engine.

use super::{BatchCheck, DedupConfig, FilterOutcome, Fingerprinter, SnapshotUpdate};
use crate::cache::{CacheStore, DEDUP_NAMESPACE, RESULTS_NAMESPACE, SNAPSHOT_NAMESPACE};
use crate::{Error, Result};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Batch replay detection and record change filtering over a [`CacheStore`].
///
/// The store must provide the `deduplication`, `snapshots` and `results`
/// namespaces. A missing namespace is treated like any other cache failure:
/// the engine fails open and reports the batch as new and records as changed.
#[derive(Debug, Clone)]
pub struct DeduplicationEngine {
    cache: Arc<CacheStore>,
    fingerprinter: Fingerprinter,
    config: DedupConfig,
}

impl DeduplicationEngine {
    /// Creates an engine over `cache`.
    #[must_use]
    pub fn new(cache: Arc<CacheStore>, config: DedupConfig) -> Self {
        let fingerprinter = Fingerprinter::new(config.volatile_fields.iter().cloned());
        Self {
            cache,
            fingerprinter,
            config,
        }
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Fingerprints a single record.
    #[must_use]
    pub fn fingerprint(&self, record: &Value) -> String {
        self.fingerprinter.fingerprint(record)
    }

    /// Fingerprints a batch, independent of record order.
    #[must_use]
    pub fn fingerprint_batch(&self, records: &[Value]) -> String {
        self.fingerprinter.fingerprint_batch(records)
    }

    /// Checks whether `operation` already completed for an identical batch.
    ///
    /// Cache failures are logged and reported as a new batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `operation` is empty.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub fn is_duplicate_batch(&self, operation: &str, records: &[Value]) -> Result<BatchCheck> {
        if operation.is_empty() {
            return Err(Error::InvalidInput("operation must not be empty".to_string()));
        }

        let hash = self.fingerprint_batch(records);
        if !self.config.enabled {
            return Ok(BatchCheck::new_batch(hash));
        }

        let key = dedup_key(operation, &hash);
        let completed_at = match self.cache.get(DEDUP_NAMESPACE, &key) {
            Ok(Some(value)) => value.as_str().map(ToString::to_string),
            Ok(None) => {
                metrics::counter!("dedup_checks_total", "outcome" => "new").increment(1);
                return Ok(BatchCheck::new_batch(hash));
            },
            Err(e) => {
                tracing::warn!(operation, error = %e, "Duplicate check failed, treating batch as new");
                metrics::counter!("dedup_checks_total", "outcome" => "error").increment(1);
                return Ok(BatchCheck::new_batch(hash));
            },
        };

        let prior_result = self
            .cache
            .get(RESULTS_NAMESPACE, &key)
            .unwrap_or_else(|e| {
                tracing::warn!(operation, error = %e, "Replay result lookup failed");
                None
            });

        tracing::info!(
            operation,
            hash = %hash,
            completed_at = completed_at.as_deref().unwrap_or("unknown"),
            "Skipping duplicate batch"
        );
        metrics::counter!("dedup_checks_total", "outcome" => "duplicate").increment(1);
        Ok(BatchCheck::duplicate(hash, completed_at, prior_result))
    }

    /// Records that `operation` completed for the batch `hash`.
    ///
    /// Stores the completion time and `result` for idempotent replay. A
    /// `ttl` of `None` uses the configured bulk window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Namespace`] if the dedup namespaces are missing.
    #[instrument(skip(self, result))]
    pub fn mark_completed(
        &self,
        operation: &str,
        hash: &str,
        result: &Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let ttl = ttl.unwrap_or(self.config.bulk_ttl);
        let key = dedup_key(operation, hash);
        let completed_at = Utc::now().to_rfc3339();

        self.cache
            .set(DEDUP_NAMESPACE, &key, Value::String(completed_at), Some(ttl))?;
        self.cache
            .set(RESULTS_NAMESPACE, &key, result.clone(), Some(ttl))?;
        tracing::debug!(operation, hash, ttl_secs = ttl.as_secs(), "Marked batch completed");
        Ok(())
    }

    /// Splits `records` into changed and unchanged without touching snapshots.
    ///
    /// The returned outcome carries the snapshot writes that
    /// [`commit_snapshots`](Self::commit_snapshots) applies once the changed
    /// records have been persisted.
    #[must_use]
    pub fn diff_changed(&self, records: &[Value]) -> FilterOutcome {
        let mut outcome = FilterOutcome {
            total_original: records.len(),
            ..FilterOutcome::default()
        };

        for record in records {
            if !self.config.enabled {
                outcome.changed.push(record.clone());
                continue;
            }
            let Some(record_id) = self.record_id(record) else {
                outcome.changed.push(record.clone());
                continue;
            };

            let fingerprint = self.fingerprint(record);
            let stored = match self.cache.get(SNAPSHOT_NAMESPACE, &record_id) {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::warn!(record_id, error = %e, "Snapshot lookup failed, treating record as changed");
                    None
                },
            };

            if stored.as_ref().and_then(Value::as_str) == Some(fingerprint.as_str()) {
                outcome.skipped.push(record.clone());
            } else {
                outcome.changed.push(record.clone());
                outcome.snapshot_updates.push(SnapshotUpdate {
                    record_id,
                    fingerprint,
                });
            }
        }

        if !outcome.skipped.is_empty() {
            tracing::debug!(
                total = outcome.total_original,
                changed = outcome.changed.len(),
                skipped = outcome.skipped.len(),
                "Filtered unchanged records"
            );
        }
        metrics::counter!("dedup_records_skipped_total").increment(outcome.skipped.len() as u64);
        outcome
    }

    /// Writes the snapshot updates carried by `outcome`.
    ///
    /// Returns the number of snapshots written. Failures are logged and
    /// skipped; the affected records will simply be seen as changed again.
    pub fn commit_snapshots(&self, outcome: &FilterOutcome) -> usize {
        let ttl = self.config.snapshot_ttl;
        outcome
            .snapshot_updates
            .iter()
            .filter(|update| {
                self.cache
                    .set(
                        SNAPSHOT_NAMESPACE,
                        &update.record_id,
                        Value::String(update.fingerprint.clone()),
                        ttl,
                    )
                    .map_err(|e| {
                        tracing::warn!(record_id = %update.record_id, error = %e, "Snapshot write failed");
                    })
                    .is_ok()
            })
            .count()
    }

    /// Returns the new or changed records and updates their snapshots.
    #[must_use]
    pub fn filter_changed(&self, records: &[Value]) -> FilterOutcome {
        let outcome = self.diff_changed(records);
        self.commit_snapshots(&outcome);
        outcome
    }

    /// Extracts a record's external identifier.
    ///
    /// Uses the first configured id field holding a non-empty string or a
    /// number. Non-object records have no identifier.
    #[must_use]
    pub fn record_id(&self, record: &Value) -> Option<String> {
        let object = record.as_object()?;
        self.config
            .id_fields
            .iter()
            .find_map(|field| match object.get(field)? {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

fn dedup_key(operation: &str, hash: &str) -> String {
    format!("{operation}:{hash}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NamespaceConfig;
    use serde_json::json;

    fn cache() -> Arc<CacheStore> {
        Arc::new(CacheStore::with_namespaces([
            NamespaceConfig::new(DEDUP_NAMESPACE, Duration::from_secs(600), 100),
            NamespaceConfig::new(SNAPSHOT_NAMESPACE, Duration::from_secs(3600), 100),
            NamespaceConfig::new(RESULTS_NAMESPACE, Duration::from_secs(600), 100),
        ]))
    }

    fn engine() -> DeduplicationEngine {
        DeduplicationEngine::new(cache(), DedupConfig::default())
    }

    fn cameras() -> Vec<Value> {
        (1..=5)
            .map(|i| json!({"cameraId": format!("cam-{i}"), "status": "online", "lastChecked": "t0"}))
            .collect()
    }

    #[test]
    fn test_new_batch_then_duplicate() {
        let engine = engine();
        let records = cameras();

        let first = engine.is_duplicate_batch("bulk-upsert", &records).unwrap();
        assert!(!first.is_duplicate);

        engine
            .mark_completed("bulk-upsert", &first.hash, &json!({"written": 5}), None)
            .unwrap();

        let second = engine.is_duplicate_batch("bulk-upsert", &records).unwrap();
        assert!(second.is_duplicate);
        assert_eq!(second.hash, first.hash);
        assert_eq!(second.prior_result, Some(json!({"written": 5})));
        assert!(second.completed_at.is_some());
    }

    /// Collects the fields of every new span.
    #[derive(Clone, Default)]
    struct SpanFields(Arc<std::sync::Mutex<Vec<(String, String)>>>);

    struct FieldVisitor<'a>(&'a mut Vec<(String, String)>);

    impl tracing::field::Visit for FieldVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.0.push((field.name().to_string(), format!("{value:?}")));
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanFields {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            attrs.record(&mut FieldVisitor(&mut self.0.lock().unwrap()));
        }
    }

    #[test]
    fn test_spans_carry_operation_and_hash() {
        use tracing_subscriber::layer::SubscriberExt;

        let engine = engine();
        let records = cameras();
        let spans = SpanFields::default();
        let subscriber = tracing_subscriber::registry().with(spans.clone());

        tracing::subscriber::with_default(subscriber, || {
            engine.is_duplicate_batch("bulk-upsert", &records).unwrap();
            engine
                .mark_completed("bulk-upsert", "abc123", &json!({}), None)
                .unwrap();
        });

        let fields = spans.0.lock().unwrap();
        let has = |name: &str, value: &str| {
            fields.iter().any(|(n, v)| n == name && v.contains(value))
        };
        assert!(has("operation", "bulk-upsert"), "{fields:?}");
        assert!(has("records", "5"), "{fields:?}");
        assert!(has("hash", "abc123"), "{fields:?}");
    }

    #[test]
    fn test_duplicate_is_scoped_by_operation() {
        let engine = engine();
        let records = cameras();
        let check = engine.is_duplicate_batch("bulk-upsert", &records).unwrap();
        engine
            .mark_completed("bulk-upsert", &check.hash, &json!(null), None)
            .unwrap();

        assert!(!engine.is_duplicate_batch("resync", &records).unwrap().is_duplicate);
    }

    #[test]
    fn test_empty_operation_is_rejected() {
        assert!(matches!(
            engine().is_duplicate_batch("", &cameras()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_expires_after_ttl() {
        let engine = engine();
        let records = cameras();
        let check = engine.is_duplicate_batch("bulk-upsert", &records).unwrap();
        engine
            .mark_completed("bulk-upsert", &check.hash, &json!(1), Some(Duration::from_secs(1)))
            .unwrap();

        tokio::time::advance(Duration::from_millis(1100)).await;

        assert!(!engine.is_duplicate_batch("bulk-upsert", &records).unwrap().is_duplicate);
    }

    #[test]
    fn test_filter_five_records_three_unchanged() {
        let engine = engine();
        let mut records = cameras();
        engine.filter_changed(&records);

        records[0]["status"] = json!("offline");
        records[4]["status"] = json!("offline");
        for record in &mut records {
            record["lastChecked"] = json!("t1");
        }

        let outcome = engine.filter_changed(&records);
        assert_eq!(outcome.changed.len(), 2);
        assert_eq!(outcome.skipped.len(), 3);
        assert_eq!(outcome.total_original, 5);
        assert_eq!(outcome.changed[0]["cameraId"], "cam-1");
        assert_eq!(outcome.changed[1]["cameraId"], "cam-5");
    }

    #[test]
    fn test_filter_twice_skips_everything() {
        let engine = engine();
        let records = cameras();
        assert_eq!(engine.filter_changed(&records).changed.len(), 5);

        let again = engine.filter_changed(&records);
        assert!(again.is_unchanged());
        assert_eq!(again.skipped.len(), 5);
    }

    #[test]
    fn test_diff_does_not_write_snapshots() {
        let engine = engine();
        let records = cameras();

        let outcome = engine.diff_changed(&records);
        assert_eq!(outcome.snapshot_updates.len(), 5);
        assert_eq!(engine.diff_changed(&records).changed.len(), 5);

        assert_eq!(engine.commit_snapshots(&outcome), 5);
        assert!(engine.diff_changed(&records).is_unchanged());
    }

    #[test]
    fn test_records_without_id_always_pass() {
        let engine = engine();
        let records = vec![json!({"status": "online"}), json!("bare"), json!(42)];
        engine.filter_changed(&records);

        let outcome = engine.filter_changed(&records);
        assert_eq!(outcome.changed.len(), 3);
        assert!(outcome.snapshot_updates.is_empty());
    }

    #[test]
    fn test_missing_namespaces_fail_open() {
        let engine = DeduplicationEngine::new(Arc::new(CacheStore::new()), DedupConfig::default());
        let records = cameras();

        assert!(!engine.is_duplicate_batch("bulk-upsert", &records).unwrap().is_duplicate);
        assert_eq!(engine.filter_changed(&records).changed.len(), 5);
        assert!(matches!(
            engine.mark_completed("bulk-upsert", "h", &json!(1), None),
            Err(Error::Namespace(_))
        ));
    }

    #[test]
    fn test_disabled_engine_passes_everything() {
        let engine = DeduplicationEngine::new(cache(), DedupConfig::default().with_enabled(false));
        let records = cameras();
        let check = engine.is_duplicate_batch("bulk-upsert", &records).unwrap();
        engine
            .mark_completed("bulk-upsert", &check.hash, &json!(1), None)
            .unwrap();

        assert!(!engine.is_duplicate_batch("bulk-upsert", &records).unwrap().is_duplicate);
        engine.filter_changed(&records);
        assert_eq!(engine.filter_changed(&records).changed.len(), 5);
    }

    #[test]
    fn test_record_id_field_precedence() {
        let engine = engine();
        assert_eq!(engine.record_id(&json!({"id": 7, "cameraId": "c"})), Some("7".into()));
        assert_eq!(engine.record_id(&json!({"id": "", "externalId": "x"})), Some("x".into()));
        assert_eq!(engine.record_id(&json!({"camera_id": "c-9"})), Some("c-9".into()));
        assert_eq!(engine.record_id(&json!({"id": null})), None);
        assert_eq!(engine.record_id(&json!([1, 2])), None);
    }
}
