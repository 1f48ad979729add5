//! Downstream data sinks.
//!
//! A [`DataSink`] is where the pipeline persists changed records and status
//! updates, and where aggregate views are loaded from. The real store is
//! supplied by the embedding application; [`MemorySink`] keeps everything in
//! process and can inject failures.

use crate::queue::StatusUpdate;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Persistence target for the job handlers.
///
/// Implementations should return [`Error::Transient`] for failures that may
/// succeed on retry; the queue retries those and fails the job on anything
/// else.
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Writes `records` produced by `source`. Returns the number written.
    async fn bulk_write(&self, source: &str, records: &[Value]) -> Result<usize>;

    /// Applies status changes. Returns the number applied.
    async fn apply_status_updates(&self, updates: &[StatusUpdate]) -> Result<usize>;

    /// Computes the aggregate view named `sync_type`.
    async fn load_aggregate(&self, sync_type: &str) -> Result<Value>;
}

#[derive(Debug, Default)]
struct MemorySinkState {
    records: BTreeMap<String, Vec<Value>>,
    statuses: HashMap<String, StatusUpdate>,
}

/// In-memory [`DataSink`] with failure injection.
///
/// # Example
///
/// ```rust
/// use feedgate::sink::{DataSink, MemorySink};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let sink = MemorySink::new();
/// sink.fail_next(1);
/// assert!(sink.bulk_write("cams", &[json!({"id": 1})]).await.is_err());
/// assert_eq!(sink.bulk_write("cams", &[json!({"id": 1})]).await?, 1);
/// # Ok::<(), feedgate::Error>(())
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemorySinkState>,
    fail_remaining: AtomicU32,
    unavailable: AtomicBool,
    calls: AtomicU64,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::Relaxed);
    }

    /// Makes every call fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of calls received, including failed ones.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Total records written across all sources.
    #[must_use]
    pub fn written_count(&self) -> usize {
        self.lock().records.values().map(Vec::len).sum()
    }

    /// Records written by `source`, in write order.
    #[must_use]
    pub fn records_for(&self, source: &str) -> Vec<Value> {
        self.lock().records.get(source).cloned().unwrap_or_default()
    }

    /// The latest status applied for `id`.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<String> {
        self.lock().statuses.get(id).map(|u| u.status.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemorySinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self, operation: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(Error::transient(operation, "sink unavailable"));
        }
        let injected = self
            .fail_remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::transient(operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl DataSink for MemorySink {
    async fn bulk_write(&self, source: &str, records: &[Value]) -> Result<usize> {
        self.admit("bulk_write")?;
        self.lock()
            .records
            .entry(source.to_string())
            .or_default()
            .extend_from_slice(records);
        Ok(records.len())
    }

    async fn apply_status_updates(&self, updates: &[StatusUpdate]) -> Result<usize> {
        self.admit("apply_status_updates")?;
        let mut state = self.lock();
        for update in updates {
            state.statuses.insert(update.id.clone(), update.clone());
        }
        Ok(updates.len())
    }

    async fn load_aggregate(&self, sync_type: &str) -> Result<Value> {
        self.admit("load_aggregate")?;
        let state = self.lock();
        let by_source: BTreeMap<&str, usize> = state
            .records
            .iter()
            .map(|(source, records)| (source.as_str(), records.len()))
            .collect();
        let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
        for update in state.statuses.values() {
            *by_status.entry(update.status.as_str()).or_default() += 1;
        }
        Ok(json!({
            "syncType": sync_type,
            "records": state.records.values().map(Vec::len).sum::<usize>(),
            "bySource": by_source,
            "byStatus": by_status,
            "refreshedAt": chrono::Utc::now().to_rfc3339(),
        }))
    }
}
