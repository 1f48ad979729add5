//! Job model: identifiers, priorities, payloads and lifecycle state.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Job type string for [`JobPayload::BulkUpsert`].
pub const BULK_UPSERT: &str = "bulk-upsert";
/// Job type string for [`JobPayload::StatusBatch`].
pub const STATUS_BATCH: &str = "status-batch";
/// Job type string for [`JobPayload::CacheCleanup`].
pub const CACHE_CLEANUP: &str = "cache-cleanup";
/// Job type string for [`JobPayload::DataSync`].
pub const DATA_SYNC: &str = "data-sync";

/// Every job type string the queue accepts.
pub const JOB_TYPES: &[&str] = &[BULK_UPSERT, STATUS_BATCH, CACHE_CLEANUP, DATA_SYNC];

/// Unique identifier for a job.
///
/// UUID v7, so identifiers sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a new job ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dispatch priority. Higher priorities are always dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Dispatched before everything else.
    High,
    /// Default priority.
    #[default]
    Normal,
    /// Dispatched when nothing else is waiting.
    Low,
}

impl Priority {
    /// Ordering rank, higher dispatches first.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::High => 2,
            Self::Normal => 1,
            Self::Low => 0,
        }
    }

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(Error::InvalidInput(format!("unknown priority: {other}"))),
        }
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// Queued ──▶ Processing ──▶ Completed
///   ▲            │
///   │            ├──▶ RetryScheduled ──┐
///   │            │                     │
///   └────────────┼─────────────────────┘
///                └──▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the heap.
    Queued,
    /// Being executed by the worker.
    Processing,
    /// Failed with a retryable error; waiting for its backoff delay.
    RetryScheduled,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully and will not run again.
    Failed,
}

impl JobStatus {
    /// Returns `true` for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// How the retry delay grows with each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Every retry waits `retry_delay_ms`.
    #[default]
    Fixed,
    /// Retry `n` waits `retry_delay_ms * 2^(n-1)`, capped.
    Exponential,
}

impl Backoff {
    /// Delay before the retry following attempt number `attempts`.
    #[must_use]
    pub fn delay(self, retry_delay_ms: u64, attempts: u32, max_delay_ms: u64) -> Duration {
        let ms = match self {
            Self::Fixed => retry_delay_ms,
            Self::Exponential => {
                let exponent = attempts.saturating_sub(1).min(32);
                retry_delay_ms
                    .saturating_mul(1_u64 << exponent)
                    .min(max_delay_ms.max(retry_delay_ms))
            },
        };
        Duration::from_millis(ms)
    }
}

/// One status change in a `status-batch` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    /// External identifier of the monitored entity.
    pub id: String,
    /// New status value.
    pub status: String,
    /// When the producer observed the status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    /// Creates an update without an observation time.
    #[must_use]
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            observed_at: None,
        }
    }
}

/// Typed job payloads, one variant per job kind.
///
/// On the wire a payload is `{"type": "<job type>", "payload": {...}}` with
/// camelCase fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum JobPayload {
    /// Write a batch of records from one producer.
    BulkUpsert {
        /// The records.
        records: Vec<Value>,
        /// Producer name.
        source: String,
    },
    /// Apply a bounded batch of status changes.
    StatusBatch {
        /// The changes.
        status_updates: Vec<StatusUpdate>,
    },
    /// Flush a cache namespace, or all of them with `"all"`.
    CacheCleanup {
        /// Namespace name or `"all"`.
        cache_type: String,
    },
    /// Refresh a cached aggregate view.
    DataSync {
        /// Name of the aggregate.
        sync_type: String,
    },
}

impl JobPayload {
    /// Builds a payload from a job type string and untyped JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownJobType`] if `job_type` is not a known kind,
    /// or [`Error::InvalidInput`] if `payload` does not match its shape.
    pub fn from_raw(job_type: &str, payload: Value) -> Result<Self> {
        if !JOB_TYPES.contains(&job_type) {
            return Err(Error::UnknownJobType(job_type.to_string()));
        }
        let tagged = serde_json::json!({ "type": job_type, "payload": payload });
        serde_json::from_value(tagged)
            .map_err(|e| Error::InvalidInput(format!("malformed {job_type} payload: {e}")))
    }

    /// Returns the job type string.
    #[must_use]
    pub const fn job_type(&self) -> &'static str {
        match self {
            Self::BulkUpsert { .. } => BULK_UPSERT,
            Self::StatusBatch { .. } => STATUS_BATCH,
            Self::CacheCleanup { .. } => CACHE_CLEANUP,
            Self::DataSync { .. } => DATA_SYNC,
        }
    }
}

/// Per-job overrides for priority and retry policy.
///
/// Unset retry fields fall back to the queue configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptions {
    /// Dispatch priority.
    pub priority: Priority,
    /// Total attempts before the job fails.
    pub max_retries: Option<u32>,
    /// Base retry delay in milliseconds.
    pub retry_delay_ms: Option<u64>,
    /// Delay growth policy.
    pub backoff: Backoff,
}

impl JobOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to set the attempt limit.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Builder method to set the base retry delay.
    #[must_use]
    pub const fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = Some(ms);
        self
    }

    /// Builder method to set the backoff policy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// A unit of work owned by the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,
    /// Typed payload.
    pub payload: JobPayload,
    /// Dispatch priority.
    pub priority: Priority,
    /// Number of times execution has started.
    pub attempts: u32,
    /// Attempts allowed before the job fails.
    pub max_retries: u32,
    /// Base retry delay in milliseconds.
    pub retry_delay_ms: u64,
    /// Delay growth policy.
    pub backoff: Backoff,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

impl Job {
    /// Creates a queued job with a resolved retry policy.
    ///
    /// `max_retries` counts total attempts and is raised to at least 1.
    #[must_use]
    pub fn new(payload: JobPayload, priority: Priority, max_retries: u32, retry_delay_ms: u64) -> Self {
        Self {
            id: JobId::new(),
            payload,
            priority,
            attempts: 0,
            max_retries: max_retries.max(1),
            retry_delay_ms,
            backoff: Backoff::Fixed,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    /// Returns the job type string.
    #[must_use]
    pub const fn job_type(&self) -> &'static str {
        self.payload.job_type()
    }

    /// Returns `true` if a failure on the current attempt may be retried.
    #[must_use]
    pub const fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("bulk-upsert", json!({"records": [{"id": 1}], "source": "cams"}); "bulk upsert")]
    #[test_case("status-batch", json!({"statusUpdates": [{"id": "c1", "status": "down"}]}); "status batch")]
    #[test_case("cache-cleanup", json!({"cacheType": "all"}); "cache cleanup")]
    #[test_case("data-sync", json!({"syncType": "incident-summary"}); "data sync")]
    fn test_from_raw_accepts_known_types(job_type: &str, payload: Value) {
        let parsed = JobPayload::from_raw(job_type, payload).unwrap();
        assert_eq!(parsed.job_type(), job_type);
    }

    #[test]
    fn test_from_raw_rejects_unknown_type() {
        let err = JobPayload::from_raw("reindex", json!({})).unwrap_err();
        assert!(matches!(err, Error::UnknownJobType(t) if t == "reindex"));
    }

    #[test]
    fn test_from_raw_rejects_malformed_payload() {
        let err = JobPayload::from_raw("data-sync", json!({"sync": 1})).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_payload_wire_format() {
        let payload = JobPayload::StatusBatch {
            status_updates: vec![StatusUpdate::new("cam-1", "offline")],
        };
        let wire = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            wire,
            json!({"type": "status-batch", "payload": {"statusUpdates": [{"id": "cam-1", "status": "offline"}]}})
        );
    }

    #[test]
    fn test_priority_rank_and_parse() {
        assert!(Priority::High.rank() > Priority::Normal.rank());
        assert!(Priority::Normal.rank() > Priority::Low.rank());
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test_case(Backoff::Fixed, 1, 500; "fixed first")]
    #[test_case(Backoff::Fixed, 4, 500; "fixed fourth")]
    #[test_case(Backoff::Exponential, 1, 500; "exponential first")]
    #[test_case(Backoff::Exponential, 3, 2000; "exponential third")]
    #[test_case(Backoff::Exponential, 10, 5000; "exponential capped")]
    fn test_backoff_delay(backoff: Backoff, attempts: u32, expected_ms: u64) {
        assert_eq!(
            backoff.delay(500, attempts, 5000),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn test_job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn test_attempts_left() {
        let mut job = Job::new(
            JobPayload::DataSync {
                sync_type: "x".into(),
            },
            Priority::Normal,
            2,
            10,
        );
        job.attempts = 1;
        assert!(job.has_attempts_left());
        job.attempts = 2;
        assert!(!job.has_attempts_left());
    }

    #[test]
    fn test_zero_max_retries_means_one_attempt() {
        let mut job = Job::new(
            JobPayload::DataSync {
                sync_type: "x".into(),
            },
            Priority::Normal,
            0,
            10,
        );
        assert_eq!(job.max_retries, 1);
        assert!(job.has_attempts_left());
        job.attempts = 1;
        assert!(!job.has_attempts_left());
    }
}
