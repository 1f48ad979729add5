//! Deduplication result types.

use serde::Serialize;
use serde_json::Value;

/// Result of a batch duplicate check.
///
/// # Example
///
/// ```rust
/// use feedgate::dedup::BatchCheck;
///
/// let check = BatchCheck::new_batch("abc".to_string());
/// assert!(!check.is_duplicate);
/// assert!(check.prior_result.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchCheck {
    /// Whether the identical batch was completed within the TTL window.
    pub is_duplicate: bool,
    /// The batch fingerprint.
    pub hash: String,
    /// Result recorded by the earlier completion, if still cached.
    pub prior_result: Option<Value>,
    /// RFC 3339 completion time of the earlier run.
    pub completed_at: Option<String>,
}

impl BatchCheck {
    /// A batch that has not been seen.
    #[must_use]
    pub const fn new_batch(hash: String) -> Self {
        Self {
            is_duplicate: false,
            hash,
            prior_result: None,
            completed_at: None,
        }
    }

    /// A batch completed earlier.
    #[must_use]
    pub const fn duplicate(
        hash: String,
        completed_at: Option<String>,
        prior_result: Option<Value>,
    ) -> Self {
        Self {
            is_duplicate: true,
            hash,
            prior_result,
            completed_at,
        }
    }
}

/// A snapshot write deferred until the caller commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotUpdate {
    /// The record's external identifier.
    pub record_id: String,
    /// The record's new fingerprint.
    pub fingerprint: String,
}

/// Outcome of filtering a batch against stored snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    /// New or changed records, in input order.
    pub changed: Vec<Value>,
    /// Records identical to their snapshot, in input order.
    pub skipped: Vec<Value>,
    /// Number of records examined.
    pub total_original: usize,
    /// Snapshot writes for the changed records that have an identifier.
    pub snapshot_updates: Vec<SnapshotUpdate>,
}

impl FilterOutcome {
    /// Returns `true` when nothing needs to be written.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.changed.is_empty()
    }
}
