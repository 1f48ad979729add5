//! Content-addressed deduplication for ingested batches.
//!
//! Two levels of duplicate suppression:
//! 1. **Batch replay**: a whole batch whose fingerprint was completed within
//!    the TTL window is not executed again; the caller gets the prior result.
//! 2. **Record change filtering**: each record's fingerprint is compared with
//!    the last snapshot stored under its external identifier, and only new or
//!    changed records are passed on.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────── DeduplicationEngine ──────────────────────┐
//! │  ┌──────────────┐   ┌──────────────────┐   ┌─────────────────┐  │
//! │  │ Fingerprinter│   │ Batch replay     │   │ Change filter   │  │
//! │  │ SHA256 over  │──▶│ deduplication/   │   │ snapshots/      │  │
//! │  │ canonical    │   │ results/         │   │ <record id>     │  │
//! │  │ JSON         │   │ <op>:<hash>      │   │                 │  │
//! │  └──────────────┘   └──────────────────┘   └─────────────────┘  │
//! └──────────────────────────────┬──────────────────────────────────┘
//!                                ▼
//!                           CacheStore
//! ```
//!
//! Lookups fail open: when a comparison cannot be made the record is treated
//! as changed and the batch as new, so work may repeat but is never dropped.

mod config;
mod engine;
mod hasher;
mod types;

pub use config::DedupConfig;
pub use engine::DeduplicationEngine;
pub use hasher::Fingerprinter;
pub use types::{BatchCheck, FilterOutcome, SnapshotUpdate};
