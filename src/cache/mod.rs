//! Namespaced TTL cache.
//!
//! The cache is split into named partitions ("namespaces"), each with its own
//! default TTL, entry capacity and counter set. Expired entries are invisible
//! to readers immediately and are physically removed by a background sweeper.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── CacheStore ────────────────────────────┐
//! │  deduplication      snapshots         results         aggregates   │
//! │  ┌────────────┐    ┌────────────┐    ┌────────────┐  ┌───────────┐ │
//! │  │ ttl 600s   │    │ ttl 3600s  │    │ ttl 600s   │  │ ttl 300s  │ │
//! │  │ max 10000  │    │ max 50000  │    │ max 1000   │  │ max 100   │ │
//! │  └────────────┘    └────────────┘    └────────────┘  └───────────┘ │
//! └──────────────────────────────▲─────────────────────────────────────┘
//!                                │ sweep_expired() every ttl/5
//!                          ┌─────┴─────┐
//!                          │  Sweeper  │
//!                          └───────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use feedgate::cache::{CacheStore, NamespaceConfig};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let store = CacheStore::new();
//! store.create_namespace("cameras", Duration::from_secs(60), 100);
//! store.set("cameras", "cam-1", json!({"status": "online"}), None)?;
//! assert!(store.get("cameras", "cam-1")?.is_some());
//! # Ok::<(), feedgate::Error>(())
//! ```

mod namespace;
mod store;
mod sweeper;

pub use namespace::{CacheStats, NamespaceConfig};
pub use store::CacheStore;
pub use sweeper::{SweeperHandle, sweep_interval};

/// Namespace holding completed-operation markers.
pub const DEDUP_NAMESPACE: &str = "deduplication";
/// Namespace holding per-record fingerprint snapshots.
pub const SNAPSHOT_NAMESPACE: &str = "snapshots";
/// Namespace holding results kept for idempotent replay.
pub const RESULTS_NAMESPACE: &str = "results";
/// Namespace holding refreshed aggregate views.
pub const AGGREGATES_NAMESPACE: &str = "aggregates";
