//! The namespaced cache store.

use super::namespace::{CacheStats, NamespaceConfig, Partition};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;

/// Namespaced key-value store with per-namespace TTL and capacity.
///
/// # Thread Safety
///
/// The namespace map sits behind an `RwLock` that is only write-locked by
/// `create_namespace`. Each namespace guards its entries with its own mutex
/// and keeps its counters in atomics, so work in one namespace never waits
/// on another. No lock is held across an `.await`.
///
/// # Expiry
///
/// Entries past their TTL are reported as misses on read even if no sweep has
/// removed them yet. Time is read from [`tokio::time::Instant`], so tests can
/// drive expiry with a paused clock.
#[derive(Debug, Default)]
pub struct CacheStore {
    partitions: RwLock<HashMap<String, Arc<Partition>>>,
}

impl CacheStore {
    /// Creates an empty store with no namespaces.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with the given namespaces.
    #[must_use]
    pub fn with_namespaces(configs: impl IntoIterator<Item = NamespaceConfig>) -> Self {
        let store = Self::new();
        for config in configs {
            store.create_namespace(&config.name, config.default_ttl, config.max_entries);
        }
        store
    }

    /// Establishes a namespace.
    ///
    /// Idempotent: an existing namespace keeps its entries and policy.
    /// Returns `true` if the namespace was created by this call.
    pub fn create_namespace(&self, name: &str, default_ttl: Duration, max_entries: usize) -> bool {
        let mut partitions = self
            .partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if partitions.contains_key(name) {
            return false;
        }
        partitions.insert(
            name.to_string(),
            Arc::new(Partition::new(NamespaceConfig::new(
                name,
                default_ttl,
                max_entries,
            ))),
        );
        tracing::debug!(
            namespace = name,
            ttl_secs = default_ttl.as_secs(),
            max_entries,
            "Created cache namespace"
        );
        true
    }

    /// Reads a value, counting a hit or a miss.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Namespace`] if the namespace does not exist.
    pub fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let partition = self.partition(namespace)?;
        let value = partition.get(key, Instant::now());
        let outcome = if value.is_some() { "hit" } else { "miss" };
        metrics::counter!(
            "cache_requests_total",
            "namespace" => namespace.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        Ok(value)
    }

    /// Writes a value with `ttl`, or the namespace default when `None`.
    ///
    /// When the namespace is full, expired entries are evicted first and then
    /// the oldest-inserted entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Namespace`] if the namespace does not exist.
    #[instrument(skip(self, value), fields(operation = "cache_set"))]
    pub fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let partition = self.partition(namespace)?;
        let ttl = ttl.unwrap_or(partition.config.default_ttl);
        let evicted = partition.set(key.to_string(), value, ttl, Instant::now());
        if evicted > 0 {
            tracing::debug!(namespace, evicted, "Evicted cache entries to make room");
            metrics::counter!(
                "cache_evictions_total",
                "namespace" => namespace.to_string(),
                "reason" => "capacity"
            )
            .increment(evicted as u64);
        }
        metrics::gauge!("cache_keys", "namespace" => namespace.to_string())
            .set(partition.len() as f64);
        Ok(())
    }

    /// Removes a key. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Namespace`] if the namespace does not exist.
    pub fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self.partition(namespace)?.delete(key))
    }

    /// Removes every entry in a namespace. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Namespace`] if the namespace does not exist.
    pub fn flush(&self, namespace: &str) -> Result<usize> {
        let removed = self.partition(namespace)?.flush();
        tracing::info!(namespace, removed, "Flushed cache namespace");
        Ok(removed)
    }

    /// Removes every entry in every namespace. Returns the number removed.
    pub fn flush_all(&self) -> usize {
        let removed = self
            .all_partitions()
            .iter()
            .map(|partition| partition.flush())
            .sum();
        tracing::info!(removed, "Flushed all cache namespaces");
        removed
    }

    /// Returns the counters for a namespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Namespace`] if the namespace does not exist.
    pub fn stats(&self, namespace: &str) -> Result<CacheStats> {
        Ok(self.partition(namespace)?.stats())
    }

    /// Returns counters for every namespace, sorted by name.
    #[must_use]
    pub fn all_stats(&self) -> Vec<CacheStats> {
        let mut stats: Vec<CacheStats> = self
            .all_partitions()
            .iter()
            .map(|partition| partition.stats())
            .collect();
        stats.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        stats
    }

    /// Returns the configured namespace names, sorted.
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Returns the policy of every namespace.
    #[must_use]
    pub fn namespace_configs(&self) -> Vec<NamespaceConfig> {
        self.all_partitions()
            .iter()
            .map(|partition| partition.config.clone())
            .collect()
    }

    /// Removes expired entries from a namespace now. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Namespace`] if the namespace does not exist.
    pub fn sweep_expired(&self, namespace: &str) -> Result<usize> {
        let partition = self.partition(namespace)?;
        let removed = partition.sweep(Instant::now());
        if removed > 0 {
            tracing::debug!(namespace, removed, "Swept expired cache entries");
            metrics::counter!(
                "cache_evictions_total",
                "namespace" => namespace.to_string(),
                "reason" => "expired"
            )
            .increment(removed as u64);
            metrics::gauge!("cache_keys", "namespace" => namespace.to_string())
                .set(partition.len() as f64);
        }
        Ok(removed)
    }

    fn partition(&self, namespace: &str) -> Result<Arc<Partition>> {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
            .ok_or_else(|| Error::Namespace(namespace.to_string()))
    }

    fn all_partitions(&self) -> Vec<Arc<Partition>> {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> CacheStore {
        let store = CacheStore::new();
        store.create_namespace("incidents", Duration::from_secs(300), 3);
        store
    }

    #[test]
    fn test_create_namespace_is_idempotent() {
        let store = store();
        store.set("incidents", "a", json!(1), None).unwrap();

        assert!(!store.create_namespace("incidents", Duration::from_secs(1), 1));
        assert_eq!(store.get("incidents", "a").unwrap(), Some(json!(1)));
        assert_eq!(store.namespaces(), vec!["incidents".to_string()]);
    }

    #[test]
    fn test_unknown_namespace_is_rejected() {
        let store = store();
        assert!(matches!(store.get("nope", "k"), Err(Error::Namespace(ns)) if ns == "nope"));
        assert!(matches!(
            store.set("nope", "k", json!(1), None),
            Err(Error::Namespace(_))
        ));
        assert!(matches!(store.flush("nope"), Err(Error::Namespace(_))));
        assert!(matches!(store.stats("nope"), Err(Error::Namespace(_))));
    }

    #[test]
    fn test_stats_track_operations() {
        let store = store();
        store.set("incidents", "a", json!("x"), None).unwrap();
        store.set("incidents", "b", json!("y"), None).unwrap();
        assert!(store.get("incidents", "a").unwrap().is_some());
        assert!(store.get("incidents", "z").unwrap().is_none());
        assert!(store.delete("incidents", "b").unwrap());

        let stats = store.stats("incidents").unwrap();
        assert_eq!(stats.keys, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 2);
        assert_eq!(stats.deletes, 1);
    }

    #[test]
    fn test_capacity_bound_holds() {
        let store = store();
        for i in 0..10 {
            store
                .set("incidents", &format!("k{i}"), json!(i), None)
                .unwrap();
        }
        let stats = store.stats("incidents").unwrap();
        assert_eq!(stats.keys, 3);
        assert_eq!(stats.evictions, 7);
        assert!(store.get("incidents", "k9").unwrap().is_some());
        assert!(store.get("incidents", "k0").unwrap().is_none());
    }

    #[test]
    fn test_flush_and_flush_all() {
        let store = store();
        store.create_namespace("cameras", Duration::from_secs(60), 10);
        store.set("incidents", "a", json!(1), None).unwrap();
        store.set("cameras", "c1", json!(1), None).unwrap();
        store.set("cameras", "c2", json!(2), None).unwrap();

        assert_eq!(store.flush("cameras").unwrap(), 2);
        store.set("cameras", "c3", json!(3), None).unwrap();
        assert_eq!(store.flush_all(), 2);
        assert!(store.all_stats().iter().all(|s| s.keys == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_not_found_before_sweep() {
        let store = store();
        store
            .set("incidents", "k", json!(1), Some(Duration::from_secs(1)))
            .unwrap();

        tokio::time::advance(Duration::from_millis(1100)).await;

        assert_eq!(store.get("incidents", "k").unwrap(), None);
        assert_eq!(store.stats("incidents").unwrap().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let store = store();
        store
            .set("incidents", "short", json!(1), Some(Duration::from_secs(1)))
            .unwrap();
        store.set("incidents", "long", json!(2), None).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.sweep_expired("incidents").unwrap(), 1);
        assert_eq!(store.stats("incidents").unwrap().keys, 1);
        assert!(store.get("incidents", "long").unwrap().is_some());
    }
}
