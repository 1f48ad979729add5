//! Cache namespace partitions and their counters.

use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Policy for a single cache namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Namespace name.
    pub name: String,
    /// TTL applied when `set` is called without an explicit TTL.
    ///
    /// `Duration::ZERO` disables expiry for the namespace.
    pub default_ttl: Duration,
    /// Maximum number of live entries.
    pub max_entries: usize,
}

impl NamespaceConfig {
    /// Creates a namespace policy.
    #[must_use]
    pub fn new(name: impl Into<String>, default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            name: name.into(),
            default_ttl,
            max_entries: max_entries.max(1),
        }
    }
}

/// Point-in-time counters for a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Namespace the counters belong to.
    pub namespace: String,
    /// Entries currently stored (may include expired entries not yet swept).
    pub keys: usize,
    /// Successful reads.
    pub hits: u64,
    /// Reads that found nothing or found an expired entry.
    pub misses: u64,
    /// Writes.
    pub sets: u64,
    /// Explicit deletes (flushes count one per removed entry).
    pub deletes: u64,
    /// Entries removed by capacity pressure or expiry sweeps.
    pub evictions: u64,
}

/// A stored value with its insertion time and TTL.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub(crate) value: Value,
    pub(crate) inserted_at: Instant,
    pub(crate) ttl: Duration,
}

impl CacheEntry {
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        !self.ttl.is_zero() && now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
}

/// A namespace's entries and counters.
///
/// Entries sit in an unbounded [`LruCache`] that is only ever read with
/// `peek`, so recency order equals insertion order and `pop_lru` yields the
/// oldest-inserted entry.
#[derive(Debug)]
pub(crate) struct Partition {
    pub(crate) config: NamespaceConfig,
    entries: Mutex<LruCache<String, CacheEntry>>,
    counters: Counters,
}

impl Partition {
    pub(crate) fn new(config: NamespaceConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(LruCache::unbounded()),
            counters: Counters::default(),
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self, key: &str, now: Instant) -> Option<Value> {
        let mut entries = self.entries();
        let lookup = entries
            .peek(key)
            .map(|entry| (!entry.is_expired(now)).then(|| entry.value.clone()));
        let found = match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                entries.pop(key);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                None
            },
            None => None,
        };
        drop(entries);

        if found.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Inserts a value, returning how many entries were evicted to make room.
    pub(crate) fn set(&self, key: String, value: Value, ttl: Duration, now: Instant) -> usize {
        let mut entries = self.entries();
        let mut evicted = 0;

        if !entries.contains(&key) && entries.len() >= self.config.max_entries {
            evicted += Self::remove_expired(&mut entries, now);
            while entries.len() >= self.config.max_entries {
                if entries.pop_lru().is_none() {
                    break;
                }
                evicted += 1;
            }
        }

        // `put` on an existing key moves it to the most-recent position, which
        // matches the reset insertion time.
        entries.put(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                ttl,
            },
        );
        drop(entries);

        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        self.counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    pub(crate) fn delete(&self, key: &str) -> bool {
        let removed = self.entries().pop(key).is_some();
        if removed {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub(crate) fn flush(&self) -> usize {
        let mut entries = self.entries();
        let removed = entries.len();
        entries.clear();
        drop(entries);
        self.counters
            .deletes
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub(crate) fn sweep(&self, now: Instant) -> usize {
        let removed = Self::remove_expired(&mut self.entries(), now);
        self.counters
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            namespace: self.config.name.clone(),
            keys: self.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    fn remove_expired(entries: &mut LruCache<String, CacheEntry>, now: Instant) -> usize {
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }
}
