//! Background expiry sweeping.

use super::CacheStore;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Returns how often a namespace with `ttl` is swept: a fifth of the TTL,
/// never below 100ms, and always shorter than the TTL itself. `None` for
/// namespaces without expiry.
#[must_use]
pub fn sweep_interval(ttl: Duration) -> Option<Duration> {
    if ttl.is_zero() {
        return None;
    }
    let floor = MIN_SWEEP_INTERVAL.min(ttl / 2);
    Some((ttl / 5).max(floor).max(Duration::from_nanos(1)))
}

/// Handle for the background sweeper task. Aborts the task on drop.
#[derive(Debug)]
pub struct SweeperHandle {
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stops the sweeper.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl CacheStore {
    /// Starts a background task that sweeps each namespace on its own interval.
    ///
    /// The task holds only a weak reference and exits once the store is
    /// dropped. Namespaces created after the sweeper starts are picked up on
    /// the next wake-up.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let store = Arc::downgrade(self);
        let task = tokio::spawn(run_sweeper(store));
        SweeperHandle { task: Some(task) }
    }
}

async fn run_sweeper(store: Weak<CacheStore>) {
    let mut next_due: HashMap<String, Instant> = HashMap::new();

    loop {
        let wait = {
            let Some(store) = store.upgrade() else {
                break;
            };
            let now = Instant::now();
            let mut wait = IDLE_SWEEP_INTERVAL;

            for config in store.namespace_configs() {
                let Some(interval) = sweep_interval(config.default_ttl) else {
                    continue;
                };
                let due = *next_due
                    .entry(config.name.clone())
                    .or_insert_with(|| now + interval);
                if due <= now {
                    if let Err(e) = store.sweep_expired(&config.name) {
                        tracing::warn!(namespace = %config.name, error = %e, "Cache sweep failed");
                    }
                    next_due.insert(config.name.clone(), now + interval);
                    wait = wait.min(interval);
                } else {
                    wait = wait.min(due - now);
                }
            }
            wait
        };

        tokio::time::sleep(wait).await;
    }

    tracing::debug!("Cache sweeper stopped");
}
