//! Job queue configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the job queue and its worker.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `FEEDGATE_QUEUE_TICK_MS` | u64 | `1000` | Worker wake-up interval |
/// | `FEEDGATE_QUEUE_MAX_RETRIES` | u32 | `3` | Default attempts per job |
/// | `FEEDGATE_QUEUE_RETRY_DELAY_MS` | u64 | `1000` | Default retry delay |
/// | `FEEDGATE_QUEUE_MAX_RETRY_DELAY_MS` | u64 | `60000` | Cap for exponential backoff |
/// | `FEEDGATE_QUEUE_MAX_STATUS_BATCH` | usize | `100` | Largest accepted status batch |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Interval between periodic worker activations, in milliseconds.
    pub tick_interval_ms: u64,
    /// Attempts a job gets before it is failed, unless overridden per job.
    pub max_retries: u32,
    /// Delay before a failed job is re-queued, unless overridden per job.
    pub retry_delay_ms: u64,
    /// Upper bound for exponential backoff delays.
    pub max_retry_delay_ms: u64,
    /// Largest accepted `status-batch` payload.
    pub max_status_batch: usize,
    /// Number of failed jobs kept for inspection.
    pub recent_failures: usize,
    /// Capacity of the job event channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 60_000,
            max_status_batch: 100,
            recent_failures: 50,
            event_capacity: 256,
        }
    }
}

impl QueueConfig {
    /// Returns the worker tick interval (at least 1ms).
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("FEEDGATE_QUEUE_TICK_MS") {
            self.tick_interval_ms = v;
        }
        if let Some(v) = env_parse("FEEDGATE_QUEUE_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = env_parse("FEEDGATE_QUEUE_RETRY_DELAY_MS") {
            self.retry_delay_ms = v;
        }
        if let Some(v) = env_parse("FEEDGATE_QUEUE_MAX_RETRY_DELAY_MS") {
            self.max_retry_delay_ms = v;
        }
        if let Some(v) = env_parse("FEEDGATE_QUEUE_MAX_STATUS_BATCH") {
            self.max_status_batch = v;
        }
        self
    }

    /// Builder method to set the tick interval.
    #[must_use]
    pub const fn with_tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    /// Builder method to set the default retry policy.
    #[must_use]
    pub const fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1000);
        assert_eq!(config.max_status_batch, 100);
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: QueueConfig = toml::from_str("max_retries = 5").unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay_ms, 1000);
    }

    #[test]
    fn test_zero_tick_is_clamped() {
        let config = QueueConfig::default().with_tick_interval_ms(0);
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
    }
}
