//! Breaker configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker.
///
/// # Environment Variables
///
/// Overrides are keyed by the breaker name, upper-cased with `-` turned into
/// `_`:
///
/// | Variable | Type | Description |
/// |----------|------|-------------|
/// | `FEEDGATE_BREAKER_<NAME>_THRESHOLD` | u32 | Failures before opening |
/// | `FEEDGATE_BREAKER_<NAME>_TIMEOUT_MS` | u64 | Open duration before a trial call |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Breaker name, one per dependency.
    pub name: String,
    /// Failures before opening the circuit.
    #[serde(default = "default_threshold")]
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub reset_timeout_ms: u64,
}

const fn default_threshold() -> u32 {
    5
}

const fn default_timeout_ms() -> u64 {
    30_000
}

impl BreakerConfig {
    /// Creates a breaker configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout_ms,
        }
    }

    /// Returns the open duration.
    #[must_use]
    pub const fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Default breakers: the database plus each upstream API.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(super::DATABASE_BREAKER, 5, 30_000),
            Self::new(super::TRAFFIC_API_BREAKER, 3, 60_000),
            Self::new(super::WEATHER_API_BREAKER, 3, 60_000),
            Self::new(super::AI_MODEL_BREAKER, 3, 120_000),
        ]
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        let prefix = format!(
            "FEEDGATE_BREAKER_{}",
            self.name.to_uppercase().replace('-', "_")
        );
        if let Ok(v) = std::env::var(format!("{prefix}_THRESHOLD")) {
            if let Ok(parsed) = v.parse::<u32>() {
                self.failure_threshold = parsed.max(1);
            }
        }
        if let Ok(v) = std::env::var(format!("{prefix}_TIMEOUT_MS")) {
            if let Ok(parsed) = v.parse::<u64>() {
                self.reset_timeout_ms = parsed;
            }
        }
        self
    }

    /// Sets the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the reset timeout in milliseconds.
    #[must_use]
    pub const fn with_reset_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.reset_timeout_ms = timeout_ms;
        self
    }
}
