//! Circuit breaking for flaky dependencies.
//!
//! Each external dependency (primary database, third-party traffic and weather
//! APIs, the AI model) gets its own [`CircuitBreaker`]. Breakers are created at
//! startup and held by a [`BreakerRegistry`] owned by the pipeline.
//!
//! # Circuit Breaker States
//!
//! ```text
//! +--------+     failures >= threshold     +------+
//! | Closed | --------------------------->  | Open |
//! +--------+                               +------+
//!     ^                                     ^    |
//!     |  trial success        trial failure |    | timeout elapsed
//!     |                                     |    v
//!     +--------------------------------  +-----------+
//!                                        | Half-Open |
//!                                        +-----------+
//! ```
//!
//! A failed trial call while half-open reopens the circuit immediately and
//! restarts the timeout.

mod breaker;
mod config;
mod registry;

pub use breaker::{BreakerError, BreakerStats, CircuitBreaker, CircuitSnapshot, CircuitState};
pub use config::BreakerConfig;
pub use registry::BreakerRegistry;

/// Breaker guarding the primary database sink.
pub const DATABASE_BREAKER: &str = "database";
/// Breaker guarding the third-party traffic API.
pub const TRAFFIC_API_BREAKER: &str = "traffic-api";
/// Breaker guarding the third-party weather API.
pub const WEATHER_API_BREAKER: &str = "weather-api";
/// Breaker guarding the AI model dependency.
pub const AI_MODEL_BREAKER: &str = "ai-model";
