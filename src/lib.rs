//! # Feedgate
//!
//! A resilient, in-memory ingestion pipeline for traffic-incident feeds.
//!
//! Feedgate absorbs bursty writes from external producers (camera feeds,
//! status checks) and pushes only the changed data to a downstream sink.
//!
//! ## Features
//!
//! - Namespaced TTL cache with per-namespace capacity and background sweeps
//! - Content-addressed deduplication with idempotent replay of completed batches
//! - Priority job queue with a single active worker and retry/backoff
//! - Per-dependency circuit breakers with fallbacks
//!
//! ## Example
//!
//! ```rust,ignore
//! use feedgate::{FeedgateConfig, Pipeline, JobOptions};
//! use feedgate::sink::MemorySink;
//! use std::sync::Arc;
//!
//! let pipeline = Pipeline::new(FeedgateConfig::default(), Arc::new(MemorySink::new()))?;
//! let handle = pipeline.start();
//! let submission = pipeline.submit_batch("camera-feed", records, JobOptions::default())?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod cache;
pub mod config;
pub mod dedup;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod resilience;
pub mod sink;

pub use cache::{CacheStats, CacheStore, NamespaceConfig};
pub use config::FeedgateConfig;
pub use dedup::{DedupConfig, DeduplicationEngine, Fingerprinter};
pub use pipeline::{Pipeline, PipelineHandle, Submission};
pub use queue::{Job, JobId, JobOptions, JobPayload, JobQueue, JobStatus, Priority, QueueStats};
pub use resilience::{BreakerError, BreakerRegistry, CircuitBreaker, CircuitState};
pub use sink::{DataSink, MemorySink};

/// Error type for feedgate operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When | Retried by the queue |
/// |---------|-------------|----------------------|
/// | `InvalidInput` | Malformed job payload, oversized status batch, empty bulk batch | no |
/// | `Transient` | Sink or upstream failure during execution | yes |
/// | `UnknownJobType` | A string job type has no matching job kind | no |
/// | `Namespace` | Cache operation names a namespace that does not exist | no |
/// | `CircuitOpen` | A circuit breaker rejected the call | yes |
/// | `OperationFailed` | Config loading, observability setup, other local failures | no |
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A job payload cannot be deserialized
    /// - A status batch is empty or exceeds the configured limit
    /// - A bulk upsert carries no records
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A retryable failure in a downstream dependency.
    #[error("transient failure in '{operation}': {cause}")]
    Transient {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The job type string does not map to a known job kind.
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    /// The cache namespace does not exist.
    #[error("invalid cache namespace: {0}")]
    Namespace(String),

    /// A circuit breaker rejected the call without running it.
    #[error("circuit breaker '{breaker}' is open")]
    CircuitOpen {
        /// Name of the breaker that rejected the call.
        breaker: String,
    },

    /// An operation failed.
    ///
    /// Raised when:
    /// - The configuration file cannot be read or parsed
    /// - Logging or metrics fail to initialize
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Builds a [`Error::Transient`] from any displayable cause.
    pub fn transient(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Transient {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns `true` when retrying the same work could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::CircuitOpen { .. })
    }

    /// Short label used for metrics and log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Transient { .. } => "transient",
            Self::UnknownJobType(_) => "unknown_job_type",
            Self::Namespace(_) => "namespace",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::OperationFailed { .. } => "operation_failed",
        }
    }
}

/// Result type alias for feedgate operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("bad payload".to_string());
        assert_eq!(err.to_string(), "invalid input: bad payload");

        let err = Error::transient("bulk_write", "connection reset");
        assert_eq!(
            err.to_string(),
            "transient failure in 'bulk_write': connection reset"
        );

        let err = Error::CircuitOpen {
            breaker: "database".to_string(),
        };
        assert_eq!(err.to_string(), "circuit breaker 'database' is open");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::transient("op", "x").is_retryable());
        assert!(
            Error::CircuitOpen {
                breaker: "db".to_string()
            }
            .is_retryable()
        );
        assert!(!Error::InvalidInput("x".to_string()).is_retryable());
        assert!(!Error::UnknownJobType("x".to_string()).is_retryable());
        assert!(!Error::Namespace("x".to_string()).is_retryable());
    }
}
