//! Circuit breaker state machine.

use super::BreakerConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the timeout elapses.
    Open,
    /// A single trial call is allowed through.
    HalfOpen,
}

impl CircuitState {
    /// Numeric value for the state gauge.
    ///
    /// - 0: Closed
    /// - 1: Open
    /// - 2: Half-Open
    #[must_use]
    pub const fn as_gauge(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Errors returned by [`CircuitBreaker::call`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not invoked.
    #[error("circuit breaker '{breaker}' is open")]
    Open {
        /// Name of the breaker.
        breaker: String,
    },
    /// The operation ran and failed. The original error is preserved.
    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// Returns `true` if the call was rejected without running.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

impl From<BreakerError<crate::Error>> for crate::Error {
    fn from(err: BreakerError<crate::Error>) -> Self {
        match err {
            BreakerError::Open { breaker } => Self::CircuitOpen { breaker },
            BreakerError::Operation(e) => e,
        }
    }
}

/// Call counters for a breaker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BreakerStats {
    /// Operations actually invoked.
    pub calls: u64,
    /// Invoked operations that succeeded.
    pub successes: u64,
    /// Invoked operations that failed.
    pub failures: u64,
    /// Calls rejected because the circuit was open.
    pub rejections: u64,
    /// Fallback values served, for rejections and failures alike.
    pub fallbacks: u64,
    /// Transitions into the open state.
    pub opens: u64,
}

/// Serializable view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures counted toward the threshold.
    pub failure_count: u32,
    /// Failures that open the circuit.
    pub threshold: u32,
    /// Open duration in milliseconds.
    pub timeout_ms: u64,
    /// Wall-clock time of the most recent failure.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Call counters.
    pub stats: BreakerStats,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_wall: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
    fallbacks: AtomicU64,
    opens: AtomicU64,
}

/// Per-dependency circuit breaker.
///
/// State decisions depend only on the failure count, the threshold and the
/// time since the last failure. Time is read from [`tokio::time::Instant`].
///
/// # Example
///
/// ```rust
/// use feedgate::resilience::{BreakerConfig, CircuitBreaker, CircuitState};
///
/// # tokio_test::block_on(async {
/// let breaker = CircuitBreaker::new(BreakerConfig::new("weather-api", 3, 1_000));
/// let value = breaker
///     .call_with_fallback(|| async { Err::<u32, _>("timeout") }, || 0)
///     .await;
/// assert_eq!(value, 0);
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// # });
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
    counters: Counters,
}

enum Admission {
    Allowed { trial: bool },
    Rejected,
}

/// Releases the half-open trial slot if the trial future is dropped early.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.inner().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        let threshold = config.failure_threshold.max(1);
        let timeout = config.reset_timeout();
        tracing::debug!(
            breaker = %config.name,
            threshold,
            timeout_ms = config.reset_timeout_ms,
            "Circuit breaker initialized"
        );
        Self {
            name: config.name,
            threshold,
            timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                last_failure_wall: None,
                trial_in_flight: false,
            }),
            counters: Counters::default(),
        }
    }

    /// Returns the breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `operation` through the breaker.
    ///
    /// # Errors
    ///
    /// - [`BreakerError::Open`] if the circuit is open and the timeout has not
    ///   elapsed, or a half-open trial is already in flight. The operation is
    ///   not invoked.
    /// - [`BreakerError::Operation`] with the original error if the operation
    ///   failed. The failure is counted first.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let trial = match self.admit() {
            Admission::Allowed { trial } => trial,
            Admission::Rejected => {
                self.counters.rejections.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(
                    "circuit_breaker_rejections_total",
                    "breaker" => self.name.clone()
                )
                .increment(1);
                return Err(BreakerError::Open {
                    breaker: self.name.clone(),
                });
            },
        };

        let mut guard = TrialGuard {
            breaker: self,
            armed: trial,
        };
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        let result = operation().await;
        guard.armed = false;
        drop(guard);

        match result {
            Ok(value) => {
                self.on_success();
                Ok(value)
            },
            Err(err) => {
                self.on_failure(&err);
                Err(BreakerError::Operation(err))
            },
        }
    }

    /// Runs `operation` through the breaker, serving `fallback()` when the
    /// circuit is open or the operation fails.
    pub async fn call_with_fallback<T, E, F, Fut, G>(&self, operation: F, fallback: G) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        G: FnOnce() -> T,
    {
        match self.call(operation).await {
            Ok(value) => value,
            Err(err) => {
                if !err.is_open() {
                    tracing::debug!(breaker = %self.name, error = %err, "Serving fallback after failure");
                }
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(
                    "circuit_breaker_fallbacks_total",
                    "breaker" => self.name.clone()
                )
                .increment(1);
                fallback()
            },
        }
    }

    /// Returns the current state, applying the open timeout.
    ///
    /// An open breaker whose timeout has elapsed reports `HalfOpen`; the
    /// transition itself happens on the next call.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let inner = self.inner();
        match inner.state {
            CircuitState::Open if self.timeout_elapsed(&inner) => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Returns a serializable view of the breaker.
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state();
        let inner = self.inner();
        CircuitSnapshot {
            name: self.name.clone(),
            state,
            failure_count: inner.failure_count,
            threshold: self.threshold,
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            last_failure_at: inner.last_failure_wall,
            stats: self.stats(),
        }
    }

    /// Returns the call counters.
    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        BreakerStats {
            calls: self.counters.calls.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            rejections: self.counters.rejections.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            opens: self.counters.opens.load(Ordering::Relaxed),
        }
    }

    /// Forces the breaker closed and clears the failure count.
    pub fn reset(&self) {
        let mut inner = self.inner();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.trial_in_flight = false;
        drop(inner);
        tracing::info!(breaker = %self.name, "Circuit breaker manually reset");
        self.record_state(CircuitState::Closed);
    }

    fn inner(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timeout_elapsed(&self, inner: &BreakerInner) -> bool {
        inner
            .last_failure
            .is_none_or(|at| Instant::now().saturating_duration_since(at) >= self.timeout)
    }

    fn admit(&self) -> Admission {
        let mut inner = self.inner();
        match inner.state {
            CircuitState::Closed => Admission::Allowed { trial: false },
            CircuitState::Open => {
                if self.timeout_elapsed(&inner) {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    drop(inner);
                    tracing::info!(breaker = %self.name, "Circuit breaker transitioning to half-open");
                    self.record_state(CircuitState::HalfOpen);
                    Admission::Allowed { trial: true }
                } else {
                    Admission::Rejected
                }
            },
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Rejected
                } else {
                    inner.trial_in_flight = true;
                    Admission::Allowed { trial: true }
                }
            },
        }
    }

    fn on_success(&self) {
        self.counters.successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner();
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
        drop(inner);

        if previous != CircuitState::Closed {
            tracing::info!(breaker = %self.name, "Circuit breaker closing after success");
            self.record_state(CircuitState::Closed);
        }
    }

    fn on_failure(&self, err: &dyn fmt::Display) {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_wall = Some(Utc::now());
        inner.trial_in_flight = false;

        let previous = inner.state;
        let opens = previous == CircuitState::HalfOpen
            || (previous == CircuitState::Closed && inner.failure_count >= self.threshold);
        if opens {
            inner.state = CircuitState::Open;
        }
        let failures = inner.failure_count;
        drop(inner);

        if opens {
            self.counters.opens.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(
                "circuit_breaker_trips_total",
                "breaker" => self.name.clone()
            )
            .increment(1);
            self.record_state(CircuitState::Open);
            if previous == CircuitState::HalfOpen {
                tracing::warn!(breaker = %self.name, error = %err, "Circuit breaker re-opened after half-open failure");
            } else {
                tracing::warn!(
                    breaker = %self.name,
                    failures,
                    threshold = self.threshold,
                    error = %err,
                    "Circuit breaker opened after consecutive failures"
                );
            }
        } else {
            tracing::debug!(breaker = %self.name, failures, error = %err, "Circuit breaker recorded failure");
        }
    }

    fn record_state(&self, state: CircuitState) {
        metrics::gauge!("circuit_breaker_state", "breaker" => self.name.clone())
            .set(f64::from(state.as_gauge()));
    }
}
