//! Named breaker instances, one per dependency.

use super::{BreakerConfig, CircuitBreaker, CircuitSnapshot, CircuitState};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Holds the circuit breakers created at startup.
///
/// The registry is built once and then only read, so it needs no lock; each
/// breaker synchronizes its own state.
#[derive(Debug, Default, Clone)]
pub struct BreakerRegistry {
    breakers: BTreeMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Creates a registry from breaker configurations.
    ///
    /// Later entries with a duplicate name replace earlier ones.
    #[must_use]
    pub fn new(configs: impl IntoIterator<Item = BreakerConfig>) -> Self {
        let breakers = configs
            .into_iter()
            .map(|config| {
                let name = config.name.clone();
                (name, Arc::new(CircuitBreaker::new(config)))
            })
            .collect();
        Self { breakers }
    }

    /// Returns a breaker by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }

    /// Returns a breaker by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if no breaker has that name.
    pub fn require(&self, name: &str) -> Result<Arc<CircuitBreaker>> {
        self.get(name)
            .ok_or_else(|| Error::InvalidInput(format!("unknown circuit breaker: {name}")))
    }

    /// Returns the state of a breaker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if no breaker has that name.
    pub fn state(&self, name: &str) -> Result<CircuitState> {
        Ok(self.require(name)?.state())
    }

    /// Forces a breaker closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if no breaker has that name.
    pub fn reset(&self, name: &str) -> Result<()> {
        self.require(name)?.reset();
        Ok(())
    }

    /// Returns snapshots of every breaker, sorted by name.
    #[must_use]
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        self.breakers.values().map(|b| b.snapshot()).collect()
    }

    /// Returns the registered breaker names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.breakers.keys().map(String::as_str).collect()
    }
}
