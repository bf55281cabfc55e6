//! Keyed store of per-operation breaker and bulkhead state.
//!
//! Every caller protecting the same operation name shares one
//! [`CircuitBreaker`] and one [`Bulkhead`]. The first configuration seen for
//! a name wins; later lookups with a different configuration get the
//! existing instance.

use crate::error::ResilienceError;
use crate::resilience::bulkhead::{Bulkhead, BulkheadConfig, BulkheadStats};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::resilience::events::{SharedSink, default_sink};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

pub struct StateStore {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    bulkheads: DashMap<String, Arc<Bulkhead>>,
    sink: SharedSink,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::with_sink(default_sink())
    }

    /// Create a store whose components report to `sink`.
    pub fn with_sink(sink: SharedSink) -> Self {
        Self {
            breakers: DashMap::new(),
            bulkheads: DashMap::new(),
            sink,
        }
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Get or create the breaker for `name`.
    pub fn circuit_breaker(&self, name: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            if existing.config() != config {
                debug!(name, "Circuit breaker already registered with a different config");
            }
            return Arc::clone(existing.value());
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::with_sink(name, config.clone(), self.sink.clone()))
            .value()
            .clone()
    }

    /// Get or create the bulkhead for `name`.
    pub fn bulkhead(&self, name: &str, config: &BulkheadConfig) -> Arc<Bulkhead> {
        if let Some(existing) = self.bulkheads.get(name) {
            return Arc::clone(existing.value());
        }

        self.bulkheads
            .entry(name.to_string())
            .or_insert_with(|| Bulkhead::with_sink(name, config.clone(), self.sink.clone()))
            .value()
            .clone()
    }

    pub fn get_circuit_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    pub fn get_bulkhead(&self, name: &str) -> Option<Arc<Bulkhead>> {
        self.bulkheads.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Run `f` through the breaker registered for `name`.
    pub async fn execute<F, Fut, T, E>(
        &self,
        name: &str,
        config: &CircuitBreakerConfig,
        f: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.circuit_breaker(name, config).call(f).await
    }

    /// Statistics of every breaker, sorted by name.
    pub fn circuit_stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|b| Arc::clone(b.value())).collect();
        let mut stats: Vec<_> = breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Statistics of every bulkhead, sorted by name.
    pub fn bulkhead_stats(&self) -> Vec<BulkheadStats> {
        let mut stats: Vec<_> = self.bulkheads.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Force every breaker closed.
    pub fn reset_circuits(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|b| Arc::clone(b.value())).collect();
        for breaker in &breakers {
            breaker.reset();
        }
        info!(count = breakers.len(), "All circuit breakers reset");
    }

    /// Forget all state kept for `name`.
    ///
    /// Callers already holding the old breaker or bulkhead keep using it.
    pub fn remove(&self, name: &str) -> bool {
        let breaker = self.breakers.remove(name).is_some();
        let bulkhead = self.bulkheads.remove(name).is_some();
        breaker || bulkhead
    }

    /// Operation names with live state, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .iter()
            .map(|e| e.key().clone())
            .chain(self.bulkheads.iter().map(|e| e.key().clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("breakers", &self.breakers.len())
            .field("bulkheads", &self.bulkheads.len())
            .finish()
    }
}
