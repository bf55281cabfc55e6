//! Circuit Breaker pattern implementation.
//!
//! The circuit breaker stops calling a failing dependency once a run of
//! consecutive failures reaches the configured threshold.
//!
//! ## States
//!
//! - **Closed**: Normal operation, calls pass through
//! - **Open**: Calls fail fast with `CircuitOpen` until `reset_timeout` elapses
//! - **Half-Open**: A single probe call decides between Closed and Open
//!
//! Admission and outcome recording happen under one lock on the breaker
//! state, so racing callers can never both trip the breaker or both become
//! the probe.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_core::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     "payments.charge",
//!     CircuitBreakerConfig::default()
//!         .failure_threshold(5)
//!         .reset_timeout(Duration::from_secs(30)),
//! );
//!
//! match breaker.call(|| async { client.charge(order).await }).await {
//!     Ok(receipt) => Ok(receipt),
//!     Err(ResilienceError::CircuitOpen { .. }) => Err(unavailable()),
//!     Err(e) => Err(e.into()),
//! }
//! ```

use crate::error::{PolicyError, PolicyResult, ResilienceError};
use crate::resilience::events::{ResilienceEvent, SharedSink, default_sink};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Circuit is half-open, one probe is allowed through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to wait before letting a probe through an open circuit.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
        }
    }

    /// Set the failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the reset timeout.
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn validate(&self) -> PolicyResult<()> {
        if self.failure_threshold == 0 {
            return Err(PolicyError::invalid(
                "failure_threshold",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Mutable breaker state, only touched under the breaker's lock.
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

type Transition = (CircuitState, CircuitState);

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    fn transition(&mut self, to: CircuitState, now: Instant) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        self.probe_in_flight = false;
        match to {
            CircuitState::Open => self.opened_at = Some(now),
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.opened_at = None;
            }
            CircuitState::HalfOpen => {}
        }
        Some((from, to))
    }

    fn reset_elapsed(&self, reset_timeout: Duration, now: Instant) -> bool {
        match self.opened_at {
            Some(opened_at) => now.saturating_duration_since(opened_at) >= reset_timeout,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Permission to run one call through the breaker.
///
/// Report the outcome with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). A probe permit dropped without
/// an outcome frees the probe slot and leaves the breaker half-open.
#[must_use = "a permit must record the call outcome"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl CircuitPermit<'_> {
    /// Whether this call is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.admission == Admission::Probe
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.admission);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.admission);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Probe {
            self.breaker.abandon_probe();
        }
    }
}

/// Circuit breaker for a single operation name.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    sink: SharedSink,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker reporting to the default tracing sink.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Arc<Self> {
        Self::with_sink(name, config, default_sink())
    }

    /// Create a new circuit breaker reporting to `sink`.
    pub fn with_sink(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        sink: SharedSink,
    ) -> Arc<Self> {
        let name = name.into();
        info!(
            name = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout = ?config.reset_timeout,
            "Circuit breaker initialized"
        );

        Arc::new(Self {
            name,
            config,
            inner: Mutex::new(BreakerState::new()),
            sink,
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        })
    }

    /// Get the circuit breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current circuit state.
    ///
    /// An open circuit whose reset timeout has elapsed reports `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        let now = Instant::now();
        let (state, transition) = {
            let mut inner = self.inner.lock();
            let transition = if inner.state == CircuitState::Open
                && inner.reset_elapsed(self.config.reset_timeout, now)
            {
                inner.transition(CircuitState::HalfOpen, now)
            } else {
                None
            };
            (inner.state, transition)
        };
        self.publish(transition);
        state
    }

    /// Ask for admission of one call.
    ///
    /// Returns `None` when the circuit is open or a half-open probe is
    /// already in flight.
    pub fn try_acquire(&self) -> Option<CircuitPermit<'_>> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let (admission, transition) = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => (Some(Admission::Normal), None),
                CircuitState::Open => {
                    if inner.reset_elapsed(self.config.reset_timeout, now) {
                        let transition = inner.transition(CircuitState::HalfOpen, now);
                        inner.probe_in_flight = true;
                        (Some(Admission::Probe), transition)
                    } else {
                        (None, None)
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.probe_in_flight {
                        (None, None)
                    } else {
                        inner.probe_in_flight = true;
                        (Some(Admission::Probe), None)
                    }
                }
            }
        };
        self.publish(transition);

        match admission {
            Some(admission) => Some(CircuitPermit {
                breaker: self,
                admission,
                settled: false,
            }),
            None => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                debug!(name = %self.name, "Circuit breaker rejected request");
                None
            }
        }
    }

    /// Execute a function with circuit breaker protection.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(move || async move { f().await.map_err(ResilienceError::Operation) })
            .await
    }

    /// Like [`call`](Self::call), for operations already returning a
    /// `ResilienceError` (inner resilience layers).
    pub async fn run<F, Fut, T, E>(&self, f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let Some(permit) = self.try_acquire() else {
            return Err(ResilienceError::CircuitOpen {
                name: self.name.clone(),
            });
        };

        let result = f().await;
        match &result {
            Ok(_) => permit.record_success(),
            Err(_) => permit.record_failure(),
        }
        result
    }

    fn on_success(&self, admission: Admission) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let transition = {
            let mut inner = self.inner.lock();
            match (admission, inner.state) {
                (Admission::Probe, CircuitState::HalfOpen) => {
                    inner.transition(CircuitState::Closed, now)
                }
                (Admission::Normal, CircuitState::Closed) => {
                    inner.consecutive_failures = 0;
                    None
                }
                // Outcome of a call admitted before a manual reset or a trip
                _ => None,
            }
        };
        self.publish(transition);
    }

    fn on_failure(&self, admission: Admission) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let transition = {
            let mut inner = self.inner.lock();
            inner.last_failure_at = Some(now);
            match (admission, inner.state) {
                (Admission::Probe, CircuitState::HalfOpen) => {
                    inner.transition(CircuitState::Open, now)
                }
                (Admission::Normal, CircuitState::Closed) => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.transition(CircuitState::Open, now)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        self.publish(transition);
    }

    fn abandon_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
            debug!(name = %self.name, "Half-open probe abandoned");
        }
    }

    fn publish(&self, transition: Option<Transition>) {
        if let Some((from, to)) = transition {
            self.sink.emit(&ResilienceEvent::StateTransition {
                name: self.name.clone(),
                from,
                to,
            });
        }
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.consecutive_failures = 0;
            inner.transition(CircuitState::Closed, Instant::now())
        };
        self.publish(transition);
    }

    /// Manually force the circuit open.
    pub fn force_open(&self) {
        let transition = self
            .inner
            .lock()
            .transition(CircuitState::Open, Instant::now());
        self.publish(transition);
    }

    // Metrics

    /// Get the current consecutive-failure count.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// When the last failure was recorded.
    pub fn last_failure_at(&self) -> Option<Instant> {
        self.inner.lock().last_failure_at
    }

    /// Get total requests processed.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Get total successful requests.
    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::Relaxed)
    }

    /// Get total failed requests.
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Get total rejected requests (circuit open).
    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            name: self.name.clone(),
            state: self.state(),
            total_requests: self.total_requests(),
            total_successes: self.total_successes(),
            total_failures: self.total_failures(),
            total_rejections: self.total_rejections(),
            current_failure_count: self.failure_count(),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

/// Circuit breaker statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    /// Circuit breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Total requests.
    pub total_requests: u64,
    /// Total successes.
    pub total_successes: u64,
    /// Total failures.
    pub total_failures: u64,
    /// Total rejections.
    pub total_rejections: u64,
    /// Current consecutive failures.
    pub current_failure_count: u32,
}

impl CircuitBreakerStats {
    /// Calculate success rate (0.0 - 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.total_successes as f64 / self.total_requests as f64
        }
    }

    /// Calculate failure rate (0.0 - 1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_failures as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::events::RecordingSink;
    use std::sync::atomic::AtomicU32;

    fn breaker(threshold: u32, reset: Duration) -> (Arc<CircuitBreaker>, Arc<RecordingSink>) {
        let sink = RecordingSink::new();
        let cb = CircuitBreaker::with_sink(
            "test",
            CircuitBreakerConfig::new(threshold, reset),
            sink.clone(),
        );
        (cb, sink)
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let (cb, sink) = breaker(3, Duration::from_secs(30));

        assert_eq!(cb.state(), CircuitState::Closed);

        for _ in 0..3 {
            let _: Result<(), ResilienceError<&str>> = cb.call(|| async { Err("error") }).await;
        }

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(
            sink.transitions("test"),
            vec![(CircuitState::Closed, CircuitState::Open)]
        );
    }

    #[tokio::test]
    async fn test_circuit_breaker_rejects_without_invoking() {
        let (cb, _) = breaker(1, Duration::from_secs(30));
        let invoked = AtomicU32::new(0);

        let _: Result<(), _> = cb.call(|| async { Err::<(), _>("error") }).await;

        let result: Result<(), ResilienceError<&str>> = cb
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(cb.total_rejections(), 1);
    }

    #[tokio::test]
    async fn test_circuit_breaker_success_resets_count() {
        let (cb, _) = breaker(3, Duration::from_secs(30));

        for _ in 0..2 {
            cb.try_acquire().unwrap().record_failure();
        }
        assert_eq!(cb.failure_count(), 2);

        cb.try_acquire().unwrap().record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_half_open_single_probe() {
        let (cb, sink) = breaker(1, Duration::from_millis(50));

        cb.try_acquire().unwrap().record_failure();
        assert!(cb.try_acquire().is_none());

        tokio::time::advance(Duration::from_millis(50)).await;

        let probe = cb.try_acquire().expect("probe admitted");
        assert!(probe.is_probe());
        assert!(cb.try_acquire().is_none(), "second caller must fail fast");

        probe.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(
            sink.transitions("test"),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let (cb, _) = breaker(1, Duration::from_millis(50));

        cb.try_acquire().unwrap().record_failure();
        tokio::time::advance(Duration::from_millis(60)).await;

        cb.try_acquire().unwrap().record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // Reset timeout restarts from the failed probe
        tokio::time::advance(Duration::from_millis(30)).await;
        assert!(cb.try_acquire().is_none());
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(cb.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_frees_slot() {
        let (cb, _) = breaker(1, Duration::from_millis(10));

        cb.try_acquire().unwrap().record_failure();
        tokio::time::advance(Duration::from_millis(10)).await;

        let probe = cb.try_acquire().unwrap();
        drop(probe);

        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let next = cb.try_acquire().expect("slot released");
        assert!(next.is_probe());
        next.record_success();
    }

    #[tokio::test]
    async fn test_manual_reset_and_force_open() {
        let (cb, _) = breaker(5, Duration::from_secs(30));

        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_none());

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_stats() {
        let (cb, _) = breaker(5, Duration::from_secs(30));

        let _: Result<u32, ResilienceError<&str>> = cb.call(|| async { Ok(1) }).await;
        let _: Result<u32, ResilienceError<&str>> = cb.call(|| async { Err("no") }).await;

        let stats = cb.stats();
        assert_eq!(stats.name, "test");
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.total_successes, 1);
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.current_failure_count, 1);
        assert!((stats.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        let err = CircuitBreakerConfig::default()
            .failure_threshold(0)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyError::InvalidConfig {
                field: "failure_threshold",
                ..
            }
        ));
    }
}
