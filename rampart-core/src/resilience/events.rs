//! Resilience events and the sinks that receive them.
//!
//! Every component reports state changes through an [`EventSink`]. The
//! default [`TracingSink`] turns events into `tracing` records; tests use
//! [`RecordingSink`] to assert on what happened.

use crate::error::{ErrorKind, RejectReason};
use crate::resilience::circuit_breaker::CircuitState;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Something observable happened inside a resilience layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ResilienceEvent {
    /// A circuit breaker moved between states.
    StateTransition {
        name: String,
        from: CircuitState,
        to: CircuitState,
    },
    /// A failed attempt will be retried after `delay`.
    RetryAttempt {
        name: String,
        attempt: u32,
        delay: Duration,
        kind: ErrorKind,
    },
    /// Retries ran out; the last error is surfaced.
    RetryExhausted {
        name: String,
        attempts: u32,
        kind: ErrorKind,
    },
    /// An attempt hit its deadline.
    TimeoutExpired { name: String, duration: Duration },
    /// The bulkhead refused a call.
    BulkheadRejected {
        name: String,
        in_flight: u32,
        queued: usize,
        reason: RejectReason,
    },
    /// A fallback produced the result of a failed call.
    FallbackInvoked { name: String, kind: ErrorKind },
}

impl ResilienceEvent {
    /// Operation name the event belongs to.
    pub fn name(&self) -> &str {
        match self {
            ResilienceEvent::StateTransition { name, .. }
            | ResilienceEvent::RetryAttempt { name, .. }
            | ResilienceEvent::RetryExhausted { name, .. }
            | ResilienceEvent::TimeoutExpired { name, .. }
            | ResilienceEvent::BulkheadRejected { name, .. }
            | ResilienceEvent::FallbackInvoked { name, .. } => name,
        }
    }

    /// Stable event type label.
    pub fn event_type(&self) -> &'static str {
        match self {
            ResilienceEvent::StateTransition { .. } => "state_transition",
            ResilienceEvent::RetryAttempt { .. } => "retry_attempt",
            ResilienceEvent::RetryExhausted { .. } => "retry_exhausted",
            ResilienceEvent::TimeoutExpired { .. } => "timeout_expired",
            ResilienceEvent::BulkheadRejected { .. } => "bulkhead_rejected",
            ResilienceEvent::FallbackInvoked { .. } => "fallback_invoked",
        }
    }
}

/// Receiver of resilience events.
///
/// Called synchronously from the component that produced the event, never
/// while an internal lock is held.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ResilienceEvent);
}

pub type SharedSink = Arc<dyn EventSink>;

/// The sink used when none is configured.
pub fn default_sink() -> SharedSink {
    Arc::new(TracingSink)
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &ResilienceEvent) {
        match event {
            ResilienceEvent::StateTransition { name, from, to } => match to {
                CircuitState::Open => {
                    warn!(circuit = %name, from = %from, "Circuit breaker OPENED")
                }
                CircuitState::Closed => {
                    info!(circuit = %name, from = %from, "Circuit breaker CLOSED")
                }
                CircuitState::HalfOpen => {
                    info!(circuit = %name, from = %from, "Circuit breaker HALF-OPEN")
                }
            },
            ResilienceEvent::RetryAttempt {
                name,
                attempt,
                delay,
                kind,
            } => debug!(
                operation = %name,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                kind = %kind,
                "Retrying after failure"
            ),
            ResilienceEvent::RetryExhausted {
                name,
                attempts,
                kind,
            } => warn!(
                operation = %name,
                attempts = attempts,
                kind = %kind,
                "Retries exhausted"
            ),
            ResilienceEvent::TimeoutExpired { name, duration } => warn!(
                operation = %name,
                timeout_ms = duration.as_millis() as u64,
                "Operation timed out"
            ),
            ResilienceEvent::BulkheadRejected {
                name,
                in_flight,
                queued,
                reason,
            } => warn!(
                bulkhead = %name,
                in_flight = in_flight,
                queued = queued,
                reason = %reason,
                "Bulkhead rejected call"
            ),
            ResilienceEvent::FallbackInvoked { name, kind } => info!(
                operation = %name,
                kind = %kind,
                "Fallback invoked"
            ),
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &ResilienceEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ResilienceEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of the recorded events.
    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events matching `predicate`.
    pub fn count<P>(&self, predicate: P) -> usize
    where
        P: Fn(&ResilienceEvent) -> bool,
    {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Circuit transitions recorded for `name`, in order.
    pub fn transitions(&self, name: &str) -> Vec<(CircuitState, CircuitState)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ResilienceEvent::StateTransition { name: n, from, to } if n == name => {
                    Some((*from, *to))
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &ResilienceEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards each event to several sinks.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<SharedSink>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: SharedSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &ResilienceEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
