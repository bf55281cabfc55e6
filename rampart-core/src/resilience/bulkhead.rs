//! Bulkhead pattern for resource isolation.
//!
//! The bulkhead caps the number of concurrent executions of one operation
//! name. Excess callers wait in a strict FIFO queue of bounded length; once
//! the queue is full further callers are rejected immediately.
//!
//! A released slot is handed directly to the head of the queue, so a newly
//! arriving caller can never overtake a waiter.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_core::{Bulkhead, BulkheadConfig};
//!
//! let bulkhead = Bulkhead::new("thumbnails.render", BulkheadConfig::new(4, 16));
//!
//! let result = bulkhead.call(|| async {
//!     expensive_operation().await
//! }).await;
//! ```

use crate::error::{PolicyError, PolicyResult, RejectReason, ResilienceError};
use crate::resilience::events::{ResilienceEvent, SharedSink, default_sink};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Bulkhead configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkheadConfig {
    /// Maximum concurrent executions.
    pub max_concurrent: u32,
    /// Maximum number of callers waiting for a slot.
    pub max_queue: u32,
    /// Maximum time a queued caller waits before being rejected.
    pub max_wait: Option<Duration>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_queue: 10,
            max_wait: None,
        }
    }
}

impl BulkheadConfig {
    /// Create a new configuration.
    pub fn new(max_concurrent: u32, max_queue: u32) -> Self {
        Self {
            max_concurrent,
            max_queue,
            max_wait: None,
        }
    }

    /// Set the maximum wait time.
    pub fn max_wait(mut self, duration: Duration) -> Self {
        self.max_wait = Some(duration);
        self
    }

    pub fn validate(&self) -> PolicyResult<()> {
        if self.max_concurrent == 0 {
            return Err(PolicyError::invalid("max_concurrent", "must be at least 1"));
        }
        if self.max_wait.is_some_and(|wait| wait.is_zero()) {
            return Err(PolicyError::invalid("max_wait", "must be greater than zero"));
        }
        Ok(())
    }
}

struct Waiter {
    ticket: u64,
    grant: oneshot::Sender<()>,
}

struct BulkheadState {
    in_flight: u32,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

impl BulkheadState {
    /// Hand the slot to the oldest live waiter, or free it.
    fn release(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.grant.send(()).is_ok() {
                return;
            }
        }
        self.in_flight = self.in_flight.saturating_sub(1);
    }
}

/// Bulkhead for a single operation name.
pub struct Bulkhead {
    name: String,
    config: BulkheadConfig,
    state: Mutex<BulkheadState>,
    sink: SharedSink,
    total_calls: AtomicU64,
    total_rejections: AtomicU64,
    total_timeouts: AtomicU64,
}

/// A held bulkhead slot, released on drop.
#[must_use = "dropping the lease releases the slot immediately"]
pub struct BulkheadLease {
    bulkhead: Arc<Bulkhead>,
}

impl Drop for BulkheadLease {
    fn drop(&mut self) {
        self.bulkhead.state.lock().release();
    }
}

impl std::fmt::Debug for BulkheadLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkheadLease")
            .field("bulkhead", &self.bulkhead.name)
            .finish()
    }
}

/// A caller parked in the wait queue.
///
/// Dropping it before the grant is consumed removes it from the queue, or
/// passes on a slot that was already handed over.
struct QueuedWaiter<'a> {
    bulkhead: &'a Bulkhead,
    ticket: u64,
    grant: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for QueuedWaiter<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.bulkhead.state.lock();
        if let Some(pos) = state.waiters.iter().position(|w| w.ticket == self.ticket) {
            state.waiters.remove(pos);
        } else if self.grant.try_recv().is_ok() {
            state.release();
        }
    }
}

impl Bulkhead {
    /// Create a new bulkhead reporting to the default tracing sink.
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Arc<Self> {
        Self::with_sink(name, config, default_sink())
    }

    pub fn with_sink(name: impl Into<String>, config: BulkheadConfig, sink: SharedSink) -> Arc<Self> {
        let name = name.into();
        info!(
            name = %name,
            max_concurrent = config.max_concurrent,
            max_queue = config.max_queue,
            "Bulkhead initialized"
        );

        Arc::new(Self {
            name,
            config,
            state: Mutex::new(BulkheadState {
                in_flight: 0,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            sink,
            total_calls: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
        })
    }

    /// Get the bulkhead name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// Get current executions.
    pub fn active_count(&self) -> u32 {
        self.state.lock().in_flight
    }

    /// Get current waiting callers.
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Get available slots.
    pub fn available_permits(&self) -> u32 {
        self.config
            .max_concurrent
            .saturating_sub(self.state.lock().in_flight)
    }

    /// Check if the bulkhead has capacity.
    pub fn has_capacity(&self) -> bool {
        self.available_permits() > 0
    }

    /// Acquire a slot, waiting in the queue if necessary.
    pub async fn admit(self: &Arc<Self>) -> Result<BulkheadLease, RejectReason> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let (ticket, grant) = {
            let mut state = self.state.lock();
            if state.in_flight < self.config.max_concurrent {
                state.in_flight += 1;
                return Ok(self.lease());
            }
            if state.waiters.len() >= self.config.max_queue as usize {
                let (in_flight, queued) = (state.in_flight, state.waiters.len());
                drop(state);
                return Err(self.reject(RejectReason::QueueFull, in_flight, queued));
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { ticket, grant: tx });
            debug!(name = %self.name, queued = state.waiters.len(), "Bulkhead full, caller queued");
            (ticket, rx)
        };

        let mut waiter = QueuedWaiter {
            bulkhead: self,
            ticket,
            grant,
            settled: false,
        };

        let granted = match self.config.max_wait {
            Some(max_wait) => tokio::time::timeout(max_wait, &mut waiter.grant)
                .await
                .ok(),
            None => Some((&mut waiter.grant).await),
        };

        match granted {
            Some(Ok(())) => {
                waiter.settled = true;
                Ok(self.lease())
            }
            // The sender only disappears if the waiter was dropped from the queue
            Some(Err(_)) => {
                waiter.settled = true;
                let (in_flight, queued) = self.occupancy();
                Err(self.reject(RejectReason::QueueFull, in_flight, queued))
            }
            None => {
                drop(waiter);
                self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                let (in_flight, queued) = self.occupancy();
                Err(self.reject(RejectReason::WaitTimeout, in_flight, queued))
            }
        }
    }

    /// Acquire a slot only if one is free right now.
    pub fn try_admit(self: &Arc<Self>) -> Result<BulkheadLease, RejectReason> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        if state.in_flight < self.config.max_concurrent && state.waiters.is_empty() {
            state.in_flight += 1;
            return Ok(self.lease());
        }
        let (in_flight, queued) = (state.in_flight, state.waiters.len());
        drop(state);
        Err(self.reject(RejectReason::QueueFull, in_flight, queued))
    }

    /// Execute with bulkhead protection.
    pub async fn call<F, Fut, T, E>(self: &Arc<Self>, f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _lease = self
            .admit()
            .await
            .map_err(|reason| ResilienceError::BulkheadRejected {
                name: self.name.clone(),
                reason,
            })?;
        f().await.map_err(ResilienceError::Operation)
    }

    fn lease(self: &Arc<Self>) -> BulkheadLease {
        BulkheadLease {
            bulkhead: Arc::clone(self),
        }
    }

    fn occupancy(&self) -> (u32, usize) {
        let state = self.state.lock();
        (state.in_flight, state.waiters.len())
    }

    fn reject(&self, reason: RejectReason, in_flight: u32, queued: usize) -> RejectReason {
        self.total_rejections.fetch_add(1, Ordering::Relaxed);
        self.sink.emit(&ResilienceEvent::BulkheadRejected {
            name: self.name.clone(),
            in_flight,
            queued,
            reason,
        });
        reason
    }

    /// Get bulkhead statistics.
    pub fn stats(&self) -> BulkheadStats {
        let (active_count, waiting_count) = self.occupancy();
        BulkheadStats {
            name: self.name.clone(),
            max_concurrent: self.config.max_concurrent,
            max_queue: self.config.max_queue,
            active_count,
            waiting_count,
            available_permits: self.config.max_concurrent.saturating_sub(active_count),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulkhead")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

/// Bulkhead statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkheadStats {
    /// Bulkhead name.
    pub name: String,
    /// Maximum concurrent executions.
    pub max_concurrent: u32,
    /// Maximum queue length.
    pub max_queue: u32,
    /// Current active executions.
    pub active_count: u32,
    /// Current waiting callers.
    pub waiting_count: usize,
    /// Available slots.
    pub available_permits: u32,
    /// Total admission requests.
    pub total_calls: u64,
    /// Total rejections.
    pub total_rejections: u64,
    /// Total queue wait timeouts.
    pub total_timeouts: u64,
}

impl BulkheadStats {
    /// Calculate utilization (0.0 - 1.0).
    pub fn utilization(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 0.0;
        }
        self.active_count as f64 / self.max_concurrent as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::events::RecordingSink;
    use futures_util::FutureExt;
    use tokio::task::yield_now;

    #[tokio::test]
    async fn test_bulkhead_allows_concurrent() {
        let bulkhead = Bulkhead::new("test", BulkheadConfig::new(2, 0));

        let result: Result<i32, ResilienceError<&str>> = bulkhead.call(|| async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(bulkhead.active_count(), 0);
    }

    #[tokio::test]
    async fn test_bulkhead_rejects_when_queue_full() {
        let sink = RecordingSink::new();
        let bulkhead = Bulkhead::with_sink("test", BulkheadConfig::new(1, 0), sink.clone());

        let _lease = bulkhead.admit().await.unwrap();
        let result: Result<i32, ResilienceError<&str>> = bulkhead.call(|| async { Ok(42) }).await;

        assert!(matches!(
            result,
            Err(ResilienceError::BulkheadRejected {
                reason: RejectReason::QueueFull,
                ..
            })
        ));
        assert_eq!(sink.count(|e| e.event_type() == "bulkhead_rejected"), 1);
    }

    #[tokio::test]
    async fn test_release_hands_slot_to_queue_head_in_order() {
        let bulkhead = Bulkhead::new("test", BulkheadConfig::new(1, 2));
        let first = bulkhead.admit().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();
        for id in 0..2 {
            let handle = bulkhead.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let lease = handle.admit().await.unwrap();
                order.lock().push(id);
                drop(lease);
            }));
            // Make sure the waiters queue in spawn order
            while bulkhead.waiting_count() < id + 1 {
                yield_now().await;
            }
        }

        assert_eq!(bulkhead.active_count(), 1);
        assert_eq!(bulkhead.waiting_count(), 2);

        drop(first);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1]);
        assert_eq!(bulkhead.active_count(), 0);
        assert_eq!(bulkhead.waiting_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_waiter_times_out() {
        let bulkhead = Bulkhead::new(
            "test",
            BulkheadConfig::new(1, 1).max_wait(Duration::from_millis(20)),
        );
        let _lease = bulkhead.admit().await.unwrap();

        let result = bulkhead.admit().await;

        assert_eq!(result.unwrap_err(), RejectReason::WaitTimeout);
        assert_eq!(bulkhead.waiting_count(), 0);
        assert_eq!(bulkhead.stats().total_timeouts, 1);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_queue() {
        let bulkhead = Bulkhead::new("test", BulkheadConfig::new(1, 1));
        let lease = bulkhead.admit().await.unwrap();

        let waiter = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.admit().await.map(drop) })
        };
        while bulkhead.waiting_count() == 0 {
            yield_now().await;
        }

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(bulkhead.waiting_count(), 0);

        drop(lease);
        assert_eq!(bulkhead.active_count(), 0);
        assert!(bulkhead.try_admit().is_ok());
    }

    #[tokio::test]
    async fn test_granted_waiter_dropped_passes_slot_on() {
        let bulkhead = Bulkhead::new("test", BulkheadConfig::new(1, 2));
        let lease = bulkhead.admit().await.unwrap();

        let mut first = Box::pin(bulkhead.admit());
        assert!((&mut first).now_or_never().is_none());

        let second = {
            let handle = bulkhead.clone();
            tokio::spawn(async move { handle.admit().await.map(drop) })
        };
        while bulkhead.waiting_count() < 2 {
            yield_now().await;
        }

        // The slot goes to the first waiter, which is dropped before it runs
        drop(lease);
        assert_eq!(bulkhead.waiting_count(), 1);
        assert_eq!(bulkhead.active_count(), 1);
        drop(first);

        assert!(second.await.unwrap().is_ok());
        assert_eq!(bulkhead.active_count(), 0);
        assert_eq!(bulkhead.waiting_count(), 0);
    }

    #[tokio::test]
    async fn test_try_admit_does_not_overtake_queue() {
        let bulkhead = Bulkhead::new("test", BulkheadConfig::new(1, 1));
        let lease = bulkhead.try_admit().unwrap();
        assert_eq!(bulkhead.try_admit().unwrap_err(), RejectReason::QueueFull);
        drop(lease);

        let stats = bulkhead.stats();
        assert_eq!(stats.total_calls, 2);
        assert_eq!(stats.total_rejections, 1);
        assert_eq!(stats.available_permits, 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(BulkheadConfig::default().validate().is_ok());
        assert!(BulkheadConfig::new(0, 5).validate().is_err());
        assert!(
            BulkheadConfig::new(1, 0)
                .max_wait(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
