//! Timeout pattern for operations.
//!
//! Each attempt receives a [`CancellationToken`]. When the deadline passes
//! the token is cancelled and the attempt future is dropped; the guard does
//! not wait for the operation to clean up.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_core::{TimeoutGuard, TimeoutSpec};
//! use std::time::Duration;
//!
//! let guard = TimeoutGuard::new("reports.render", TimeoutSpec::new(Duration::from_secs(5)));
//!
//! let pdf = guard
//!     .call_cancellable(|token| async move { renderer.render(&doc, token).await })
//!     .await?;
//! ```

use crate::error::{PolicyError, PolicyResult, ResilienceError};
use crate::resilience::events::{ResilienceEvent, SharedSink, default_sink};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-attempt duration bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSpec {
    pub duration: Duration,
}

impl Default for TimeoutSpec {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
        }
    }
}

impl TimeoutSpec {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn validate(&self) -> PolicyResult<()> {
        if self.duration.is_zero() {
            return Err(PolicyError::invalid("timeout", "must be greater than zero"));
        }
        Ok(())
    }
}

impl From<Duration> for TimeoutSpec {
    fn from(duration: Duration) -> Self {
        Self::new(duration)
    }
}

/// Bounds the duration of a single attempt.
#[derive(Clone)]
pub struct TimeoutGuard {
    name: String,
    spec: TimeoutSpec,
    sink: SharedSink,
}

impl TimeoutGuard {
    pub fn new(name: impl Into<String>, spec: TimeoutSpec) -> Self {
        Self::with_sink(name, spec, default_sink())
    }

    pub fn with_sink(name: impl Into<String>, spec: TimeoutSpec, sink: SharedSink) -> Self {
        Self {
            name: name.into(),
            spec,
            sink,
        }
    }

    /// Get the timeout duration.
    pub fn duration(&self) -> Duration {
        self.spec.duration
    }

    /// Execute with timeout.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_cancellable(|_| f()).await
    }

    /// Execute with timeout, handing the operation a token that is cancelled
    /// when the deadline passes.
    pub async fn call_cancellable<F, Fut, T, E>(&self, f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let token = CancellationToken::new();
        let attempt = f(token.clone());
        self.guard(token, async move { attempt.await.map_err(ResilienceError::Operation) })
            .await
    }

    /// Race an already-created attempt against the deadline.
    ///
    /// `token` is cancelled if the deadline wins. A deadline and a completion
    /// observed in the same poll resolve as a timeout.
    pub async fn guard<Fut, T, E>(
        &self,
        token: CancellationToken,
        attempt: Fut,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let deadline = tokio::time::sleep(self.spec.duration);
        tokio::pin!(deadline);
        tokio::pin!(attempt);

        tokio::select! {
            biased;
            () = &mut deadline => {
                token.cancel();
                self.sink.emit(&ResilienceEvent::TimeoutExpired {
                    name: self.name.clone(),
                    duration: self.spec.duration,
                });
                Err(ResilienceError::Timeout {
                    name: self.name.clone(),
                    duration: self.spec.duration,
                })
            }
            result = &mut attempt => result,
        }
    }
}

/// Execute `f` with a timeout.
pub async fn execute_with_timeout<F, Fut, T, E>(
    duration: Duration,
    f: F,
) -> Result<T, ResilienceError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    TimeoutGuard::new("anonymous", TimeoutSpec::new(duration))
        .call(f)
        .await
}
