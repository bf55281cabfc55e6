//! Retry pattern with fixed or exponential backoff.
//!
//! Failed attempts are classified through [`Classify`]; only the kinds listed
//! in the policy are retried, and admission rejections (`CircuitOpen`,
//! `BulkheadRejected`) never are.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_core::{RetryExecutor, RetryPolicy};
//! use std::time::Duration;
//!
//! let retry = RetryExecutor::new(
//!     "search.query",
//!     RetryPolicy::exponential(4, Duration::from_millis(100), Duration::from_secs(2)),
//! );
//!
//! let hits = retry.call(|| async { index.query(&q).await }).await?;
//! ```

use crate::error::{Classify, ErrorKind, PolicyError, PolicyResult, ResilienceError};
use crate::resilience::context::ExecutionContext;
use crate::resilience::events::{ResilienceEvent, SharedSink, default_sink};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Backoff schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Constant `base_delay` between attempts.
    Fixed,
    /// `base_delay * multiplier^(n-1)`, capped at `max_delay`.
    #[default]
    Exponential,
}

/// Immutable retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial).
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Random spread applied to each delay, as a fraction in `0.0..=1.0`.
    pub jitter: f64,
    /// Error kinds worth another attempt.
    pub retry_on: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
            retry_on: [ErrorKind::Transient, ErrorKind::RateLimit, ErrorKind::Timeout]
                .into_iter()
                .collect(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with `max_attempts` and default backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Constant delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffKind::Fixed,
            base_delay: delay,
            ..Default::default()
        }
    }

    /// Doubling delay starting at `base_delay`, capped at `max_delay`.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffKind::Exponential,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn backoff(mut self, backoff: BackoffKind) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter fraction.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the set of retryable kinds.
    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retry_on = kinds.into_iter().collect();
        self
    }

    /// Stop retrying `kind`.
    pub fn without(mut self, kind: ErrorKind) -> Self {
        self.retry_on.remove(&kind);
        self
    }

    /// Whether a failure of `kind` may be retried.
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        !kind.is_fast_fail() && self.retry_on.contains(&kind)
    }

    /// Un-jittered delay after the n-th failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Exponential => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
                if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
                    self.max_delay
                } else {
                    Duration::from_nanos(nanos.max(0.0) as u64)
                }
            }
        }
    }

    /// Apply the jitter fraction to `delay`.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter.is_nan() || self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = self.jitter.min(1.0);
        let factor = 1.0 + rand::rng().random_range(-spread..=spread);
        Duration::try_from_secs_f64(delay.as_secs_f64() * factor.max(0.0)).unwrap_or(delay)
    }

    /// Delay before the attempt following the n-th failure.
    ///
    /// Rate-limit errors carrying a `retry_after` hint use it as-is.
    pub fn next_delay<E: Classify>(&self, attempt: u32, error: &E) -> Duration {
        if error.kind() == ErrorKind::RateLimit
            && let Some(hint) = error.retry_after()
        {
            return hint;
        }
        self.jittered(self.delay_for_attempt(attempt))
    }

    pub fn validate(&self) -> PolicyResult<()> {
        if self.max_attempts == 0 {
            return Err(PolicyError::invalid("max_attempts", "must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(PolicyError::invalid(
                "multiplier",
                format!("must be a finite number >= 1.0, got {}", self.multiplier),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(PolicyError::invalid(
                "jitter",
                format!("must be within 0.0..=1.0, got {}", self.jitter),
            ));
        }
        if self.backoff == BackoffKind::Exponential && self.max_delay < self.base_delay {
            return Err(PolicyError::invalid(
                "max_delay",
                "must not be smaller than base_delay",
            ));
        }
        Ok(())
    }
}

/// Retry executor bound to an operation name.
#[derive(Clone)]
pub struct RetryExecutor {
    name: String,
    policy: RetryPolicy,
    sink: SharedSink,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self::with_sink(name, policy, default_sink())
    }

    pub fn with_sink(name: impl Into<String>, policy: RetryPolicy, sink: SharedSink) -> Self {
        Self {
            name: name.into(),
            policy,
            sink,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute with retry logic.
    pub async fn call<F, Fut, T, E>(&self, mut f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut context = ExecutionContext::new(&self.name);
        self.run(&mut context, || {
            let attempt = f();
            async move { attempt.await.map_err(ResilienceError::Operation) }
        })
        .await
    }

    /// Retry loop over an operation already returning `ResilienceError`,
    /// recording every failed attempt in `context`.
    pub async fn run<F, Fut, T, E>(
        &self,
        context: &mut ExecutionContext,
        mut f: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        E: Classify + Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            context.begin_attempt();

            let error = match f().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(operation = %self.name, attempt, "Retry succeeded");
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            let kind = error.kind();
            context.record_failure(kind, error.to_string());

            if !self.policy.is_retryable(kind) {
                debug!(
                    operation = %self.name,
                    attempt,
                    kind = %kind,
                    error = %error,
                    "Error is not retryable"
                );
                return Err(error);
            }

            if attempt >= max_attempts {
                self.sink.emit(&ResilienceEvent::RetryExhausted {
                    name: self.name.clone(),
                    attempts: attempt,
                    kind,
                });
                return Err(error);
            }

            let delay = self.policy.next_delay(attempt, &error);
            self.sink.emit(&ResilienceEvent::RetryAttempt {
                name: self.name.clone(),
                attempt,
                delay,
                kind,
            });

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Run `f` under `policy` with no operation name.
pub async fn execute_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    f: F,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    RetryExecutor::new("anonymous", policy.clone()).call(f).await
}
