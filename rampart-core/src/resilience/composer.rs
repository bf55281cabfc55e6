//! Composition of the resilience layers around one operation.
//!
//! Layers nest in a fixed order, outermost first:
//!
//! ```text
//! Fallback( Bulkhead( CircuitBreaker( Retry( Timeout( operation ) ) ) ) )
//! ```
//!
//! The bulkhead lease is held for the whole call including every retry. The
//! breaker sees one outcome per call, after retries are exhausted. Each
//! attempt gets its own deadline.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_core::{ResilienceEngine, fallback_value};
//!
//! let engine = ResilienceEngine::new();
//! let summarize = engine
//!     .policy::<String, ProviderError>("ai.summarize", "ai")?
//!     .with_fallback(fallback_value("Summary unavailable".to_string()));
//!
//! let summary = summarize.call(|| provider.summarize(&article)).await?;
//! ```

use crate::error::{Classified, Classify, ErrorKind, PolicyResult, ResilienceError};
use crate::resilience::bulkhead::Bulkhead;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::context::ExecutionContext;
use crate::resilience::events::SharedSink;
use crate::resilience::fallback::Fallback;
use crate::resilience::policy::{PolicyRegistry, ResilienceConfig};
use crate::resilience::retry::RetryExecutor;
use crate::resilience::store::StateStore;
use crate::resilience::timeout::TimeoutGuard;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A composed policy for one operation name, producing `Result<T, ResilienceError<E>>`.
pub struct Resilience<T, E> {
    name: String,
    bulkhead: Option<Arc<Bulkhead>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<RetryExecutor>,
    timeout: Option<TimeoutGuard>,
    fallback: Option<Fallback<T, E>>,
    sink: SharedSink,
}

impl<T, E> Resilience<T, E>
where
    T: Send + 'static,
    E: Classify + Display + Send + 'static,
{
    /// Validate `config`, then compose it like [`new`](Self::new).
    pub fn try_new(
        name: impl Into<String>,
        config: &ResilienceConfig,
        store: &StateStore,
    ) -> PolicyResult<Self> {
        config.validate()?;
        Ok(Self::new(name, config, store))
    }

    /// Compose the layers of `config` for `name`, sharing breaker and
    /// bulkhead state through `store`.
    ///
    /// `config` is used as given. A zero `max_concurrent` parks every call
    /// and a zero `failure_threshold` trips on the first failure; use
    /// [`try_new`](Self::try_new) for unchecked input.
    pub fn new(name: impl Into<String>, config: &ResilienceConfig, store: &StateStore) -> Self {
        let name = name.into();
        let sink = store.sink().clone();

        Self {
            bulkhead: config.bulkhead.as_ref().map(|c| store.bulkhead(&name, c)),
            circuit_breaker: config
                .circuit_breaker
                .as_ref()
                .map(|c| store.circuit_breaker(&name, c)),
            retry: config
                .retry
                .as_ref()
                .map(|p| RetryExecutor::with_sink(name.clone(), p.clone(), sink.clone())),
            timeout: config
                .timeout
                .map(|spec| TimeoutGuard::with_sink(name.clone(), spec, sink.clone())),
            fallback: None,
            sink,
            name,
        }
    }

    /// Attach a fallback. It reports through the same sink as the other layers.
    pub fn with_fallback(mut self, fallback: Fallback<T, E>) -> Self {
        self.fallback = Some(fallback.with_sink(self.sink.clone()));
        self
    }

    /// Operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    pub fn bulkhead(&self) -> Option<&Arc<Bulkhead>> {
        self.bulkhead.as_ref()
    }

    /// Run a zero-argument operation through every configured layer.
    pub async fn call<F, Fut>(&self, mut op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_cancellable(move |_| op()).await
    }

    /// Like [`call`](Self::call), handing each attempt a token that is
    /// cancelled when the attempt times out.
    pub async fn call_cancellable<F, Fut>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut context = ExecutionContext::new(&self.name);
        let error = match self.run_layers(&mut context, op).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match &self.fallback {
            Some(fallback) => fallback.resolve(error, context).await,
            None => Err(error),
        }
    }

    /// Turn the policy and an operation into a reusable callable.
    pub fn wrap<F, Fut>(self, operation: F) -> WrappedOperation<T, E, F>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        WrappedOperation {
            policy: Arc::new(self),
            operation,
        }
    }

    async fn run_layers<F, Fut>(
        &self,
        context: &mut ExecutionContext,
        mut op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _lease = match &self.bulkhead {
            Some(bulkhead) => Some(bulkhead.admit().await.map_err(|reason| {
                ResilienceError::BulkheadRejected {
                    name: self.name.clone(),
                    reason,
                }
            })?),
            None => None,
        };

        let permit = match &self.circuit_breaker {
            Some(breaker) => Some(breaker.try_acquire().ok_or_else(|| {
                ResilienceError::CircuitOpen {
                    name: self.name.clone(),
                }
            })?),
            None => None,
        };

        let timeout = self.timeout.as_ref();
        let mut attempt = || {
            let token = CancellationToken::new();
            let fut = op(token.clone());
            Self::attempt(timeout, token, fut)
        };

        let result = match &self.retry {
            Some(retry) => retry.run(context, attempt).await,
            None => {
                context.begin_attempt();
                let result = attempt().await;
                if let Err(error) = &result {
                    context.record_failure(error.kind(), error.to_string());
                }
                result
            }
        };

        if let Some(permit) = permit {
            match &result {
                Ok(_) => permit.record_success(),
                Err(_) => permit.record_failure(),
            }
        }

        if let Err(error) = &result {
            debug!(operation = %self.name, attempts = context.attempt(), error = %error, "Call failed");
        }
        result
    }

    async fn attempt<Fut>(
        timeout: Option<&TimeoutGuard>,
        token: CancellationToken,
        fut: Fut,
    ) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let fut = async move { fut.await.map_err(ResilienceError::Operation) };
        match timeout {
            Some(guard) => guard.guard(token, fut).await,
            None => fut.await,
        }
    }
}

impl<T, E> Resilience<T, Classified<E>>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    /// Run an operation whose error type does not implement [`Classify`],
    /// assigning kinds with `classifier`.
    pub async fn call_with_classifier<F, Fut, C>(
        &self,
        mut op: F,
        classifier: C,
    ) -> Result<T, ResilienceError<Classified<E>>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorKind,
    {
        let classifier = &classifier;
        self.call(move || {
            let fut = op();
            async move { fut.await.map_err(|e| Classified::new(classifier(&e), e)) }
        })
        .await
    }
}

impl<T, E> std::fmt::Debug for Resilience<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resilience")
            .field("name", &self.name)
            .field("bulkhead", &self.bulkhead.is_some())
            .field("circuit_breaker", &self.circuit_breaker.is_some())
            .field("retry", &self.retry.as_ref().map(|r| r.policy()))
            .field("timeout", &self.timeout.as_ref().map(|t| t.duration()))
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// An operation bound to its policy, callable any number of times.
pub struct WrappedOperation<T, E, F> {
    policy: Arc<Resilience<T, E>>,
    operation: F,
}

impl<T, E, F, Fut> WrappedOperation<T, E, F>
where
    T: Send + 'static,
    E: Classify + Display + Send + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    pub async fn call(&self) -> Result<T, ResilienceError<E>> {
        self.policy.call(|| (self.operation)()).await
    }

    pub fn policy(&self) -> &Resilience<T, E> {
        &self.policy
    }
}

impl<T, E, F: Clone> Clone for WrappedOperation<T, E, F> {
    fn clone(&self) -> Self {
        Self {
            policy: Arc::clone(&self.policy),
            operation: self.operation.clone(),
        }
    }
}

/// Registry, shared state and event sink behind named policies.
#[derive(Debug, Clone)]
pub struct ResilienceEngine {
    registry: Arc<PolicyRegistry>,
    store: Arc<StateStore>,
}

impl Default for ResilienceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilienceEngine {
    /// Engine with the built-in profiles, logging events through `tracing`.
    pub fn new() -> Self {
        Self::with_parts(PolicyRegistry::with_defaults(), StateStore::new())
    }

    pub fn with_registry(registry: PolicyRegistry) -> Self {
        Self::with_parts(registry, StateStore::new())
    }

    /// Engine with the built-in profiles, reporting events to `sink`.
    pub fn with_sink(sink: SharedSink) -> Self {
        Self::with_parts(PolicyRegistry::with_defaults(), StateStore::with_sink(sink))
    }

    pub fn with_parts(registry: PolicyRegistry, store: StateStore) -> Self {
        Self {
            registry: Arc::new(registry),
            store: Arc::new(store),
        }
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Build the policy for operation `name` from the registered `profile`.
    pub fn policy<T, E>(&self, name: &str, profile: &str) -> PolicyResult<Resilience<T, E>>
    where
        T: Send + 'static,
        E: Classify + Display + Send + 'static,
    {
        let config = self.registry.get(profile)?;
        Ok(Resilience::new(name, &config, &self.store))
    }

    /// Build a policy for `name` from an ad-hoc configuration.
    pub fn policy_with<T, E>(&self, name: &str, config: &ResilienceConfig) -> PolicyResult<Resilience<T, E>>
    where
        T: Send + 'static,
        E: Classify + Display + Send + 'static,
    {
        Resilience::try_new(name, config, &self.store)
    }

    /// One-shot execution of `op` under `profile`.
    ///
    /// The outer error reports an unknown profile; the inner result is the call's outcome.
    pub async fn execute<F, Fut, T, E>(
        &self,
        name: &str,
        profile: &str,
        op: F,
    ) -> PolicyResult<Result<T, ResilienceError<E>>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Send + 'static,
        E: Classify + Display + Send + 'static,
    {
        let policy = self.policy::<T, E>(name, profile)?;
        Ok(policy.call(op).await)
    }
}
