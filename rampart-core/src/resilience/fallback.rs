//! Fallback pattern for graceful degradation.
//!
//! A fallback receives the terminal error of a failed call together with its
//! [`ExecutionContext`] and either produces a substitute value or returns an
//! error, which then reaches the caller unchanged.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_core::{Fallback, ResilienceError};
//!
//! let fallback = Fallback::new(|error, ctx| async move {
//!     tracing::info!(attempts = ctx.attempt(), "serving cached recommendations");
//!     cache.recommendations().await.ok_or(error)
//! });
//! ```

use crate::error::{Classify, ErrorKind, ResilienceError};
use crate::resilience::context::ExecutionContext;
use crate::resilience::events::{ResilienceEvent, SharedSink, default_sink};
use futures_util::future::BoxFuture;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Type alias for an async fallback function.
pub type FallbackFn<T, E> = Arc<
    dyn Fn(ResilienceError<E>, ExecutionContext) -> BoxFuture<'static, Result<T, ResilienceError<E>>>
        + Send
        + Sync,
>;

/// Substitute-result provider for a failed call.
pub struct Fallback<T, E> {
    handler: FallbackFn<T, E>,
    only_for: Option<HashSet<ErrorKind>>,
    sink: SharedSink,
}

impl<T, E> Fallback<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create a new fallback handler.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(ResilienceError<E>, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'static,
    {
        let handler: FallbackFn<T, E> = Arc::new(
            move |error: ResilienceError<E>,
                  context: ExecutionContext|
                  -> BoxFuture<'static, Result<T, ResilienceError<E>>> {
                Box::pin(handler(error, context))
            },
        );
        Self {
            handler,
            only_for: None,
            sink: default_sink(),
        }
    }

    /// Only engage for errors of the given kinds; others propagate.
    pub fn only_for(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.only_for = Some(kinds.into_iter().collect());
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Whether the fallback engages for an error of `kind`.
    pub fn applies_to(&self, kind: ErrorKind) -> bool {
        self.only_for
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&kind))
    }

    /// Resolve a failed call.
    pub async fn resolve(
        &self,
        error: ResilienceError<E>,
        context: ExecutionContext,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify,
    {
        let kind = error.kind();
        if !self.applies_to(kind) {
            debug!(operation = %context.name(), kind = %kind, "Fallback skipped for error kind");
            return Err(error);
        }

        self.sink.emit(&ResilienceEvent::FallbackInvoked {
            name: context.name().to_string(),
            kind,
        });
        (self.handler)(error, context).await
    }

    /// Execute the primary operation, falling back on failure.
    pub async fn call<F, Fut>(&self, name: &str, primary: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let mut context = ExecutionContext::new(name);
        context.begin_attempt();
        match primary().await {
            Ok(result) => Ok(result),
            Err(e) => {
                context.record_failure(e.kind(), e.to_string());
                self.resolve(ResilienceError::Operation(e), context).await
            }
        }
    }
}

impl<T, E> Clone for Fallback<T, E> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            only_for: self.only_for.clone(),
            sink: Arc::clone(&self.sink),
        }
    }
}

/// Create a fallback that returns a constant value.
pub fn fallback_value<T, E>(value: T) -> Fallback<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    Fallback::new(move |_, _| {
        let v = value.clone();
        async move { Ok(v) }
    })
}

/// Create a fallback that returns a default value.
pub fn fallback_default<T, E>() -> Fallback<T, E>
where
    T: Default + Send + 'static,
    E: Send + 'static,
{
    Fallback::new(|_, _| async { Ok(T::default()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OperationError;
    use crate::resilience::events::RecordingSink;

    type Error = ResilienceError<OperationError>;

    #[tokio::test]
    async fn test_fallback_success() {
        let fallback: Fallback<&str, OperationError> = fallback_value("fallback");

        let result = fallback.call("test", || async { Ok("primary") }).await;

        assert_eq!(result.unwrap(), "primary");
    }

    #[tokio::test]
    async fn test_fallback_on_failure() {
        let sink = RecordingSink::new();
        let fallback: Fallback<&str, OperationError> =
            fallback_value("fallback").with_sink(sink.clone());

        let result = fallback
            .call("test", || async { Err(OperationError::transient("down")) })
            .await;

        assert_eq!(result.unwrap(), "fallback");
        assert_eq!(
            sink.events(),
            vec![ResilienceEvent::FallbackInvoked {
                name: "test".to_string(),
                kind: ErrorKind::Transient,
            }]
        );
    }

    #[tokio::test]
    async fn test_fallback_receives_error_and_context() {
        let fallback = Fallback::new(|error: Error, ctx: ExecutionContext| async move {
            Ok(format!("{} after {} attempt(s): {}", ctx.name(), ctx.attempt(), error))
        });

        let result = fallback
            .call("ai.chat", || async { Err(OperationError::fatal("quota")) })
            .await;

        assert_eq!(result.unwrap(), "ai.chat after 1 attempt(s): fatal: quota");
    }

    #[tokio::test]
    async fn test_fallback_may_rethrow() {
        let fallback: Fallback<u32, OperationError> = Fallback::new(|error, _| async move { Err(error) });

        let result = fallback
            .call("test", || async { Err(OperationError::fatal("original")) })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.operation().unwrap().message, "original");
    }

    #[tokio::test]
    async fn test_only_for_filters_kinds() {
        let fallback: Fallback<u32, OperationError> =
            fallback_default().only_for([ErrorKind::CircuitOpen, ErrorKind::Timeout]);

        assert!(fallback.applies_to(ErrorKind::CircuitOpen));
        assert!(!fallback.applies_to(ErrorKind::Fatal));

        let skipped = fallback
            .call("test", || async { Err(OperationError::fatal("nope")) })
            .await;
        assert!(skipped.is_err());

        let substituted = fallback
            .resolve(
                ResilienceError::CircuitOpen {
                    name: "test".to_string(),
                },
                ExecutionContext::new("test"),
            )
            .await;
        assert_eq!(substituted.unwrap(), 0);
    }
}
