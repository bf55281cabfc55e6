// Error types for the Rampart resilience engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure classes understood by the resilience layers.
///
/// `Timeout`, `CircuitOpen` and `BulkheadRejected` are produced by the engine
/// itself; the other kinds are reported by the protected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Temporary failure, worth retrying.
    Transient,
    /// The dependency asked the caller to slow down.
    RateLimit,
    /// An attempt exceeded its deadline.
    Timeout,
    /// The circuit breaker rejected the call.
    CircuitOpen,
    /// The bulkhead rejected the call.
    BulkheadRejected,
    /// Permanent failure, never retried.
    Fatal,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::Transient,
        ErrorKind::RateLimit,
        ErrorKind::Timeout,
        ErrorKind::CircuitOpen,
        ErrorKind::BulkheadRejected,
        ErrorKind::Fatal,
    ];

    /// Get the kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::BulkheadRejected => "bulkhead_rejected",
            ErrorKind::Fatal => "fatal",
        }
    }

    /// Admission rejections fail fast and are never retried within a call.
    pub fn is_fast_fail(&self) -> bool {
        matches!(self, ErrorKind::CircuitOpen | ErrorKind::BulkheadRejected)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by error types that can tell the engine what kind of failure they are.
pub trait Classify {
    /// The failure class of this error.
    fn kind(&self) -> ErrorKind;

    /// Server-hinted delay before the next attempt (rate limiting).
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Why a bulkhead refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// All slots busy and the wait queue is at capacity.
    QueueFull,
    /// Waited in the queue longer than the configured `max_wait`.
    WaitTimeout,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::QueueFull => write!(f, "queue full"),
            RejectReason::WaitTimeout => write!(f, "timed out waiting for a slot"),
        }
    }
}

/// Terminal error of a protected call.
#[derive(Error, Debug)]
pub enum ResilienceError<E> {
    /// A single attempt exceeded its deadline.
    #[error("operation '{name}' timed out after {duration:?}")]
    Timeout { name: String, duration: Duration },

    /// The circuit breaker failed the call fast.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// The bulkhead failed the call fast.
    #[error("bulkhead '{name}' rejected the call: {reason}")]
    BulkheadRejected { name: String, reason: RejectReason },

    /// The protected operation itself failed.
    #[error("{0}")]
    Operation(E),
}

impl<E> ResilienceError<E> {
    /// Returns the operation error, if this is one.
    pub fn operation(&self) -> Option<&E> {
        match self {
            ResilienceError::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Consumes the error, returning the operation error if this is one.
    pub fn into_operation(self) -> Option<E> {
        match self {
            ResilienceError::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the error was generated by the engine rather than the operation.
    pub fn is_internal(&self) -> bool {
        !matches!(self, ResilienceError::Operation(_))
    }

    /// Map the operation error, keeping engine-generated variants as they are.
    pub fn map_operation<F, O>(self, f: O) -> ResilienceError<F>
    where
        O: FnOnce(E) -> F,
    {
        match self {
            ResilienceError::Timeout { name, duration } => ResilienceError::Timeout { name, duration },
            ResilienceError::CircuitOpen { name } => ResilienceError::CircuitOpen { name },
            ResilienceError::BulkheadRejected { name, reason } => {
                ResilienceError::BulkheadRejected { name, reason }
            }
            ResilienceError::Operation(e) => ResilienceError::Operation(f(e)),
        }
    }
}

impl<E: Classify> Classify for ResilienceError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::Timeout { .. } => ErrorKind::Timeout,
            ResilienceError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ResilienceError::BulkheadRejected { .. } => ErrorKind::BulkheadRejected,
            ResilienceError::Operation(e) => e.kind(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ResilienceError::Operation(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// General-purpose classified error for operations without their own error type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct OperationError {
    /// Failure class.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Server-hinted delay, for rate-limit errors.
    pub retry_after: Option<Duration>,
}

impl OperationError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    /// A retryable transient failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// A rate-limit failure, optionally carrying the server's retry hint.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(ErrorKind::RateLimit, message)
        }
    }

    /// A permanent failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

impl Classify for OperationError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// Wraps an arbitrary error with a kind assigned by a classifier function.
#[derive(Debug, Clone)]
pub struct Classified<E> {
    /// Assigned failure class.
    pub kind: ErrorKind,
    /// The original error.
    pub error: E,
}

impl<E> Classified<E> {
    pub fn new(kind: ErrorKind, error: E) -> Self {
        Self { kind, error }
    }

    /// Unwrap the original error.
    pub fn into_inner(self) -> E {
        self.error
    }
}

impl<E: fmt::Display> fmt::Display for Classified<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<E> std::error::Error for Classified<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<E> Classify for Classified<E> {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Errors raised while building or looking up policies.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("Policy profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

impl PolicyError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        PolicyError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

pub type PolicyResult<T> = std::result::Result<T, PolicyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_fail_kinds() {
        assert!(ErrorKind::CircuitOpen.is_fast_fail());
        assert!(ErrorKind::BulkheadRejected.is_fast_fail());
        assert!(!ErrorKind::Transient.is_fast_fail());
        assert!(!ErrorKind::Timeout.is_fast_fail());
    }

    #[test]
    fn test_internal_variants_classify_themselves() {
        let timeout: ResilienceError<OperationError> = ResilienceError::Timeout {
            name: "ai.chat".to_string(),
            duration: Duration::from_millis(50),
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert!(timeout.is_internal());

        let open: ResilienceError<OperationError> = ResilienceError::CircuitOpen {
            name: "ai.chat".to_string(),
        };
        assert_eq!(open.kind(), ErrorKind::CircuitOpen);
        assert_eq!(open.to_string(), "circuit breaker 'ai.chat' is open");
    }

    #[test]
    fn test_operation_error_delegates() {
        let err: ResilienceError<OperationError> = ResilienceError::Operation(
            OperationError::rate_limited("slow down", Some(Duration::from_secs(2))),
        );
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(err.to_string(), "rate_limit: slow down");
    }

    #[test]
    fn test_map_operation_keeps_internal_variants() {
        let err: ResilienceError<&str> = ResilienceError::BulkheadRejected {
            name: "db".to_string(),
            reason: RejectReason::QueueFull,
        };
        let mapped = err.map_operation(|e| e.len());
        assert!(matches!(mapped, ResilienceError::BulkheadRejected { .. }));

        let err: ResilienceError<&str> = ResilienceError::Operation("boom");
        assert_eq!(err.map_operation(|e| e.len()).into_operation(), Some(4));
    }

    #[test]
    fn test_classified_display_is_transparent() {
        let classified = Classified::new(ErrorKind::Fatal, "bad request");
        assert_eq!(classified.to_string(), "bad request");
        assert_eq!(classified.kind(), ErrorKind::Fatal);
    }
}
