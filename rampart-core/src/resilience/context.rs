//! Per-invocation execution context.

use crate::error::ErrorKind;
use std::time::Duration;
use tokio::time::Instant;

/// One failed attempt of a protected call.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    /// 1-based attempt number.
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
    /// Time since the invocation started.
    pub elapsed: Duration,
}

/// State carried through a single invocation of a composed policy.
///
/// Created fresh for every call and handed to the fallback when one runs.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    name: String,
    attempt: u32,
    failures: Vec<AttemptFailure>,
    started_at: Instant,
}

impl ExecutionContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attempt: 0,
            failures: Vec::new(),
            started_at: Instant::now(),
        }
    }

    /// Operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of attempts started so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Failures observed so far, oldest first.
    pub fn failures(&self) -> &[AttemptFailure] {
        &self.failures
    }

    pub fn last_failure(&self) -> Option<&AttemptFailure> {
        self.failures.last()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub(crate) fn record_failure(&mut self, kind: ErrorKind, message: String) {
        let elapsed = self.elapsed();
        self.failures.push(AttemptFailure {
            attempt: self.attempt,
            kind,
            message,
            elapsed,
        });
    }
}
