// Core library for the Rampart resilience engine
// Circuit breaking, retry, timeout, bulkhead and fallback around async operations

//! ```
//! use rampart_core::{OperationError, Resilience, ResilienceConfig, RetryPolicy, StateStore};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = StateStore::new();
//! let config = ResilienceConfig::new()
//!     .with_retry(RetryPolicy::fixed(3, Duration::from_millis(1)))
//!     .with_timeout(Duration::from_secs(1));
//! let policy: Resilience<u32, OperationError> = Resilience::new("answer", &config, &store);
//!
//! let value = policy.call(|| async { Ok(42) }).await.unwrap();
//! assert_eq!(value, 42);
//! # });
//! ```

pub mod error;
pub mod logging;
pub mod resilience;

// Re-export commonly used types
pub use error::*;
pub use resilience::*;

// Re-export for operations that take a cancellation token
pub use tokio_util::sync::CancellationToken;
