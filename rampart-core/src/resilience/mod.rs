//! # Resilience Patterns
//!
//! Fault-tolerance layers for calls to unreliable dependencies.
//!
//! ## Patterns Included
//!
//! - **Circuit Breaker**: Fail fast while a dependency is unhealthy
//! - **Retry**: Fixed or exponential backoff driven by error classification
//! - **Timeout**: Per-attempt deadline with cooperative cancellation
//! - **Bulkhead**: Concurrency cap with a bounded FIFO wait queue
//! - **Fallback**: Substitute results when everything else failed
//!
//! [`Resilience`] composes them in a fixed order around one operation;
//! [`ResilienceEngine`] builds compositions from named profiles.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rampart_core::{ResilienceConfig, Resilience, RetryPolicy, StateStore};
//! use std::time::Duration;
//!
//! let store = StateStore::new();
//! let config = ResilienceConfig::new()
//!     .with_retry(RetryPolicy::fixed(3, Duration::from_millis(200)))
//!     .with_timeout(Duration::from_secs(2));
//!
//! let lookup: Resilience<Profile, ApiError> = Resilience::new("users.lookup", &config, &store);
//! let profile = lookup.call(|| api.fetch_profile(user_id)).await?;
//! ```

mod bulkhead;
mod circuit_breaker;
mod composer;
mod context;
mod events;
mod fallback;
mod policy;
mod retry;
mod store;
mod timeout;

pub use bulkhead::*;
pub use circuit_breaker::*;
pub use composer::*;
pub use context::*;
pub use events::*;
pub use fallback::*;
pub use policy::*;
pub use retry::*;
pub use store::*;
pub use timeout::*;
