// Rampart - A resilience policy engine for async Rust
//
// This library wraps asynchronous operations with circuit breaking, retry,
// timeouts, bulkheads and fallbacks, composed from named profiles.

// Re-export core functionality
pub use rampart_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use rampart_config;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Bulkhead,
        BulkheadConfig,
        CircuitBreaker,
        CircuitBreakerConfig,
        CircuitState,
        Classified,
        Classify,
        ErrorKind,
        // Events
        EventSink,
        Fallback,
        OperationError,
        PolicyError,
        PolicyRegistry,
        Resilience,
        ResilienceConfig,
        ResilienceEngine,
        ResilienceError,
        ResilienceEvent,
        RetryPolicy,
        StateStore,
        TimeoutSpec,
        fallback_default,
        fallback_value,
    };

    #[cfg(feature = "config")]
    pub use rampart_config::ConfigManager;
}
