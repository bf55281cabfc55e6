//! Named resilience profiles.

use crate::error::{ErrorKind, PolicyError, PolicyResult};
use crate::resilience::bulkhead::BulkheadConfig;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retry::RetryPolicy;
use crate::resilience::timeout::TimeoutSpec;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Built-in profile for calls to AI providers.
pub const AI_PROFILE: &str = "ai";
/// Built-in profile for database access.
pub const DATABASE_PROFILE: &str = "database";
/// Built-in profile for third-party HTTP APIs.
pub const EXTERNAL_API_PROFILE: &str = "external-api";

/// Layer configuration of a composed policy. An absent layer is skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResilienceConfig {
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub retry: Option<RetryPolicy>,
    pub timeout: Option<TimeoutSpec>,
    pub bulkhead: Option<BulkheadConfig>,
}

impl ResilienceConfig {
    /// A configuration with no layers.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<TimeoutSpec>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn with_bulkhead(mut self, config: BulkheadConfig) -> Self {
        self.bulkhead = Some(config);
        self
    }

    /// True when no layer is configured.
    pub fn is_passthrough(&self) -> bool {
        self.circuit_breaker.is_none()
            && self.retry.is_none()
            && self.timeout.is_none()
            && self.bulkhead.is_none()
    }

    /// Create configuration for AI provider calls
    pub fn for_ai() -> Self {
        Self::new()
            .with_circuit_breaker(CircuitBreakerConfig::new(5, Duration::from_secs(60)))
            .with_retry(
                RetryPolicy::exponential(3, Duration::from_millis(500), Duration::from_secs(10))
                    .jitter(0.2),
            )
            .with_timeout(Duration::from_secs(30))
            .with_bulkhead(BulkheadConfig::new(10, 50))
    }

    /// Create configuration for database operations
    pub fn for_database() -> Self {
        Self::new()
            .with_circuit_breaker(CircuitBreakerConfig::new(5, Duration::from_secs(30)))
            .with_retry(
                RetryPolicy::exponential(3, Duration::from_millis(100), Duration::from_secs(2))
                    .jitter(0.1)
                    .retry_on([ErrorKind::Transient, ErrorKind::Timeout]),
            )
            .with_timeout(Duration::from_secs(5))
            .with_bulkhead(BulkheadConfig::new(20, 100))
    }

    /// Create configuration for external API calls
    pub fn for_external_api() -> Self {
        Self::new()
            .with_circuit_breaker(CircuitBreakerConfig::new(5, Duration::from_secs(45)))
            .with_retry(
                RetryPolicy::exponential(4, Duration::from_millis(200), Duration::from_secs(5))
                    .jitter(0.2),
            )
            .with_timeout(Duration::from_secs(10))
            .with_bulkhead(BulkheadConfig::new(16, 32))
    }

    /// Validate every configured layer.
    pub fn validate(&self) -> PolicyResult<()> {
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if let Some(timeout) = &self.timeout {
            timeout.validate()?;
        }
        if let Some(bulkhead) = &self.bulkhead {
            bulkhead.validate()?;
        }
        Ok(())
    }
}

/// Registry of named, validated profiles.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    profiles: RwLock<HashMap<String, ResilienceConfig>>,
}

impl PolicyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `ai`, `database` and `external-api` profiles.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        {
            let mut profiles = registry.profiles.write();
            profiles.insert(AI_PROFILE.to_string(), ResilienceConfig::for_ai());
            profiles.insert(DATABASE_PROFILE.to_string(), ResilienceConfig::for_database());
            profiles.insert(
                EXTERNAL_API_PROFILE.to_string(),
                ResilienceConfig::for_external_api(),
            );
        }
        registry
    }

    /// Register or replace a profile. Invalid configurations are refused.
    pub fn register(&self, name: impl Into<String>, config: ResilienceConfig) -> PolicyResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PolicyError::invalid("profile", "name must not be empty"));
        }
        config.validate()?;

        let replaced = self.profiles.write().insert(name.clone(), config).is_some();
        if replaced {
            info!(profile = %name, "Policy profile replaced");
        } else {
            debug!(profile = %name, "Policy profile registered");
        }
        Ok(())
    }

    /// Look up a profile by name.
    pub fn get(&self, name: &str) -> PolicyResult<ResilienceConfig> {
        self.profiles
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PolicyError::ProfileNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.read().contains_key(name)
    }

    pub fn unregister(&self, name: &str) -> Option<ResilienceConfig> {
        self.profiles.write().remove(name)
    }

    /// Registered profile names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles() {
        let registry = PolicyRegistry::with_defaults();

        assert_eq!(registry.names(), vec!["ai", "database", "external-api"]);
        for name in registry.names() {
            assert!(registry.get(&name).unwrap().validate().is_ok());
        }

        let db = registry.get(DATABASE_PROFILE).unwrap();
        let retry = db.retry.unwrap();
        assert!(!retry.is_retryable(ErrorKind::RateLimit));
        assert_eq!(db.timeout, Some(TimeoutSpec::new(Duration::from_secs(5))));
    }

    #[test]
    fn test_register_and_get() {
        let registry = PolicyRegistry::new();
        assert!(registry.is_empty());

        let config = ResilienceConfig::new().with_timeout(Duration::from_millis(250));
        registry.register("fast", config.clone()).unwrap();

        assert_eq!(registry.get("fast").unwrap(), config);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("fast"));
    }

    #[test]
    fn test_unknown_profile() {
        let registry = PolicyRegistry::new();
        assert_eq!(
            registry.get("missing").unwrap_err(),
            PolicyError::ProfileNotFound("missing".to_string())
        );
    }

    #[test]
    fn test_invalid_profile_refused() {
        let registry = PolicyRegistry::new();
        let config = ResilienceConfig::new().with_retry(RetryPolicy::new(0));

        let err = registry.register("broken", config).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::InvalidConfig {
                field: "max_attempts",
                ..
            }
        ));
        assert!(!registry.contains("broken"));
        assert!(registry.register("  ", ResilienceConfig::new()).is_err());
    }

    #[test]
    fn test_replace_and_unregister() {
        let registry = PolicyRegistry::with_defaults();
        registry
            .register(AI_PROFILE, ResilienceConfig::new())
            .unwrap();
        assert!(registry.get(AI_PROFILE).unwrap().is_passthrough());

        assert!(registry.unregister(AI_PROFILE).is_some());
        assert!(registry.unregister(AI_PROFILE).is_none());
    }
}
