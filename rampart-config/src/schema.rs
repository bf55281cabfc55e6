// Settings schema for resilience profiles

use crate::validation::{ConfigValidator, Validate};
use crate::Result;
use rampart_core::logging::LogConfig;
use rampart_core::{
    BackoffKind, BulkheadConfig, CircuitBreakerConfig, ErrorKind, PolicyRegistry, ResilienceConfig,
    RetryPolicy, TimeoutSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Root of a Rampart configuration document.
///
/// ```toml
/// [profiles.search]
/// timeout_ms = 2000
///
/// [profiles.search.retry]
/// max_attempts = 4
/// backoff = "fixed"
/// base_delay_ms = 250
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RampartSettings {
    /// Start from the built-in `ai`, `database` and `external-api` profiles.
    pub builtin_profiles: bool,
    pub profiles: HashMap<String, ProfileSettings>,
    pub logging: Option<LogConfig>,
}

impl Default for RampartSettings {
    fn default() -> Self {
        Self {
            builtin_profiles: true,
            profiles: HashMap::new(),
            logging: None,
        }
    }
}

impl RampartSettings {
    /// Build a registry holding every configured profile.
    ///
    /// Configured profiles replace built-in ones of the same name.
    pub fn to_registry(&self) -> Result<PolicyRegistry> {
        let registry = if self.builtin_profiles {
            PolicyRegistry::with_defaults()
        } else {
            PolicyRegistry::new()
        };

        for (name, profile) in &self.profiles {
            registry.register(name.as_str(), profile.to_config())?;
        }
        Ok(registry)
    }
}

impl Validate for RampartSettings {
    fn validate(&self) -> Result<()> {
        for (name, profile) in &self.profiles {
            ConfigValidator::not_empty(name, "profile name")?;
            profile.validate()?;
        }
        Ok(())
    }
}

/// One named profile. An absent section disables that layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileSettings {
    pub circuit_breaker: Option<CircuitBreakerSettings>,
    pub retry: Option<RetrySettings>,
    pub timeout_ms: Option<u64>,
    pub bulkhead: Option<BulkheadSettings>,
}

impl ProfileSettings {
    pub fn to_config(&self) -> ResilienceConfig {
        ResilienceConfig {
            circuit_breaker: self.circuit_breaker.as_ref().map(CircuitBreakerSettings::to_config),
            retry: self.retry.as_ref().map(RetrySettings::to_policy),
            timeout: self.timeout_ms.map(TimeoutSpec::from_millis),
            bulkhead: self.bulkhead.as_ref().map(BulkheadSettings::to_config),
        }
    }
}

impl Validate for ProfileSettings {
    fn validate(&self) -> Result<()> {
        if let Some(breaker) = &self.circuit_breaker {
            ConfigValidator::at_least(breaker.failure_threshold, 1, "failure_threshold")?;
            ConfigValidator::at_least(breaker.reset_timeout_ms, 1, "reset_timeout_ms")?;
        }
        if let Some(retry) = &self.retry {
            ConfigValidator::at_least(retry.max_attempts, 1, "max_attempts")?;
            ConfigValidator::in_range(retry.jitter, 0.0, 1.0, "jitter")?;
            ConfigValidator::at_least(retry.multiplier, 1.0, "multiplier")?;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            ConfigValidator::at_least(timeout_ms, 1, "timeout_ms")?;
        }
        if let Some(bulkhead) = &self.bulkhead {
            ConfigValidator::at_least(bulkhead.max_concurrent, 1, "max_concurrent")?;
        }

        // Cross-field rules live with the core types.
        self.to_config().validate()?;
        Ok(())
    }
}

impl From<&ResilienceConfig> for ProfileSettings {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            circuit_breaker: config.circuit_breaker.as_ref().map(Into::into),
            retry: config.retry.as_ref().map(Into::into),
            timeout_ms: config.timeout.map(|t| millis(t.duration)),
            bulkhead: config.bulkhead.as_ref().map(Into::into),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        (&CircuitBreakerConfig::default()).into()
    }
}

impl CircuitBreakerSettings {
    pub fn to_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(
            self.failure_threshold,
            Duration::from_millis(self.reset_timeout_ms),
        )
    }
}

impl From<&CircuitBreakerConfig> for CircuitBreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout_ms: millis(config.reset_timeout),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: f64,
    /// Error kinds worth another attempt.
    pub retry_on: BTreeSet<ErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        (&RetryPolicy::default()).into()
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
            .backoff(self.backoff)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .multiplier(self.multiplier)
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .jitter(self.jitter)
            .retry_on(self.retry_on.iter().copied())
    }
}

impl From<&RetryPolicy> for RetrySettings {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            backoff: policy.backoff,
            base_delay_ms: millis(policy.base_delay),
            multiplier: policy.multiplier,
            max_delay_ms: millis(policy.max_delay),
            jitter: policy.jitter,
            retry_on: policy.retry_on.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BulkheadSettings {
    pub max_concurrent: u32,
    pub max_queue: u32,
    pub max_wait_ms: Option<u64>,
}

impl Default for BulkheadSettings {
    fn default() -> Self {
        (&BulkheadConfig::default()).into()
    }
}

impl BulkheadSettings {
    pub fn to_config(&self) -> BulkheadConfig {
        let config = BulkheadConfig::new(self.max_concurrent, self.max_queue);
        match self.max_wait_ms {
            Some(ms) => config.max_wait(Duration::from_millis(ms)),
            None => config,
        }
    }
}

impl From<&BulkheadConfig> for BulkheadSettings {
    fn from(config: &BulkheadConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            max_queue: config.max_queue,
            max_wait_ms: config.max_wait.map(millis),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
