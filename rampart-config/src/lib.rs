// Configuration management for Rampart resilience profiles

pub mod env;
pub mod error;
pub mod loader;
pub mod merge;
pub mod schema;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use merge::deep_merge;
pub use schema::{
    BulkheadSettings, CircuitBreakerSettings, ProfileSettings, RampartSettings, RetrySettings,
};
pub use validation::{ConfigValidator, Validate};

use merge::{get_path, insert_path, merge_tables, split_path};
use parking_lot::RwLock;
use rampart_core::PolicyRegistry;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Main configuration manager
///
/// Sources are merged in load order, later ones winning key by key. The
/// usual order is files first, then the environment:
///
/// ```no_run
/// use rampart_config::ConfigManager;
///
/// let manager = ConfigManager::new();
/// manager.load_file("rampart.toml")?;
/// manager.load_env();
///
/// let registry = manager.build_registry()?;
/// # Ok::<(), rampart_config::ConfigError>(())
/// ```
#[derive(Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Map<String, Value>>>,
    env_loader: Arc<EnvLoader>,
}

impl ConfigManager {
    /// Create a new configuration manager reading `RAMPART__` variables
    pub fn new() -> Self {
        Self::with_prefix(env::DEFAULT_PREFIX)
    }

    /// Create with environment variable prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            config: Arc::new(RwLock::new(Map::new())),
            env_loader: Arc::new(EnvLoader::new(prefix)),
        }
    }

    /// Load configuration from file, detecting the format by extension
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let loader = ConfigLoader::auto(path)?;
        self.load_file_as(path, loader.format())
    }

    /// Load configuration from file in the given format
    pub fn load_file_as(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let path = path.as_ref();
        let data = ConfigLoader::new(format).load_file(path)?;
        debug!(path = %path.display(), "Configuration file loaded");
        self.merge_value(data);
        Ok(())
    }

    /// Load configuration from a string
    pub fn load_str(&self, content: &str, format: FileFormat) -> Result<()> {
        let data = ConfigLoader::new(format).parse(content)?;
        self.merge_value(data);
        Ok(())
    }

    /// Load configuration from environment variables
    pub fn load_env(&self) {
        self.merge_value(self.env_loader.load());
    }

    /// Load configuration from the given variables instead of the process environment
    pub fn load_env_from<I, K, V>(&self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.merge_value(self.env_loader.load_from(vars));
    }

    /// Load a .env file into the process environment, then the environment
    pub fn load_dotenv(&self, path: Option<&Path>) -> Result<()> {
        if let Some(path) = path {
            dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
        } else {
            dotenvy::dotenv().ok(); // Ignore if .env doesn't exist
        }
        self.load_env();
        Ok(())
    }

    /// Set a configuration value at a dotted path such as `profiles.ai.timeout_ms`
    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;

        let mut config = self.config.write();
        insert_path(&mut config, &split_path(key), json_value);

        Ok(())
    }

    /// Get a configuration value at a dotted path
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let config = self.config.read();

        let value = get_path(&config, key).ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::DeserializationError(format!("{}: {}", key, e)))
    }

    /// Get a configuration value with default
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Check if a key exists
    pub fn has(&self, key: &str) -> bool {
        get_path(&self.config.read(), key).is_some()
    }

    /// Merge configuration from another manager
    pub fn merge(&self, other: &ConfigManager) {
        let overlay = other.config.read().clone();
        merge_tables(&mut self.config.write(), overlay);
    }

    /// Snapshot of the merged configuration tree
    pub fn to_value(&self) -> Value {
        Value::Object(self.config.read().clone())
    }

    /// Deserialize and validate the merged configuration
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let validated: T = serde_json::from_value(self.to_value())
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        validated.validate()?;

        Ok(validated)
    }

    /// The merged configuration as [`RampartSettings`]
    pub fn settings(&self) -> Result<RampartSettings> {
        self.load_validated()
    }

    /// Build a policy registry from the merged configuration
    pub fn build_registry(&self) -> Result<PolicyRegistry> {
        let settings = self.settings()?;
        let registry = settings.to_registry()?;
        debug!(profiles = ?registry.names(), "Policy registry built from configuration");
        Ok(registry)
    }

    fn merge_value(&self, data: Value) {
        if let Value::Object(map) = data {
            merge_tables(&mut self.config.write(), map);
        }
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
