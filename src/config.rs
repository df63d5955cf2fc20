//! Configuration management for throttle.

use std::path::Path;
use std::sync::Arc;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ThrottleError};
use crate::ratelimit::{CounterStore, Limiter, RateSpec};
use crate::store::{LocalStore, RemoteParams, RemoteStore, DEFAULT_CAPACITY};

/// Prefix for environment variable overrides, e.g. `THROTTLE_RATE=10/m`.
const ENV_PREFIX: &str = "THROTTLE";

/// Main configuration for a limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Budget in compact form, e.g. `"5/m"`
    pub rate: String,

    /// Counter storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Which counter store backs the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process LRU map
    #[default]
    Local,
    /// Shared Redis instance
    Remote,
}

/// Storage configuration.
///
/// Only the fields relevant to the selected backend are used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store variant
    #[serde(default)]
    pub backend: Backend,

    /// Maximum number of keys held by the local store
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Redis host
    #[serde(default = "default_host")]
    pub host: String,

    /// Redis port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Redis password
    #[serde(default)]
    pub credential: Option<String>,

    /// Redis database index
    #[serde(default)]
    pub db: u8,

    /// Prefix prepended to every Redis key
    #[serde(default)]
    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            capacity: default_capacity(),
            host: default_host(),
            port: default_port(),
            credential: None,
            db: 0,
            key_prefix: String::new(),
        }
    }
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

impl ThrottleConfig {
    /// Configuration for `rate` backed by a default local store.
    pub fn new(rate: impl Into<String>) -> Self {
        Self {
            rate: rate.into(),
            storage: StorageConfig::default(),
        }
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ThrottleConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, then apply `THROTTLE_*` environment
    /// overrides (nested keys use `__`, e.g. `THROTTLE_STORAGE__CAPACITY`).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading throttle configuration");

        let config: ThrottleConfig = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the rate string and storage bounds.
    pub fn validate(&self) -> Result<RateSpec> {
        let spec = RateSpec::parse(&self.rate)?;
        if self.storage.backend == Backend::Local && self.storage.capacity == 0 {
            return Err(ThrottleError::Config(
                "storage.capacity must be greater than zero".to_string(),
            ));
        }
        Ok(spec)
    }

    /// Build the configured store.
    pub fn build_store(&self) -> Result<Arc<dyn CounterStore>> {
        let storage = &self.storage;
        let store: Arc<dyn CounterStore> = match storage.backend {
            Backend::Local => Arc::new(LocalStore::new(storage.capacity)?),
            Backend::Remote => {
                let mut params = RemoteParams::new(storage.host.clone(), storage.port).with_db(storage.db);
                params.credential = storage.credential.clone();
                Arc::new(RemoteStore::with_params(params)?.with_key_prefix(storage.key_prefix.clone()))
            }
        };
        Ok(store)
    }

    /// Build a limiter over a freshly constructed store.
    pub fn build_limiter(&self) -> Result<Limiter> {
        let spec = self.validate()?;
        let store = self.build_store()?;
        info!(rate = %spec, backend = ?self.storage.backend, "Limiter configured");
        Ok(Limiter::from_spec(spec, store))
    }
}
