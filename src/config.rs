//! # Configuration
//!
//! Settings consumed by the cache, circuit breaker and request layers. Values are
//! read once when components are constructed and never re-read mid-operation.
//!
//! Loading layers three sources, later ones winning:
//!
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. environment variables named `CALLGUARD__<SECTION>__<KEY>`
//!    (for example `CALLGUARD__CACHE__LRU_SIZE=500`)
//!
//! ```rust,no_run
//! use callguard::config::CallGuardConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CallGuardConfig::load(Some(Path::new("config/callguard.toml")))?;
//! assert!(config.circuit_breaker.failure_threshold > 0);
//! # Ok(())
//! # }
//! ```

use crate::resilience::CircuitBreakerConfig;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Key prefix used when no service name is configured
pub const DEFAULT_KEY_PREFIX: &str = "unnamed_service";

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "CALLGUARD";

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigurationError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigurationError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        ConfigurationError::Load(error.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallGuardConfig {
    pub circuit_breaker: CircuitBreakerSettings,
    pub requests: RequestSettings,
    pub cache: CacheSettings,
}

/// Breaker defaults plus per-dependency overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures tolerated before the breaker opens
    pub failure_threshold: u32,

    /// Seconds spent Open before a trial call is admitted
    pub timeout_seconds: u64,

    /// Overrides keyed by dependency name
    pub component_configs: HashMap<String, BreakerComponentSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerComponentSettings {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_seconds: 30,
            component_configs: HashMap::new(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Settings for one dependency, falling back to the defaults
    pub fn config_for_component(&self, component_name: &str) -> BreakerComponentSettings {
        self.component_configs
            .get(component_name)
            .cloned()
            .unwrap_or(BreakerComponentSettings {
                failure_threshold: self.failure_threshold,
                timeout_seconds: self.timeout_seconds,
            })
    }

    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_secs(self.timeout_seconds),
        }
    }
}

impl BreakerComponentSettings {
    /// Convert to the resilience module's format
    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_secs(self.timeout_seconds),
        }
    }
}

/// Outbound request defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    /// Connect/read timeout applied when a call does not override it
    pub timeout_seconds: u64,

    /// Entries kept by the default HTTP response cache
    pub http_cache_size: usize,

    /// Proxy used for `service-*-service` hosts (local development)
    pub local_services_proxy: Option<String>,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 5,
            http_cache_size: 1000,
            local_services_proxy: None,
        }
    }
}

impl RequestSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Call cache defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Kill-switch: when false, wrappers call straight through
    pub enabled: bool,

    /// Mixed into every fingerprint so services sharing a tier never collide
    pub key_prefix: String,

    /// Tier sizes and lifetime used by [`crate::cache::default_chain`]
    pub fifo_size: usize,
    pub lru_size: usize,
    pub ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            fifo_size: 100,
            lru_size: 100,
            ttl_seconds: 60,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl CallGuardConfig {
    /// Load defaults, then `path` (if given), then environment overrides
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::FileNotFound {
                    path: path.display().to_string(),
                });
            }
            debug!(path = %path.display(), "Reading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        let config: CallGuardConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        info!(
            failure_threshold = config.circuit_breaker.failure_threshold,
            breaker_timeout_seconds = config.circuit_breaker.timeout_seconds,
            request_timeout_seconds = config.requests.timeout_seconds,
            cache_enabled = config.cache.enabled,
            key_prefix = %config.cache.key_prefix,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults, without environment overrides
    pub fn from_toml_str(toml: &str) -> ConfigResult<Self> {
        let config: CallGuardConfig = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 {
            return Err(ConfigurationError::invalid(
                "circuit_breaker.failure_threshold",
                "must be greater than 0",
            ));
        }
        if breaker.timeout_seconds == 0 {
            return Err(ConfigurationError::invalid(
                "circuit_breaker.timeout_seconds",
                "must be greater than 0",
            ));
        }
        for (name, component) in &breaker.component_configs {
            if component.failure_threshold == 0 || component.timeout_seconds == 0 {
                return Err(ConfigurationError::invalid(
                    &format!("circuit_breaker.component_configs.{name}"),
                    "threshold and timeout must be greater than 0",
                ));
            }
        }

        if self.requests.timeout_seconds == 0 {
            return Err(ConfigurationError::invalid(
                "requests.timeout_seconds",
                "must be greater than 0",
            ));
        }
        if self.requests.http_cache_size == 0 {
            return Err(ConfigurationError::invalid(
                "requests.http_cache_size",
                "must be greater than 0",
            ));
        }

        let cache = &self.cache;
        for (field, size) in [("cache.fifo_size", cache.fifo_size), ("cache.lru_size", cache.lru_size)] {
            if size == 0 {
                return Err(ConfigurationError::invalid(field, "must be greater than 0"));
            }
        }
        if cache.ttl_seconds == 0 {
            return Err(ConfigurationError::invalid(
                "cache.ttl_seconds",
                "must be greater than 0",
            ));
        }
        if cache.key_prefix.is_empty() {
            return Err(ConfigurationError::invalid("cache.key_prefix", "must not be empty"));
        }
        Ok(())
    }
}
