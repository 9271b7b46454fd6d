//! # Configuration Settings
//!
//! Defines the configuration structure for the resource builder.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// Prefix shared by every builder environment variable
pub const ENV_PREFIX: &str = "EXC_BUILDER";

/// Main builder configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct BuilderConfig {
    /// Cache sizing and expiry
    #[validate(nested)]
    pub cache: CacheConfig,

    /// Log output configuration
    #[validate(nested)]
    pub logging: LoggingConfig,
}

impl BuilderConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)
    }

    /// Create configuration from flat environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = CacheConfig::default();

        let cache = CacheConfig {
            enabled: env_bool("EXC_BUILDER_CACHE_ENABLED", defaults.enabled),
            http_filters_capacity: env_number(
                "EXC_BUILDER_HTTP_FILTERS_CACHE_SIZE",
                defaults.http_filters_capacity,
            )?,
            clusters_capacity: env_number(
                "EXC_BUILDER_CLUSTERS_CACHE_SIZE",
                defaults.clusters_capacity,
            )?,
            resources_capacity: env_number(
                "EXC_BUILDER_RESOURCES_CACHE_SIZE",
                defaults.resources_capacity,
            )?,
            ttl_seconds: env_number("EXC_BUILDER_CACHE_TTL_SECONDS", defaults.ttl_seconds)?,
        };

        let logging = LoggingConfig {
            level: std::env::var("EXC_BUILDER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            json: env_bool("EXC_BUILDER_LOG_JSON", false),
        };

        let config = Self { cache, logging };
        config.validate()?;
        Ok(config)
    }

    /// Layer defaults, an optional config file and `EXC_BUILDER__*` variables.
    ///
    /// Nested keys use a double underscore, e.g. `EXC_BUILDER__CACHE__TTL_SECONDS`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&BuilderConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: BuilderConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

/// Capacity and expiry of the three builder caches
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// Disable to make every lookup miss
    pub enabled: bool,

    /// HTTP filter chain cache capacity
    #[validate(range(
        min = 1,
        max = 100000,
        message = "HTTP filter cache size must be between 1 and 100000"
    ))]
    pub http_filters_capacity: usize,

    /// Cluster discovery cache capacity
    #[validate(range(
        min = 1,
        max = 100000,
        message = "Cluster cache size must be between 1 and 100000"
    ))]
    pub clusters_capacity: usize,

    /// Built resources cache capacity
    #[validate(range(
        min = 1,
        max = 100000,
        message = "Resources cache size must be between 1 and 100000"
    ))]
    pub resources_capacity: usize,

    /// Entry time-to-live in seconds
    #[validate(range(
        min = 1,
        max = 86400,
        message = "Cache TTL must be between 1 and 86400 seconds"
    ))]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            http_filters_capacity: 1000,
            clusters_capacity: 500,
            resources_capacity: 500,
            ttl_seconds: 300, // 5 minutes
        }
    }
}

impl CacheConfig {
    /// Get cache TTL as Duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub level: String,

    /// Enable JSON structured logging
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_number<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| Error::config(format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}
