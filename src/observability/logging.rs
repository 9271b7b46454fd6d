//! # Structured Logging
//!
//! Provides structured logging macros and subscriber setup using the tracing ecosystem.

use crate::config::LoggingConfig;
use crate::errors::{Error, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Create a tracing span for a single VirtualService build.
///
/// ```rust,ignore
/// let span = build_span!("default", "test-vs", 3);
/// let _entered = span.enter();
/// ```
#[macro_export]
macro_rules! build_span {
    ($namespace:expr, $name:expr, $generation:expr) => {
        tracing::info_span!(
            "build_resources",
            namespace = %$namespace,
            vs = %$name,
            generation = $generation,
            mode = tracing::field::Empty
        )
    };
}

/// Create a tracing span for a builder phase.
#[macro_export]
macro_rules! phase_span {
    ($phase:expr) => {
        tracing::debug_span!("build_phase", phase = %$phase)
    };
    ($phase:expr, $($field:tt)*) => {
        tracing::debug_span!("build_phase", phase = %$phase, $($field)*)
    };
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over the configured level. Installing twice is not an
/// error; the first subscriber stays in place.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| {
            Error::config_with_source(format!("Invalid log level '{}'", config.level), Box::new(e))
        })?;

    let installed = if config.json {
        fmt().with_env_filter(filter).json().with_current_span(true).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init()
    };

    if installed.is_err() {
        // Subscriber already set elsewhere (e.g. integration tests); ignore.
        tracing::debug!("global tracing subscriber already installed");
    }

    Ok(())
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::BuilderConfig) {
    tracing::info!(
        cache_enabled = config.cache.enabled,
        http_filters_capacity = config.cache.http_filters_capacity,
        clusters_capacity = config.cache.clusters_capacity,
        resources_capacity = config.cache.resources_capacity,
        cache_ttl_seconds = config.cache.ttl_seconds,
        "Resource builder configuration"
    );
}
