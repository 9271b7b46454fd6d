//! # Observability Infrastructure
//!
//! Structured logging for the resource builder. Metrics emission belongs to
//! the surrounding controller; the builder only exposes cache statistics.

pub mod logging;

pub use logging::{init_logging, log_config_info};
