//! # Configuration Management
//!
//! Cache sizing and logging settings for the resource builder. Settings come
//! from defaults, an optional file, and environment variables.

pub mod settings;

pub use settings::{BuilderConfig, CacheConfig, LoggingConfig};
