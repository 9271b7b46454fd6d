//! # exc-resbuilder
//!
//! Builds the Envoy xDS resources (filter chains, route configurations,
//! clusters and SDS secrets) that serve a `VirtualService` custom resource.
//!
//! ## Architecture
//!
//! ```text
//! VirtualService ─→ Template Expander ─→ Builder ─┬─→ HTTP filters (RBAC … router)
//!                                                 ├─→ Route configuration (+ 421 fallback)
//!        Store (read-only) ──────────────────────→├─→ TLS secrets per domain
//!                                                 ├─→ Filter chains (HCM over RDS/ADS)
//!                                                 └─→ Clusters, Secrets ─→ Resources
//! ```
//!
//! The builder performs no I/O. Every referenced entity is read from a
//! [`store::Store`] snapshot and every emitted message is an `envoy-types`
//! protobuf.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use exc_resbuilder::{Builder, BuilderConfig, MemoryStore, Result};
//!
//! fn main() -> Result<()> {
//!     let config = BuilderConfig::from_env()?;
//!     exc_resbuilder::observability::init_logging(&config.logging)?;
//!
//!     let mut store = MemoryStore::new();
//!     store.apply_yaml(&std::fs::read_to_string("manifests.yaml").unwrap_or_default())?;
//!
//!     let builder = Builder::new(&config);
//!     for vs in store.virtual_services() {
//!         let output = builder.build(vs, &store)?;
//!         println!("{}: {} clusters", vs.name(), output.resources.clusters.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod builder;
pub mod config;
pub mod errors;
pub mod observability;
pub mod store;
pub mod xds;

// Re-export commonly used types and traits
pub use api::{NamespacedName, VirtualService, VirtualServiceStatus};
pub use builder::{BuildMode, BuildOutput, Builder, Components, Resources};
pub use config::{BuilderConfig, CacheConfig, LoggingConfig};
pub use errors::{Error, ErrorKind, Result};
pub use store::{MemoryStore, Store, StoreRevision};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
