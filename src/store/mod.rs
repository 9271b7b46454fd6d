//! # Resource Store
//!
//! Read interface the builder resolves references against. The Kubernetes
//! layer owns mutation; during a build the store is only read, and every
//! accessor hands back an owned copy so nothing a build does can alias
//! stored state.

pub mod domain_index;
pub mod memory;

pub use crate::api::NamespacedName;
pub use domain_index::{validate_domain_pattern, CertValidity, DomainSecretIndex};
pub use memory::MemoryStore;

use crate::api::{
    AccessLogConfig, HttpFilter, KubeSecret, Listener, Policy, Route, Tracing,
    VirtualServiceTemplate,
};
use chrono::{DateTime, Utc};
use envoy_types::pb::envoy::config::cluster::v3::Cluster as EnvoyCluster;
use std::collections::BTreeMap;

/// Identity of a store's contents.
///
/// `instance` differs between store objects (a clone is a new instance) and
/// `mutations` grows on every change, so equal revisions mean equal contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreRevision {
    pub instance: u64,
    pub mutations: u64,
}

/// Typed lookup of builder inputs by namespaced name.
pub trait Store: Send + Sync {
    fn get_virtual_service_template(&self, id: &NamespacedName) -> Option<VirtualServiceTemplate>;

    fn get_listener(&self, id: &NamespacedName) -> Option<Listener>;

    /// Validated Envoy cluster known to Envoy as `name`.
    fn get_spec_cluster(&self, name: &str) -> Option<EnvoyCluster>;

    fn get_http_filter(&self, id: &NamespacedName) -> Option<HttpFilter>;

    fn get_policy(&self, id: &NamespacedName) -> Option<Policy>;

    fn get_access_log(&self, id: &NamespacedName) -> Option<AccessLogConfig>;

    fn get_tracing(&self, id: &NamespacedName) -> Option<Tracing>;

    fn get_route(&self, id: &NamespacedName) -> Option<Route>;

    fn get_secret(&self, id: &NamespacedName) -> Option<KubeSecret>;

    /// Each announced domain with the secret chosen for it at `now`.
    fn map_domain_secrets(&self, now: DateTime<Utc>) -> BTreeMap<String, KubeSecret>;

    /// Secret serving `domain` at `now`, preferring one in `preferred_namespace`.
    fn best_secret_for_domain(
        &self,
        domain: &str,
        preferred_namespace: &str,
        now: DateTime<Utc>,
    ) -> Option<KubeSecret>;

    /// Cached build output is keyed on it.
    fn revision(&self) -> StoreRevision;

    /// Indexed certificates already expired at `now`; secret ranking can only
    /// change between two instants when this count does.
    fn expired_certificates(&self, now: DateTime<Utc>) -> usize;
}
