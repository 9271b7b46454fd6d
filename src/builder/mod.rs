//! # Resource Builder
//!
//! Turns one VirtualService plus a read-only [`Store`] into the Envoy
//! resources that serve it. The orchestrator in [`main_builder`] runs a fixed
//! sequence of phases; each phase is a capability trait so that alternative
//! implementations can be registered when the [`Builder`] is constructed.

pub mod access_log;
pub mod cache;
pub mod clusters;
pub mod filter_chains;
pub mod http_filters;
pub mod main_builder;
pub mod rbac;
pub mod routing;
pub mod template;
pub mod tls;

pub use cache::{CacheKey, CacheStats, KeyHasher, LruCache};
pub use main_builder::{BuildMode, BuildOutput, Builder, Components};

use crate::api::{NamespacedName, VirtualService};
use crate::errors::Result;
use crate::store::Store;
use crate::xds::canonical::pack_canonical;
use crate::xds::typed_config::pack;
use crate::xds::{CLUSTER_TYPE_URL, ROUTE_TYPE_URL, SECRET_TYPE_URL};
use chrono::{DateTime, Utc};
use envoy_types::pb::envoy::config::accesslog::v3::AccessLog;
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::{FilterChain, Listener};
use envoy_types::pb::envoy::config::route::v3::{RouteConfiguration, VirtualHost};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{Tracing, UpgradeConfig},
    HttpFilter,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::Secret;
use envoy_types::pb::google::protobuf::Any;
use std::collections::BTreeMap;

/// Secret identity to the domains it serves, iterated in identity order
pub type SecretDomains = BTreeMap<NamespacedName, Vec<String>>;

/// Everything one build produces for a VirtualService.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resources {
    pub listener: NamespacedName,
    pub filter_chains: Vec<FilterChain>,
    pub route_config: Option<RouteConfiguration>,
    /// Deduplicated by name, in order of first reference
    pub clusters: Vec<Cluster>,
    pub secrets: Vec<Secret>,
    pub used_secrets: Vec<NamespacedName>,
    pub domains: Vec<String>,
    pub node_ids: Vec<String>,
    pub access_group: String,
}

impl Resources {
    /// The route configuration, clusters and secrets packed for an xDS
    /// response, in that order. Map fields are written in key order so equal
    /// resources always encode to equal bytes.
    pub fn packed(&self) -> Vec<Any> {
        let mut packed = Vec::with_capacity(1 + self.clusters.len() + self.secrets.len());
        packed.extend(self.route_config.iter().map(|rc| pack_canonical(ROUTE_TYPE_URL, rc)));
        packed.extend(self.clusters.iter().map(|c| pack_canonical(CLUSTER_TYPE_URL, c)));
        packed.extend(self.secrets.iter().map(|s| pack(SECRET_TYPE_URL, s)));
        packed
    }
}

/// Inputs shared by every filter chain of one VirtualService
#[derive(Debug, Clone, Default)]
pub struct FilterChainParams {
    /// `<ns>/<vs-name>`, used for the chain and the route configuration
    pub name: String,
    pub stat_prefix: String,
    pub route_config_name: String,
    pub use_remote_address: bool,
    pub xff_num_trusted_hops: Option<u32>,
    pub http_filters: Vec<HttpFilter>,
    pub upgrade_configs: Vec<UpgradeConfig>,
    pub access_logs: Vec<AccessLog>,
    pub tracing: Option<Tracing>,
    pub is_tls: bool,
    /// Empty when the listener is not TLS
    pub secret_domains: SecretDomains,
}

/// Built access logs plus any deprecation advisories
#[derive(Debug, Clone, Default)]
pub struct AccessLogs {
    pub logs: Vec<AccessLog>,
    pub advisories: Vec<String>,
}

pub trait HttpFilterBuilder: Send + Sync {
    /// Ordered HTTP filters: RBAC, inline, referenced, then the router.
    fn build_http_filters(&self, vs: &VirtualService, store: &dyn Store) -> Result<Vec<HttpFilter>>;

    fn cache_stats(&self) -> Vec<CacheStats> {
        Vec::new()
    }

    fn clear_caches(&self) {}
}

pub trait RoutingBuilder: Send + Sync {
    fn build_virtual_host(&self, vs: &VirtualService, store: &dyn Store) -> Result<VirtualHost>;

    fn build_route_configuration(
        &self,
        vs: &VirtualService,
        listener: &Listener,
        store: &dyn Store,
    ) -> Result<(VirtualHost, RouteConfiguration)>;
}

pub trait TlsBuilder: Send + Sync {
    /// Pick the secrets serving `domains` at `now` according to the VirtualService TLS config.
    fn resolve_secrets(
        &self,
        vs: &VirtualService,
        domains: &[String],
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> Result<SecretDomains>;

    fn build_secret(&self, id: &NamespacedName, store: &dyn Store) -> Result<Secret>;
}

pub trait ClusterExtractor: Send + Sync {
    /// Clusters referenced by a virtual-service-mode build.
    fn clusters_for_virtual_service(
        &self,
        vs: &VirtualService,
        virtual_host: &VirtualHost,
        http_filters: &[HttpFilter],
        access_logs: &[AccessLog],
        store: &dyn Store,
    ) -> Result<Vec<Cluster>>;

    /// Clusters referenced by filter chains declared on the listener.
    fn clusters_for_filter_chains(
        &self,
        filter_chains: &[FilterChain],
        store: &dyn Store,
    ) -> Result<Vec<Cluster>>;

    fn cache_stats(&self) -> Vec<CacheStats> {
        Vec::new()
    }

    fn clear_caches(&self) {}
}

pub trait FilterChainBuilder: Send + Sync {
    /// Reject VirtualService fields that cannot apply to listener-declared chains.
    fn check_filter_chain_conflicts(&self, vs: &VirtualService) -> Result<()>;

    fn build_filter_chain_params(
        &self,
        vs: &VirtualService,
        http_filters: Vec<HttpFilter>,
        access_logs: Vec<AccessLog>,
        is_tls: bool,
        secret_domains: SecretDomains,
        store: &dyn Store,
    ) -> Result<FilterChainParams>;

    fn build_filter_chains(&self, params: &FilterChainParams) -> Result<Vec<FilterChain>>;
}

pub trait AccessLogBuilder: Send + Sync {
    fn build_access_logs(&self, vs: &VirtualService, store: &dyn Store) -> Result<AccessLogs>;
}

/// `<ns>-<name>` with dots replaced, as used for HCM stat prefixes.
pub fn stat_prefix(id: &NamespacedName) -> String {
    id.to_string().replace(['.', '/'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_resources_in_order() {
        let resources = Resources {
            route_config: Some(RouteConfiguration { name: "default/vs".into(), ..Default::default() }),
            clusters: vec![Cluster { name: "c1".into(), ..Default::default() }],
            secrets: vec![Secret { name: "default/s".into(), ..Default::default() }],
            ..Default::default()
        };
        let types: Vec<_> = resources.packed().into_iter().map(|any| any.type_url).collect();
        assert_eq!(types, vec![ROUTE_TYPE_URL, CLUSTER_TYPE_URL, SECRET_TYPE_URL]);
        assert!(Resources::default().packed().is_empty());
    }

    #[test]
    fn test_stat_prefix() {
        assert_eq!(stat_prefix(&NamespacedName::new("default", "exc.kaasops.io")), "default-exc-kaasops-io");
    }
}
