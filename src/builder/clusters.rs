//! Upstream cluster discovery.
//!
//! Cluster names are collected from typed messages where the crate knows the
//! shape (route actions, TCP proxy, the HCM itself) and from a JSON walk over
//! TypedStruct bodies for every other extension. Names are deduplicated in
//! first-seen order and every one of them must resolve in the store.

use crate::api::VirtualService;
use crate::builder::cache::{CacheKey, CacheStats, KeyHasher, LruCache};
use crate::builder::ClusterExtractor;
use crate::config::CacheConfig;
use crate::errors::{Error, Result, ResultExt};
use crate::store::Store;
use crate::xds::typed_config::{any_to_json, unpack};
use crate::xds::validate::validate_cluster;
use crate::xds::{HCM_TYPE_URL, TCP_PROXY_TYPE_URL};
use envoy_types::pb::envoy::config::accesslog::v3::{access_log, AccessLog};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::{filter, FilterChain};
use envoy_types::pb::envoy::config::route::v3::{route, route_action, VirtualHost};
use envoy_types::pb::envoy::config::trace::v3::tracing::http as tracing_http;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{RouteSpecifier, Tracing},
    http_filter, HttpConnectionManager, HttpFilter,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{tcp_proxy, TcpProxy};
use envoy_types::pb::google::protobuf::Any;
use indexmap::IndexSet;
use prost::Message;
use serde_json::Value;
use tracing::debug;

/// Keys naming a cluster inside HTTP filter configs (OAuth2, ext_authz, JWT providers, ...)
pub const HTTP_FILTER_CLUSTER_KEYS: &[&str] =
    &["cluster", "cluster_name", "token_cluster", "authorization_cluster"];
/// Keys naming a collector cluster inside tracing providers
pub const TRACING_CLUSTER_KEYS: &[&str] = &["cluster_name", "collector_cluster"];
/// Keys naming a sink cluster inside access loggers
pub const ACCESS_LOG_CLUSTER_KEYS: &[&str] = &["cluster_name", "cluster"];
/// Keys searched in network filters the crate does not model
pub const NETWORK_FILTER_CLUSTER_KEYS: &[&str] = &["cluster", "cluster_name", "collector_cluster"];

/// Ordered, duplicate-free set of cluster names
#[derive(Debug, Clone, Default)]
pub struct ClusterNames(IndexSet<String>);

impl ClusterNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a name; empty names are ignored.
    pub fn push(&mut self, name: &str) {
        if !name.is_empty() {
            self.0.insert(name.to_string());
        }
    }

    pub fn extend<'a>(&mut self, names: impl IntoIterator<Item = &'a String>) {
        for name in names {
            self.push(name);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0.into_iter().collect()
    }
}

/// Collect every non-empty string stored under one of `keys`, at any depth.
pub fn walk_json(value: &Value, keys: &[&str], out: &mut ClusterNames) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match child {
                    Value::String(name) if keys.contains(&key.as_str()) => out.push(name),
                    _ => walk_json(child, keys, out),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| walk_json(item, keys, out)),
        _ => {}
    }
}

/// Cluster names referenced by route actions of a virtual host.
pub fn route_clusters(virtual_host: &VirtualHost, out: &mut ClusterNames) {
    for r in &virtual_host.routes {
        let Some(route::Action::Route(action)) = &r.action else {
            continue;
        };
        match &action.cluster_specifier {
            Some(route_action::ClusterSpecifier::Cluster(name)) => out.push(name),
            Some(route_action::ClusterSpecifier::WeightedClusters(weighted)) => {
                weighted.clusters.iter().for_each(|c| out.push(&c.name))
            }
            _ => {}
        }
    }
}

fn walk_any(any: &Any, keys: &[&str], out: &mut ClusterNames) -> Result<()> {
    if let Some(body) = any_to_json(any)? {
        walk_json(&body, keys, out);
    }
    Ok(())
}

fn http_filter_clusters(filters: &[HttpFilter], out: &mut ClusterNames) -> Result<()> {
    for f in filters {
        if let Some(http_filter::ConfigType::TypedConfig(any)) = &f.config_type {
            walk_any(any, HTTP_FILTER_CLUSTER_KEYS, out)
                .with_context(|| format!("failed to inspect HTTP filter {}", f.name))?;
        }
    }
    Ok(())
}

fn access_log_clusters(logs: &[AccessLog], out: &mut ClusterNames) -> Result<()> {
    for log in logs {
        if let Some(access_log::ConfigType::TypedConfig(any)) = &log.config_type {
            walk_any(any, ACCESS_LOG_CLUSTER_KEYS, out)
                .with_context(|| format!("failed to inspect access log {}", log.name))?;
        }
    }
    Ok(())
}

fn tracing_clusters(tracing: &Tracing, out: &mut ClusterNames) -> Result<()> {
    if let Some(provider) = &tracing.provider {
        if let Some(tracing_http::ConfigType::TypedConfig(any)) = &provider.config_type {
            walk_any(any, TRACING_CLUSTER_KEYS, out)?;
        }
    }
    Ok(())
}

fn hcm_clusters(hcm: &HttpConnectionManager, out: &mut ClusterNames) -> Result<()> {
    http_filter_clusters(&hcm.http_filters, out)?;
    access_log_clusters(&hcm.access_log, out)?;
    if let Some(tracing) = &hcm.tracing {
        tracing_clusters(tracing, out)?;
    }
    if let Some(RouteSpecifier::RouteConfig(route_config)) = &hcm.route_specifier {
        route_config.virtual_hosts.iter().for_each(|vh| route_clusters(vh, out));
    }
    Ok(())
}

fn tcp_proxy_clusters(proxy: &TcpProxy, out: &mut ClusterNames) -> Result<()> {
    match &proxy.cluster_specifier {
        Some(tcp_proxy::ClusterSpecifier::Cluster(name)) => out.push(name),
        Some(tcp_proxy::ClusterSpecifier::WeightedClusters(weighted)) => {
            weighted.clusters.iter().for_each(|c| out.push(&c.name))
        }
        None => {}
    }
    access_log_clusters(&proxy.access_log, out)
}

/// Cluster names referenced by listener-declared filter chains.
pub fn filter_chain_clusters(chains: &[FilterChain], out: &mut ClusterNames) -> Result<()> {
    for chain in chains {
        for f in &chain.filters {
            let Some(filter::ConfigType::TypedConfig(any)) = &f.config_type else {
                continue;
            };
            let inspected = match any.type_url.as_str() {
                HCM_TYPE_URL => {
                    let hcm: HttpConnectionManager = unpack(any, HCM_TYPE_URL)?;
                    hcm_clusters(&hcm, out)
                }
                TCP_PROXY_TYPE_URL => {
                    let proxy: TcpProxy = unpack(any, TCP_PROXY_TYPE_URL)?;
                    tcp_proxy_clusters(&proxy, out)
                }
                _ => walk_any(any, NETWORK_FILTER_CLUSTER_KEYS, out),
            };
            inspected.with_context(|| format!("failed to inspect network filter {}", f.name))?;
        }
    }
    Ok(())
}

pub struct DefaultClusterExtractor {
    cache: LruCache<Vec<String>>,
}

impl DefaultClusterExtractor {
    pub fn new(config: &CacheConfig) -> Self {
        Self { cache: LruCache::from_config("clusters", config.clusters_capacity, config) }
    }

    /// Run a discovery routine, memoized on `key`.
    fn discover<F>(&self, key: CacheKey, out: &mut ClusterNames, routine: F) -> Result<()>
    where
        F: FnOnce(&mut ClusterNames) -> Result<()>,
    {
        if let Some(names) = self.cache.get(&key) {
            out.extend(&names);
            return Ok(());
        }
        let mut found = ClusterNames::new();
        routine(&mut found)?;
        let names = found.into_vec();
        self.cache.insert(key, &names);
        out.extend(&names);
        Ok(())
    }

    fn discover_http_filters(&self, filters: &[HttpFilter], out: &mut ClusterNames) -> Result<()> {
        let mut hasher = KeyHasher::new("http_filter_clusters");
        for f in filters {
            hasher.write_bytes(&f.encode_to_vec());
        }
        self.discover(hasher.finish(), out, |found| http_filter_clusters(filters, found))
    }

    fn discover_json(&self, scope: &str, body: &Value, keys: &[&str], out: &mut ClusterNames) -> Result<()> {
        let mut hasher = KeyHasher::new(scope);
        hasher.write_json(body);
        self.discover(hasher.finish(), out, |found| {
            walk_json(body, keys, found);
            Ok(())
        })
    }

    fn discover_tracing(&self, vs: &VirtualService, store: &dyn Store, out: &mut ClusterNames) -> Result<()> {
        if let Some(inline) = &vs.spec.tracing {
            self.discover_json("inline_tracing_clusters", inline, TRACING_CLUSTER_KEYS, out)?;
        }
        if let Some(reference) = &vs.spec.tracing_ref {
            let id = reference.resolve(vs.namespace());
            let tracing = store.get_tracing(&id).ok_or_else(|| Error::not_found("tracing", &id))?;
            self.discover_json("referenced_tracing_clusters", &tracing.spec, TRACING_CLUSTER_KEYS, out)?;
        }
        Ok(())
    }

    /// Look up every name, in order; a missing cluster fails the build.
    pub fn resolve(&self, names: &ClusterNames, store: &dyn Store) -> Result<Vec<Cluster>> {
        names
            .iter()
            .map(|name| {
                let cluster =
                    store.get_spec_cluster(name).ok_or_else(|| Error::not_found("cluster", name))?;
                validate_cluster(&cluster)?;
                debug!(cluster = %name, "Resolved cluster");
                Ok(cluster)
            })
            .collect()
    }
}

impl ClusterExtractor for DefaultClusterExtractor {
    fn clusters_for_virtual_service(
        &self,
        vs: &VirtualService,
        virtual_host: &VirtualHost,
        http_filters: &[HttpFilter],
        access_logs: &[AccessLog],
        store: &dyn Store,
    ) -> Result<Vec<Cluster>> {
        let mut names = ClusterNames::new();
        route_clusters(virtual_host, &mut names);
        self.discover_http_filters(http_filters, &mut names)?;
        self.discover_tracing(vs, store, &mut names)?;
        access_log_clusters(access_logs, &mut names)?;

        debug!(vs = %vs.metadata.namespaced_name(), clusters = names.len(), "Discovered clusters");
        self.resolve(&names, store)
    }

    fn clusters_for_filter_chains(&self, filter_chains: &[FilterChain], store: &dyn Store) -> Result<Vec<Cluster>> {
        let mut hasher = KeyHasher::new("filter_chain_clusters");
        for chain in filter_chains {
            hasher.write_bytes(&chain.encode_to_vec());
        }

        let mut names = ClusterNames::new();
        self.discover(hasher.finish(), &mut names, |found| filter_chain_clusters(filter_chains, found))?;
        self.resolve(&names, store)
    }

    fn cache_stats(&self) -> Vec<CacheStats> {
        vec![self.cache.stats()]
    }

    fn clear_caches(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Cluster as ClusterResource, ObjectMeta, ResourceRef, Tracing as TracingResource};
    use crate::errors::ErrorKind;
    use crate::store::MemoryStore;
    use crate::xds::hcm::{AccessLogSpec, HttpFilterSpec};
    use crate::xds::listener::ListenerSpec;
    use crate::xds::route::VirtualHostSpec;
    use serde_json::json;

    fn static_cluster(name: &str) -> ClusterResource {
        ClusterResource {
            metadata: ObjectMeta::new("default", name),
            spec: json!({
                "name": name,
                "type": "STATIC",
                "connect_timeout": "1s",
                "load_assignment": {
                    "cluster_name": name,
                    "endpoints": [{"lb_endpoints": [{"endpoint": {"address": {
                        "socket_address": {"address": "127.0.0.1", "port_value": 8080}
                    }}}]}]
                }
            }),
        }
    }

    fn store_with(names: &[&str]) -> MemoryStore {
        let mut store = MemoryStore::new();
        for name in names {
            store.upsert_cluster(static_cluster(name)).unwrap();
        }
        store
    }

    fn names(clusters: &[Cluster]) -> Vec<&str> {
        clusters.iter().map(|c| c.name.as_str()).collect()
    }

    fn extractor() -> DefaultClusterExtractor {
        DefaultClusterExtractor::new(&CacheConfig::default())
    }

    #[test]
    fn test_walk_json_harvests_nested_keys() {
        let mut out = ClusterNames::new();
        walk_json(
            &json!({
                "config": {"token_endpoint": {"cluster": "oauth-token"}},
                "providers": [{"remote_jwks": {"http_uri": {"cluster": "jwks"}}}],
                "cluster": "",
                "other": {"cluster": 7}
            }),
            HTTP_FILTER_CLUSTER_KEYS,
            &mut out,
        );
        assert_eq!(out.into_vec(), vec!["oauth-token", "jwks"]);
    }

    #[test]
    fn test_route_and_weighted_clusters_deduplicated() {
        let vh = VirtualHostSpec::from_json(&json!({
            "name": "vh",
            "domains": ["*"],
            "routes": [
                {"match": {"prefix": "/a"}, "route": {"cluster": "a"}},
                {"match": {"prefix": "/w"}, "route": {"weighted_clusters": {"clusters": [
                    {"name": "b", "weight": 1}, {"name": "a", "weight": 1}
                ]}}},
                {"match": {"prefix": "/r"}, "redirect": {"host_redirect": "x.io"}},
                {"match": {"prefix": "/"}, "direct_response": {"status": 200}}
            ]
        }))
        .unwrap()
        .to_envoy()
        .unwrap();

        let mut out = ClusterNames::new();
        route_clusters(&vh, &mut out);
        assert_eq!(out.into_vec(), vec!["a", "b"]);
    }

    #[test]
    fn test_virtual_service_sources_in_order() {
        let store = {
            let mut store = store_with(&["route", "oauth-token", "otel", "zipkin", "als"]);
            store.upsert_tracing(TracingResource {
                metadata: ObjectMeta::new("default", "zipkin"),
                spec: json!({"provider": {"name": "envoy.tracers.zipkin", "typed_config": {
                    "@type": "type.googleapis.com/envoy.config.trace.v3.ZipkinConfig",
                    "collector_cluster": "zipkin"
                }}}),
            });
            store
        };

        let vh = VirtualHostSpec::from_json(&json!({
            "name": "vh", "domains": ["*"],
            "routes": [{"match": {"prefix": "/"}, "route": {"cluster": "route"}}]
        }))
        .unwrap()
        .to_envoy()
        .unwrap();
        let filters = vec![HttpFilterSpec::from_json(&json!({
            "name": "envoy.filters.http.oauth2",
            "typed_config": {
                "@type": "type.googleapis.com/envoy.extensions.filters.http.oauth2.v3.OAuth2",
                "config": {"token_endpoint": {"cluster": "oauth-token", "uri": "x"}}
            }
        }))
        .unwrap()
        .to_envoy()
        .unwrap()];
        let logs = vec![AccessLogSpec::from_json(&json!({
            "name": "envoy.access_loggers.http_grpc",
            "typed_config": {
                "@type": "type.googleapis.com/envoy.extensions.access_loggers.grpc.v3.HttpGrpcAccessLogConfig",
                "common_config": {"grpc_service": {"envoy_grpc": {"cluster_name": "als"}}}
            }
        }))
        .unwrap()
        .to_envoy()
        .unwrap()];

        let mut vs = VirtualService::new("default", "vs");
        vs.spec.tracing = Some(json!({"provider": {"name": "envoy.tracers.opentelemetry", "typed_config": {
            "@type": "type.googleapis.com/envoy.config.trace.v3.OpenTelemetryConfig",
            "grpc_service": {"envoy_grpc": {"cluster_name": "otel"}}
        }}}));
        vs.spec.tracing_ref = Some(ResourceRef::new("zipkin"));

        let clusters = extractor().clusters_for_virtual_service(&vs, &vh, &filters, &logs, &store).unwrap();
        assert_eq!(names(&clusters), vec!["route", "oauth-token", "otel", "zipkin", "als"]);
    }

    #[test]
    fn test_missing_cluster() {
        let vh = VirtualHostSpec::from_json(&json!({
            "name": "vh", "domains": ["*"],
            "routes": [{"match": {"prefix": "/"}, "route": {"cluster": "absent"}}]
        }))
        .unwrap()
        .to_envoy()
        .unwrap();
        let err = extractor()
            .clusters_for_virtual_service(&VirtualService::new("default", "vs"), &vh, &[], &[], &MemoryStore::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "cluster absent not found");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_filter_chains_kafka_and_tcp_proxy() {
        let listener = ListenerSpec::from_json(&json!({
            "address": {"socket_address": {"address": "0.0.0.0", "port_value": 9092}},
            "filter_chains": [{"filters": [
                {"name": "envoy.filters.network.kafka_broker", "typed_config": {
                    "@type": "type.googleapis.com/envoy.extensions.filters.network.kafka_broker.v3.KafkaBroker",
                    "stat_prefix": "kafka"
                }},
                {"name": "envoy.filters.network.tcp_proxy", "typed_config": {
                    "@type": "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy",
                    "stat_prefix": "tcp",
                    "cluster": "kafka-cluster"
                }}
            ]}]
        }))
        .unwrap()
        .to_envoy("default/kafka")
        .unwrap();

        let store = store_with(&["kafka-cluster"]);
        let extractor = extractor();
        let clusters = extractor.clusters_for_filter_chains(&listener.filter_chains, &store).unwrap();
        assert_eq!(names(&clusters), vec!["kafka-cluster"]);

        extractor.clusters_for_filter_chains(&listener.filter_chains, &store).unwrap();
        assert_eq!(extractor.cache_stats()[0].hits, 1);
    }

    #[test]
    fn test_filter_chains_hcm_descent() {
        let listener = ListenerSpec::from_json(&json!({
            "address": {"socket_address": {"address": "0.0.0.0", "port_value": 80}},
            "filter_chains": [{"filters": [{"name": "envoy.filters.network.http_connection_manager", "typed_config": {
                "@type": HCM_TYPE_URL,
                "stat_prefix": "http",
                "route_config": {"name": "inline", "virtual_hosts": [{
                    "name": "vh", "domains": ["*"],
                    "routes": [{"match": {"prefix": "/"}, "route": {"cluster": "inline-route"}}]
                }]},
                "http_filters": [
                    {"name": "envoy.filters.http.ext_authz", "typed_config": {
                        "@type": "type.googleapis.com/envoy.extensions.filters.http.ext_authz.v3.ExtAuthz",
                        "grpc_service": {"envoy_grpc": {"cluster_name": "authz"}}
                    }},
                    {"name": "envoy.filters.http.router", "typed_config": {
                        "@type": "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router"
                    }}
                ]
            }}]}]
        }))
        .unwrap()
        .to_envoy("default/http")
        .unwrap();

        let mut out = ClusterNames::new();
        filter_chain_clusters(&listener.filter_chains, &mut out).unwrap();
        assert_eq!(out.into_vec(), vec!["authz", "inline-route"]);
    }

    #[test]
    fn test_referenced_tracing_must_exist() {
        let mut vs = VirtualService::new("default", "vs");
        vs.spec.tracing_ref = Some(ResourceRef::new("absent"));
        let err = extractor()
            .clusters_for_virtual_service(&vs, &VirtualHost::default(), &[], &[], &MemoryStore::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "tracing default/absent not found");
    }
}
