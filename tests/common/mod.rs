//! Common test utilities for all integration tests.
//!
//! Provides store fixtures (listeners, clusters, TLS secrets backed by real
//! self-signed certificates) and VirtualService builders.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use exc_resbuilder::api::{
    Cluster, KubeSecret, Listener, ObjectMeta, ResourceRef, TlsConfig, DOMAINS_ANNOTATION,
};
use exc_resbuilder::xds::{ROUTER_TYPE_URL, TLS_INSPECTOR_TYPE_URL};
use exc_resbuilder::{MemoryStore, VirtualService};
use serde_json::{json, Value};

/// PEM certificate and key for a self-signed certificate valid for `domains`.
pub fn self_signed(domains: &[&str]) -> (String, String) {
    let names: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
    let certified = rcgen::generate_simple_self_signed(names).expect("generate certificate");
    (certified.cert.pem(), certified.key_pair.serialize_pem())
}

/// PEM certificate and key valid from 2000 until January 1st of `year`.
pub fn valid_until(domains: &[&str], year: i32) -> (String, String) {
    let names: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
    let mut params = rcgen::CertificateParams::new(names).expect("certificate params");
    params.not_before = rcgen::date_time_ymd(2000, 1, 1);
    params.not_after = rcgen::date_time_ymd(year, 1, 1);
    let key_pair = rcgen::KeyPair::generate().expect("key pair");
    let cert = params.self_signed(&key_pair).expect("self-signed certificate");
    (cert.pem(), key_pair.serialize_pem())
}

/// PEM certificate and key for a certificate that expired in 2001.
pub fn expired(domains: &[&str]) -> (String, String) {
    valid_until(domains, 2001)
}

/// A `kubernetes.io/tls` secret announcing `domains` for auto-discovery.
pub fn tls_secret(namespace: &str, name: &str, domains: &[&str]) -> KubeSecret {
    announced_secret(namespace, name, domains, self_signed(domains))
}

/// Like [`tls_secret`] with a certificate that expires on January 1st of `year`.
pub fn expiring_secret(namespace: &str, name: &str, domains: &[&str], year: i32) -> KubeSecret {
    announced_secret(namespace, name, domains, valid_until(domains, year))
}

fn announced_secret(namespace: &str, name: &str, domains: &[&str], pem: (String, String)) -> KubeSecret {
    let (cert, key) = pem;
    let mut secret = KubeSecret::tls(namespace, name, cert, key);
    secret
        .metadata
        .annotations
        .insert(DOMAINS_ANNOTATION.to_string(), domains.join(","));
    secret
}

pub fn listener(name: &str, port: u32, tls: bool) -> Listener {
    let mut spec = json!({"address": {"socket_address": {"address": "0.0.0.0", "port_value": port}}});
    if tls {
        spec["listener_filters"] = json!([{
            "name": "envoy.filters.listener.tls_inspector",
            "typed_config": {"@type": TLS_INSPECTOR_TYPE_URL}
        }]);
    }
    Listener { metadata: ObjectMeta::new("default", name), spec }
}

/// Listener declaring a Kafka broker filter in front of a TCP proxy.
pub fn kafka_listener(name: &str, cluster: &str) -> Listener {
    Listener {
        metadata: ObjectMeta::new("default", name),
        spec: json!({
            "address": {"socket_address": {"address": "0.0.0.0", "port_value": 9092}},
            "filter_chains": [{"filters": [
                {"name": "envoy.filters.network.kafka_broker", "typed_config": {
                    "@type": "type.googleapis.com/envoy.extensions.filters.network.kafka_broker.v3.KafkaBroker",
                    "stat_prefix": "kafka"
                }},
                {"name": "envoy.filters.network.tcp_proxy", "typed_config": {
                    "@type": "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy",
                    "stat_prefix": "tcp",
                    "cluster": cluster
                }}
            ]}]
        }),
    }
}

/// Static cluster pointing at 127.0.0.1:8080.
pub fn static_cluster(name: &str) -> Cluster {
    static_cluster_on(name, 8080)
}

pub fn static_cluster_on(name: &str, port: u32) -> Cluster {
    Cluster {
        metadata: ObjectMeta::new("default", name),
        spec: json!({
            "name": name,
            "type": "STATIC",
            "connect_timeout": "1s",
            "load_assignment": {
                "cluster_name": name,
                "endpoints": [{"lb_endpoints": [{"endpoint": {"address": {
                    "socket_address": {"address": "127.0.0.1", "port_value": port}
                }}}]}]
            }
        }),
    }
}

pub fn router() -> Value {
    json!({"name": "envoy.filters.http.router", "typed_config": {"@type": ROUTER_TYPE_URL}})
}

pub fn oauth2(token_cluster: &str) -> Value {
    json!({
        "name": "envoy.filters.http.oauth2",
        "typed_config": {
            "@type": "type.googleapis.com/envoy.extensions.filters.http.oauth2.v3.OAuth2",
            "config": {
                "token_endpoint": {"cluster": token_cluster, "uri": "https://auth.kaasops.io/token", "timeout": "3s"},
                "authorization_endpoint": "https://auth.kaasops.io/authorize"
            }
        }
    })
}

pub fn route(prefix: &str, cluster: &str) -> Value {
    json!({"match": {"prefix": prefix}, "route": {"cluster": cluster}})
}

/// VirtualService on `listener` serving `domains`, routing `/` to `cluster`.
pub fn virtual_service(name: &str, listener: &str, domains: &[&str], cluster: &str) -> VirtualService {
    let mut vs = VirtualService::new("default", name);
    vs.spec.listener = Some(ResourceRef::new(listener));
    vs.spec.virtual_host = Some(json!({"domains": domains, "routes": [route("/", cluster)]}));
    vs.spec.http_filters = vec![router()];
    vs
}

pub fn auto_discovery() -> TlsConfig {
    TlsConfig { secret_ref: None, auto_discovery: Some(true) }
}

pub fn secret_ref(name: &str) -> TlsConfig {
    TlsConfig { secret_ref: Some(ResourceRef::new(name)), auto_discovery: None }
}

/// Store for the basic HTTPS scenario: TLS listener on 443, `test-cluster`
/// and a secret for `exc.kaasops.io`.
pub fn https_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store.upsert_listener(listener("test-listener", 443, true));
    store.upsert_listener(listener("plain-listener", 8080, false));
    store.upsert_cluster(static_cluster("test-cluster")).expect("valid cluster");
    store.upsert_secret(tls_secret("default", "exc-kaasops-io", &["exc.kaasops.io"]));
    store
}
