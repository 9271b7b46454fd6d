//! End-to-end builds against an in-memory store.
//!
//! Covers the basic HTTPS and plain HTTP pipelines, listener-declared filter
//! chains, RBAC policy collisions, secret auto-discovery fallback and
//! clusters referenced only from HTTP filters.

mod common;

use common::*;
use exc_resbuilder::api::{
    AccessLogConfig, NamespacedName, ObjectMeta, Policy, Rbac, ResourceRef, TemplateOption,
    VirtualServiceTemplate, ACCESS_GROUP_LABEL, AUTO_GENERATED_FILENAME_ANNOTATION,
    NODE_ID_ANNOTATION,
};
use exc_resbuilder::builder::access_log::ACCESS_LOG_DEPRECATED;
use exc_resbuilder::builder::main_builder::status_for_error;
use exc_resbuilder::builder::routing::FALLBACK_VIRTUAL_HOST_NAME;
use exc_resbuilder::xds::typed_config::unpack;
use exc_resbuilder::xds::{DOWNSTREAM_TLS_CONTEXT_TYPE_URL, FILE_ACCESS_LOG_TYPE_URL, HCM_TYPE_URL};
use exc_resbuilder::{BuildMode, Builder, BuilderConfig, ErrorKind, MemoryStore, Store};
use envoy_types::pb::envoy::config::core::v3::transport_socket;
use envoy_types::pb::envoy::config::listener::v3::{filter, FilterChain};
use envoy_types::pb::envoy::config::route::v3::route;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, HttpConnectionManager,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::DownstreamTlsContext;
use chrono::{Datelike, TimeZone, Utc};
use serde_json::json;

fn builder() -> Builder {
    Builder::new(&BuilderConfig::default())
}

fn hcm(chain: &FilterChain) -> HttpConnectionManager {
    let Some(filter::ConfigType::TypedConfig(any)) = &chain.filters[0].config_type else {
        panic!("filter chain without typed config");
    };
    unpack(any, HCM_TYPE_URL).expect("HCM")
}

fn sds_secret_name(chain: &FilterChain) -> String {
    let socket = chain.transport_socket.as_ref().expect("transport socket");
    let Some(transport_socket::ConfigType::TypedConfig(any)) = &socket.config_type else {
        panic!("transport socket without typed config");
    };
    let context: DownstreamTlsContext = unpack(any, DOWNSTREAM_TLS_CONTEXT_TYPE_URL).expect("TLS context");
    context.common_tls_context.expect("common context").tls_certificate_sds_secret_configs[0]
        .name
        .clone()
}

fn cluster_names(output: &exc_resbuilder::BuildOutput) -> Vec<&str> {
    output.resources.clusters.iter().map(|c| c.name.as_str()).collect()
}

#[test]
fn test_basic_https() {
    let store = https_store();
    let mut vs = virtual_service("test-vs", "test-listener", &["exc.kaasops.io"], "test-cluster");
    vs.spec.tls_config = Some(auto_discovery());

    let output = builder().build(&vs, &store).expect("build");
    let resources = &output.resources;
    assert_eq!(output.mode, BuildMode::VirtualService);
    assert_eq!(resources.listener, NamespacedName::new("default", "test-listener"));

    assert_eq!(resources.filter_chains.len(), 1);
    let chain = &resources.filter_chains[0];
    assert_eq!(chain.name, "default/test-vs");
    assert_eq!(chain.filter_chain_match.as_ref().unwrap().server_names, vec!["exc.kaasops.io"]);
    assert_eq!(sds_secret_name(chain), "default/exc-kaasops-io");

    let Some(RouteSpecifier::Rds(rds)) = hcm(chain).route_specifier else {
        panic!("expected RDS");
    };
    assert_eq!(rds.route_config_name, "default/test-vs");

    let route_config = resources.route_config.as_ref().unwrap();
    assert_eq!(route_config.virtual_hosts.len(), 2);
    assert_eq!(route_config.virtual_hosts[0].name, "default/test-vs");
    assert_eq!(route_config.virtual_hosts[1].name, FALLBACK_VIRTUAL_HOST_NAME);

    assert_eq!(cluster_names(&output), vec!["test-cluster"]);
    assert_eq!(resources.secrets.len(), 1);
    assert_eq!(resources.secrets[0].name, "default/exc-kaasops-io");
    assert_eq!(resources.used_secrets, vec![NamespacedName::new("default", "exc-kaasops-io")]);
    assert_eq!(resources.domains, vec!["exc.kaasops.io"]);
}

#[test]
fn test_no_fallback_host_off_port_443() {
    let mut store = https_store();
    store.upsert_listener(listener("alt-https", 10443, true));
    let mut vs = virtual_service("test-vs", "alt-https", &["exc.kaasops.io"], "test-cluster");
    vs.spec.tls_config = Some(secret_ref("exc-kaasops-io"));

    let output = builder().build(&vs, &store).expect("build");
    let route_config = output.resources.route_config.unwrap();
    assert_eq!(route_config.virtual_hosts.len(), 1);
    assert!(output.resources.filter_chains[0].transport_socket.is_some());
}

#[test]
fn test_plain_http() {
    let store = https_store();
    let vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "test-cluster");

    let output = builder().build(&vs, &store).expect("build");
    let chain = &output.resources.filter_chains[0];
    assert_eq!(output.resources.filter_chains.len(), 1);
    assert!(chain.transport_socket.is_none());
    assert!(chain.filter_chain_match.is_none());
    assert_eq!(output.resources.route_config.as_ref().unwrap().virtual_hosts.len(), 1);
    assert!(output.resources.secrets.is_empty());
    assert!(output.resources.used_secrets.is_empty());
}

#[test]
fn test_tls_shape_must_match_listener() {
    let store = https_store();

    let vs = virtual_service("test-vs", "test-listener", &["exc.kaasops.io"], "test-cluster");
    let err = builder().build(&vs, &store).unwrap_err();
    assert!(err.root_cause().to_string().starts_with("conflict: tls listener not configured"));

    let mut vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "test-cluster");
    vs.spec.tls_config = Some(auto_discovery());
    let err = builder().build(&vs, &store).unwrap_err();
    assert!(err.root_cause().to_string().starts_with("conflict: listener is not tls"));
}

#[test]
fn test_listener_declared_filter_chains() {
    let mut store = MemoryStore::new();
    store.upsert_listener(kafka_listener("kafka", "kafka-cluster"));
    store.upsert_cluster(static_cluster("kafka-cluster")).unwrap();

    let mut vs = exc_resbuilder::VirtualService::new("default", "kafka-vs");
    vs.spec.listener = Some(ResourceRef::new("kafka"));

    let output = builder().build(&vs, &store).expect("build");
    assert_eq!(output.mode, BuildMode::FilterChains);
    assert_eq!(output.resources.filter_chains.len(), 1);
    assert_eq!(output.resources.filter_chains[0].filters.len(), 2);
    assert_eq!(cluster_names(&output), vec!["kafka-cluster"]);
    assert!(output.resources.route_config.is_none());
    assert!(output.resources.secrets.is_empty());
    assert!(output.resources.domains.is_empty());
}

#[test]
fn test_listener_declared_filter_chains_reject_virtual_service_fields() {
    let mut store = MemoryStore::new();
    store.upsert_listener(kafka_listener("kafka", "kafka-cluster"));
    store.upsert_cluster(static_cluster("kafka-cluster")).unwrap();

    let mut vs = virtual_service("kafka-vs", "kafka", &["*"], "kafka-cluster");
    vs.spec.http_filters.clear();
    let err = builder().build(&vs, &store).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(
        err.root_cause().to_string(),
        "conflict: virtualHost is set, but filter chains are found in listener"
    );

    vs.spec.virtual_host = None;
    vs.spec.use_remote_address = Some(true);
    let err = builder().build(&vs, &store).unwrap_err();
    assert_eq!(
        err.root_cause().to_string(),
        "conflict: useRemoteAddress is set, but filter chains are found in listener"
    );
}

#[test]
fn test_rbac_referenced_policy_name_collision() {
    let mut store = https_store();
    let allow_all = json!({"permissions": [{"any": true}], "principals": [{"any": true}]});
    store.upsert_policy(Policy { metadata: ObjectMeta::new("default", "demo-policy"), spec: allow_all.clone() });

    let mut vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "test-cluster");
    vs.spec.rbac = Some(Rbac {
        action: "ALLOW".into(),
        policies: [("demo-policy".to_string(), allow_all)].into_iter().collect(),
        additional_policies: vec![ResourceRef::new("demo-policy")],
    });

    let err = builder().build(&vs, &store).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.to_string().contains("failed to build HTTP filters"));
    assert_eq!(err.root_cause().to_string(), "conflict: policy 'demo-policy' already exist in RBAC");
}

#[test]
fn test_auto_discovery_falls_back_after_delete() {
    let mut store = https_store();
    store.upsert_listener(listener("https", 443, true));
    store.upsert_secret(tls_secret("ns1", "shared", &["shared.kaasops.io"]));
    store.upsert_secret(tls_secret("ns2", "shared", &["shared.kaasops.io"]));

    let mut vs = virtual_service("shared-vs", "https", &["shared.kaasops.io"], "test-cluster");
    vs.spec.tls_config = Some(auto_discovery());

    let builder = builder();
    let first = builder.build(&vs, &store).expect("first build");
    assert_eq!(first.resources.used_secrets, vec![NamespacedName::new("ns1", "shared")]);

    assert!(store.delete_secret(&NamespacedName::new("ns1", "shared")));
    let second = builder.build(&vs, &store).expect("build after delete");
    assert_eq!(second.resources.used_secrets, vec![NamespacedName::new("ns2", "shared")]);
    assert_eq!(sds_secret_name(&second.resources.filter_chains[0]), "ns2/shared");

    assert!(store.delete_secret(&NamespacedName::new("ns2", "shared")));
    let err = builder.build(&vs, &store).unwrap_err();
    assert_eq!(err.root_cause().to_string(), "can't find secret for domain shared.kaasops.io");
}

#[test]
fn test_auto_discovery_prefers_valid_certificates() {
    let mut store = https_store();
    let (cert, key) = expired(&["api.kaasops.io"]);
    let mut stale = exc_resbuilder::api::KubeSecret::tls("default", "stale", cert, key);
    stale
        .metadata
        .annotations
        .insert(exc_resbuilder::api::DOMAINS_ANNOTATION.to_string(), "api.kaasops.io".to_string());
    store.upsert_secret(stale);
    store.upsert_secret(tls_secret("other", "fresh", &["api.kaasops.io"]));

    let mut vs = virtual_service("api", "test-listener", &["api.kaasops.io"], "test-cluster");
    vs.spec.tls_config = Some(auto_discovery());

    let output = builder().build(&vs, &store).expect("build");
    assert_eq!(output.resources.used_secrets, vec![NamespacedName::new("other", "fresh")]);
}

#[test]
fn test_wildcard_secret_groups_domains_into_one_chain() {
    let mut store = https_store();
    store.upsert_secret(tls_secret("default", "wildcard", &["*.apps.kaasops.io"]));

    let mut vs = virtual_service(
        "apps",
        "test-listener",
        &["a.apps.kaasops.io", "b.apps.kaasops.io", "exc.kaasops.io"],
        "test-cluster",
    );
    vs.spec.tls_config = Some(auto_discovery());

    let output = builder().build(&vs, &store).expect("build");
    let chains = &output.resources.filter_chains;
    assert_eq!(chains.len(), 2);
    assert_eq!(sds_secret_name(&chains[0]), "default/exc-kaasops-io");
    assert_eq!(sds_secret_name(&chains[1]), "default/wildcard");
    assert_eq!(
        chains[1].filter_chain_match.as_ref().unwrap().server_names,
        vec!["a.apps.kaasops.io", "b.apps.kaasops.io"]
    );
    assert_eq!(output.resources.secrets.len(), 2);
}

#[test]
fn test_oauth2_cluster_is_collected() {
    let mut store = https_store();
    store.upsert_cluster(static_cluster("oauth-token")).unwrap();

    let mut vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "test-cluster");
    vs.spec.http_filters = vec![oauth2("oauth-token"), router()];

    let output = builder().build(&vs, &store).expect("build");
    assert_eq!(cluster_names(&output), vec!["test-cluster", "oauth-token"]);

    store.delete_cluster("oauth-token");
    let err = builder().build(&vs, &store).unwrap_err();
    assert_eq!(err.root_cause().to_string(), "cluster oauth-token not found");
}

#[test]
fn test_missing_route_cluster() {
    let store = https_store();
    let vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "absent");
    let err = builder().build(&vs, &store).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(status_for_error(&err).message, "cluster absent not found");
    assert!(status_for_error(&err).invalid);
}

#[test]
fn test_router_is_required() {
    let store = https_store();
    let mut vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "test-cluster");
    vs.spec.http_filters.clear();
    let err = builder().build(&vs, &store).unwrap_err();
    assert_eq!(err.root_cause().to_string(), "no router HTTP filter found");
}

#[test]
fn test_template_supplies_filters_and_root_route() {
    let mut store = https_store();
    store.upsert_cluster(static_cluster("api")).unwrap();
    let mut template = VirtualServiceTemplate {
        metadata: ObjectMeta::new("default", "base"),
        ..Default::default()
    };
    template.spec.listener = Some(ResourceRef::new("plain-listener"));
    template.spec.http_filters = vec![router()];
    template.spec.virtual_host = Some(json!({"domains": ["exc.kaasops.io"], "routes": [route("/", "test-cluster")]}));
    store.upsert_template(template);

    let mut vs = exc_resbuilder::VirtualService::new("default", "from-template");
    vs.spec.template = Some(ResourceRef::new("base"));
    vs.spec.virtual_host = Some(json!({"routes": [route("/api", "api")]}));
    let before = vs.clone();

    let output = builder().build(&vs, &store).expect("build");
    assert_eq!(vs, before);

    let vh = &output.resources.route_config.as_ref().unwrap().virtual_hosts[0];
    assert_eq!(vh.domains, vec!["exc.kaasops.io"]);
    assert_eq!(vh.routes.len(), 2);
    let Some(route::Action::Route(last)) = &vh.routes[1].action else {
        panic!("expected route action");
    };
    assert!(matches!(
        &last.cluster_specifier,
        Some(envoy_types::pb::envoy::config::route::v3::route_action::ClusterSpecifier::Cluster(c)) if c == "test-cluster"
    ));
    assert_eq!(cluster_names(&output), vec!["api", "test-cluster"]);
}

#[test]
fn test_template_replace_and_delete() {
    let mut store = https_store();
    let mut template = VirtualServiceTemplate {
        metadata: ObjectMeta::new("default", "base"),
        ..Default::default()
    };
    template.spec.listener = Some(ResourceRef::new("plain-listener"));
    template.spec.http_filters = vec![oauth2("oauth-token"), router()];
    template.spec.use_remote_address = Some(true);
    store.upsert_template(template);

    let mut vs = virtual_service("vs", "plain-listener", &["exc.kaasops.io"], "test-cluster");
    vs.spec.template = Some(ResourceRef::new("base"));
    vs.spec.template_options = vec![
        TemplateOption { field: "httpFilters".into(), modifier: "replace".into() },
        TemplateOption { field: "useRemoteAddress".into(), modifier: "delete".into() },
    ];

    let output = builder().build(&vs, &store).expect("build");
    let hcm = hcm(&output.resources.filter_chains[0]);
    assert_eq!(hcm.http_filters.len(), 1);
    assert_eq!(hcm.use_remote_address.map(|v| v.value), Some(false));
    assert_eq!(cluster_names(&output), vec!["test-cluster"]);

    vs.spec.template = Some(ResourceRef::new("absent"));
    let err = builder().build(&vs, &store).unwrap_err();
    assert_eq!(err.root_cause().to_string(), "virtual service template default/absent not found");
}

#[test]
fn test_deprecated_access_log_is_reported_in_status() {
    let store = https_store();
    let mut vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "test-cluster");
    vs.spec.access_log = Some(json!({
        "name": "envoy.access_loggers.file",
        "typed_config": {"@type": FILE_ACCESS_LOG_TYPE_URL, "path": "/dev/stdout"}
    }));

    let output = builder().build(&vs, &store).expect("build");
    assert_eq!(output.advisories, vec![ACCESS_LOG_DEPRECATED]);
    let status = output.status();
    assert!(!status.invalid);
    assert_eq!(status.message, ACCESS_LOG_DEPRECATED);
    assert_eq!(hcm(&output.resources.filter_chains[0]).access_log.len(), 1);
}

#[test]
fn test_access_log_configs_with_generated_filename() {
    let mut store = https_store();
    let mut metadata = ObjectMeta::new("default", "per-vs-files");
    metadata
        .annotations
        .insert(AUTO_GENERATED_FILENAME_ANNOTATION.to_string(), "true".to_string());
    store.upsert_access_log(AccessLogConfig {
        metadata,
        spec: json!({
            "name": "envoy.access_loggers.file",
            "typed_config": {"@type": FILE_ACCESS_LOG_TYPE_URL, "path": "/var/log/envoy"}
        }),
    });

    let mut vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "test-cluster");
    vs.spec.access_log_configs = vec![ResourceRef::new("per-vs-files")];
    let output = builder().build(&vs, &store).expect("build");
    assert!(output.advisories.is_empty());
    assert_eq!(hcm(&output.resources.filter_chains[0]).access_log.len(), 1);
}

#[test]
fn test_targeting_metadata_is_copied() {
    let store = https_store();
    let mut vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "test-cluster");
    vs.metadata.annotations.insert(NODE_ID_ANNOTATION.to_string(), "node-a, node-b".to_string());
    vs.metadata.labels.insert(ACCESS_GROUP_LABEL.to_string(), "edge".to_string());

    let output = builder().build(&vs, &store).expect("build");
    assert_eq!(output.resources.node_ids, vec!["node-a", "node-b"]);
    assert_eq!(output.resources.access_group, "edge");
}

#[test]
fn test_store_mutation_invalidates_cached_build() {
    let mut store = https_store();
    let vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "test-cluster");
    let builder = builder();

    builder.build(&vs, &store).expect("build");
    let revision = store.revision();
    store.upsert_cluster(static_cluster("unrelated")).unwrap();
    assert_eq!(store.revision().mutations, revision.mutations + 1);

    builder.build(&vs, &store).expect("rebuild");
    let resources = builder.cache_stats().into_iter().find(|s| s.name == "resources").unwrap();
    assert_eq!(resources.hits, 0);
    assert_eq!(resources.len, 2);
}

#[test]
fn test_metadata_only_edit_updates_targeting() {
    let store = https_store();
    let mut vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "test-cluster");
    let builder = builder();

    let first = builder.build(&vs, &store).expect("build");
    assert!(first.resources.node_ids.is_empty());
    assert_eq!(first.resources.access_group, "general");

    // generation and spec are untouched, as for a metadata-only edit
    vs.metadata.annotations.insert(NODE_ID_ANNOTATION.to_string(), "node-a".to_string());
    vs.metadata.labels.insert(ACCESS_GROUP_LABEL.to_string(), "edge".to_string());
    let second = builder.build(&vs, &store).expect("rebuild");
    assert_eq!(second.resources.node_ids, vec!["node-a"]);
    assert_eq!(second.resources.access_group, "edge");
    assert_eq!(second.resources.filter_chains, first.resources.filter_chains);

    let resources = builder.cache_stats().into_iter().find(|s| s.name == "resources").unwrap();
    assert_eq!(resources.hits, 1);
}

#[test]
fn test_one_builder_serves_distinct_stores() {
    let mut primary = https_store();
    let mut copy = primary.clone();
    primary.upsert_cluster(static_cluster_on("backend", 8080)).unwrap();
    copy.upsert_cluster(static_cluster_on("backend", 9090)).unwrap();
    assert_eq!(primary.revision().mutations, copy.revision().mutations);

    let vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "backend");
    let builder = builder();
    let from_primary = builder.build(&vs, &primary).expect("build on primary");
    let from_copy = builder.build(&vs, &copy).expect("build on copy");

    assert_eq!(from_primary.resources.clusters, vec![primary.get_spec_cluster("backend").unwrap()]);
    assert_eq!(from_copy.resources.clusters, vec![copy.get_spec_cluster("backend").unwrap()]);
    assert_ne!(from_primary.resources.clusters, from_copy.resources.clusters);
}

#[test]
fn test_certificate_expiry_between_builds_changes_selection() {
    let expiry_year = Utc::now().year() + 2;
    let mut store = https_store();
    store.upsert_secret(expiring_secret("default", "short-lived", &["api.kaasops.io"], expiry_year));
    store.upsert_secret(tls_secret("other", "long-lived", &["api.kaasops.io"]));

    let mut vs = virtual_service("api", "test-listener", &["api.kaasops.io"], "test-cluster");
    vs.spec.tls_config = Some(auto_discovery());
    let builder = builder();

    // both certificates are valid now, so the VirtualService namespace wins
    let current = builder.build_at(&vs, &store, Utc::now()).expect("build");
    assert_eq!(current.resources.used_secrets, vec![NamespacedName::new("default", "short-lived")]);

    let after_expiry = Utc.with_ymd_and_hms(expiry_year, 1, 2, 0, 0, 0).unwrap();
    let later = builder.build_at(&vs, &store, after_expiry).expect("build after expiry");
    assert_eq!(later.resources.used_secrets, vec![NamespacedName::new("other", "long-lived")]);
    assert_eq!(sds_secret_name(&later.resources.filter_chains[0]), "other/long-lived");
}

#[test]
fn test_health_checked_cluster_with_retrying_route() {
    let mut store = https_store();
    let mut cluster = static_cluster("checked");
    cluster.spec["health_checks"] = json!([{
        "timeout": "2s",
        "interval": "10s",
        "unhealthy_threshold": 3,
        "healthy_threshold": 2,
        "http_health_check": {"path": "/healthz", "expected_statuses": [{"start": 200, "end": 400}]}
    }]);
    cluster.spec["outlier_detection"] = json!({"consecutive_5xx": 5, "base_ejection_time": "30s"});
    cluster.spec["lb_policy"] = json!("RING_HASH");
    store.upsert_cluster(cluster).expect("cluster with health checks");

    let mut vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "checked");
    vs.spec.virtual_host = Some(json!({
        "domains": ["exc.kaasops.io"],
        "routes": [{
            "match": {"prefix": "/"},
            "route": {
                "cluster": "checked",
                "retry_policy": {"retry_on": "5xx", "num_retries": 2},
                "hash_policy": [{"header": {"header_name": "x-session"}}]
            }
        }]
    }));

    let output = builder().build(&vs, &store).expect("build");
    let cluster = &output.resources.clusters[0];
    assert_eq!(cluster.name, "checked");
    assert_eq!(cluster.health_checks.len(), 1);
    assert!(cluster.outlier_detection.is_some());

    let vh = &output.resources.route_config.as_ref().expect("route config").virtual_hosts[0];
    let Some(route::Action::Route(action)) = &vh.routes[0].action else {
        panic!("route without route action");
    };
    assert_eq!(action.retry_policy.as_ref().map(|p| p.retry_on.as_str()), Some("5xx"));
    assert_eq!(action.hash_policy.len(), 1);
}

#[test]
fn test_unmodelled_route_field_is_named_in_error() {
    let store = https_store();
    let mut vs = virtual_service("test-vs", "plain-listener", &["exc.kaasops.io"], "test-cluster");
    vs.spec.virtual_host = Some(json!({
        "domains": ["exc.kaasops.io"],
        "routes": [{
            "match": {"prefix": "/"},
            "route": {"cluster": "test-cluster", "request_mirror_policies": [{"cluster": "shadow"}]}
        }]
    }));

    let err = builder().build(&vs, &store).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(
        err.root_cause().to_string(),
        "unsupported field request_mirror_policies in RouteAction"
    );
}
