//! Properties every successful build must hold, over generated domains,
//! routes and HTTP filter orderings.

mod common;

use common::*;
use exc_resbuilder::builder::http_filters::is_router;
use exc_resbuilder::builder::routing::FALLBACK_VIRTUAL_HOST_NAME;
use exc_resbuilder::xds::canonical::CanonicalEncode;
use exc_resbuilder::xds::typed_config::unpack;
use exc_resbuilder::xds::{DOWNSTREAM_TLS_CONTEXT_TYPE_URL, HCM_TYPE_URL};
use exc_resbuilder::{BuildOutput, Builder, BuilderConfig, MemoryStore, VirtualService};
use envoy_types::pb::envoy::config::core::v3::transport_socket;
use envoy_types::pb::envoy::config::listener::v3::{filter, FilterChain};
use envoy_types::pb::envoy::config::route::v3::{route, route_action::ClusterSpecifier};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::HttpConnectionManager;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::DownstreamTlsContext;
use proptest::prelude::*;
use proptest::sample::subsequence;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::OnceLock;

const DOMAINS: &[&str] = &[
    "a.apps.kaasops.io",
    "b.apps.kaasops.io",
    "c.apps.kaasops.io",
    "a.exact.kaasops.io",
    "b.exact.kaasops.io",
    "exc.kaasops.io",
];
const PREFIXES: &[&str] = &["/api", "/auth", "/static", "/v1", "/v2"];
const CLUSTERS: &[&str] = &["c1", "c2", "c3"];

/// Shared store: two TLS listeners, three clusters, a wildcard secret for
/// `*.apps.kaasops.io` and exact secrets in another namespace.
fn store() -> &'static MemoryStore {
    static STORE: OnceLock<MemoryStore> = OnceLock::new();
    STORE.get_or_init(|| {
        let mut store = https_store();
        store.upsert_listener(listener("alt-https", 10443, true));
        for name in CLUSTERS {
            store.upsert_cluster(static_cluster(name)).expect("valid cluster");
        }
        store.upsert_cluster(static_cluster("oauth-token")).expect("valid cluster");
        store.upsert_secret(tls_secret("default", "apps-wildcard", &["*.apps.kaasops.io"]));
        store.upsert_secret(tls_secret("team", "exact-a", &["a.exact.kaasops.io"]));
        store.upsert_secret(tls_secret("team", "exact-b", &["b.exact.kaasops.io"]));
        store
    })
}

#[derive(Debug, Clone)]
struct Case {
    domains: Vec<&'static str>,
    routes: Vec<(&'static str, &'static str)>,
    root_cluster: &'static str,
    oauth_position: Option<usize>,
    https_port: bool,
}

fn cases() -> impl Strategy<Value = Case> {
    (
        subsequence(DOMAINS, 1..=DOMAINS.len()),
        subsequence(PREFIXES, 0..=PREFIXES.len()),
        prop::collection::vec(prop::sample::select(CLUSTERS), PREFIXES.len()),
        prop::sample::select(CLUSTERS),
        prop::option::of(0usize..2),
        any::<bool>(),
    )
        .prop_map(|(domains, prefixes, targets, root_cluster, oauth_position, https_port)| Case {
            domains,
            routes: prefixes.into_iter().zip(targets).collect(),
            root_cluster,
            oauth_position,
            https_port,
        })
}

fn virtual_service(case: &Case) -> VirtualService {
    let listener = if case.https_port { "test-listener" } else { "alt-https" };
    // root route first so the builder has to move it
    let mut routes = vec![route("/", case.root_cluster)];
    routes.extend(case.routes.iter().map(|(prefix, cluster)| route(prefix, cluster)));

    let mut vs = VirtualService::new("default", "prop-vs");
    vs.spec.listener = Some(exc_resbuilder::api::ResourceRef::new(listener));
    vs.spec.virtual_host = Some(json!({"domains": case.domains, "routes": routes}));
    vs.spec.http_filters = vec![router()];
    if let Some(position) = case.oauth_position {
        vs.spec.http_filters.insert(position.min(1), oauth2("oauth-token"));
    }
    vs.spec.tls_config = Some(auto_discovery());
    vs
}

const PER_FILTER: &[&str] = &[
    "envoy.filters.http.cors",
    "envoy.filters.http.ext_authz",
    "envoy.filters.http.jwt_authn",
    "envoy.filters.http.lua",
    "envoy.filters.http.rbac",
];

/// Per-filter overrides with nested objects, so both the override map and
/// the TypedStruct bodies are maps.
fn per_filter_config(names: &[&str]) -> serde_json::Value {
    let configs: serde_json::Map<String, serde_json::Value> = names
        .iter()
        .map(|name| {
            let config = json!({
                "@type": format!("type.googleapis.com/test.{}", name),
                "disabled": false,
                "settings": {"name": name, "weight": 3, "tags": ["a", "b"], "nested": {"x": 1, "y": 2}}
            });
            (name.to_string(), config)
        })
        .collect();
    serde_json::Value::Object(configs)
}

fn hcm(chain: &FilterChain) -> HttpConnectionManager {
    let Some(filter::ConfigType::TypedConfig(any)) = &chain.filters[0].config_type else {
        panic!("filter chain without typed config");
    };
    unpack(any, HCM_TYPE_URL).expect("HCM")
}

fn sds_secret_name(chain: &FilterChain) -> String {
    let Some(transport_socket::ConfigType::TypedConfig(any)) =
        &chain.transport_socket.as_ref().expect("transport socket").config_type
    else {
        panic!("transport socket without typed config");
    };
    let context: DownstreamTlsContext = unpack(any, DOWNSTREAM_TLS_CONTEXT_TYPE_URL).expect("TLS context");
    context.common_tls_context.expect("common context").tls_certificate_sds_secret_configs[0]
        .name
        .clone()
}

fn build(vs: &VirtualService) -> BuildOutput {
    Builder::new(&BuilderConfig::default()).build(vs, store()).expect("build")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn builds_are_deterministic_and_pure(case in cases()) {
        let vs = virtual_service(&case);
        let before = vs.clone();

        let first = build(&vs);
        let second = build(&vs);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&vs, &before);
    }

    #[test]
    fn encoded_bytes_are_identical_across_builders(
        case in cases(),
        names in subsequence(PER_FILTER, 2..=PER_FILTER.len()),
    ) {
        let mut vs = virtual_service(&case);
        if let Some(vh) = vs.spec.virtual_host.as_mut() {
            vh["typed_per_filter_config"] = per_filter_config(&names);
            if let Some(routes) = vh["routes"].as_array_mut() {
                for r in routes {
                    r["typed_per_filter_config"] = per_filter_config(&names);
                }
            }
        }

        // separate builders, so no cached output is shared
        let first = build(&vs);
        let second = build(&vs);
        let (a, b) = (&first.resources, &second.resources);

        let route_config = a.route_config.as_ref().expect("route config");
        prop_assert!(route_config.virtual_hosts[0].typed_per_filter_config.len() >= 2);
        prop_assert_eq!(
            route_config.to_canonical_bytes(),
            b.route_config.as_ref().expect("route config").to_canonical_bytes()
        );
        prop_assert_eq!(a.packed(), b.packed());
        for (x, y) in a.filter_chains.iter().zip(&b.filter_chains) {
            prop_assert_eq!(&x.filters[0].config_type, &y.filters[0].config_type);
        }
    }

    #[test]
    fn router_is_last_and_filters_are_kept(case in cases()) {
        let vs = virtual_service(&case);
        let output = build(&vs);

        for chain in &output.resources.filter_chains {
            let filters = hcm(chain).http_filters;
            prop_assert_eq!(filters.len(), vs.spec.http_filters.len());
            prop_assert!(filters.last().is_some_and(is_router));
            prop_assert_eq!(filters.iter().filter(|f| is_router(f)).count(), 1);
        }
    }

    #[test]
    fn every_referenced_cluster_is_emitted_once(case in cases()) {
        let output = build(&virtual_service(&case));
        let emitted: Vec<&str> = output.resources.clusters.iter().map(|c| c.name.as_str()).collect();
        let unique: BTreeSet<&str> = emitted.iter().copied().collect();
        prop_assert_eq!(unique.len(), emitted.len());

        let route_config = output.resources.route_config.as_ref().expect("route config");
        for vh in &route_config.virtual_hosts {
            for r in &vh.routes {
                if let Some(route::Action::Route(action)) = &r.action {
                    if let Some(ClusterSpecifier::Cluster(name)) = &action.cluster_specifier {
                        prop_assert!(unique.contains(name.as_str()), "missing cluster {}", name);
                    }
                }
            }
        }
        prop_assert_eq!(unique.contains("oauth-token"), case.oauth_position.is_some());
    }

    #[test]
    fn root_route_is_matched_last(case in cases()) {
        let output = build(&virtual_service(&case));
        let vh = &output.resources.route_config.as_ref().expect("route config").virtual_hosts[0];
        prop_assert_eq!(vh.routes.len(), case.routes.len() + 1);
        let last = vh.routes.last().expect("routes");
        prop_assert!(exc_resbuilder::builder::routing::is_root_route(last));
    }

    #[test]
    fn fallback_host_only_on_https_port(case in cases()) {
        let output = build(&virtual_service(&case));
        let hosts = &output.resources.route_config.as_ref().expect("route config").virtual_hosts;
        let has_fallback = hosts.last().is_some_and(|vh| vh.name == FALLBACK_VIRTUAL_HOST_NAME);
        prop_assert_eq!(has_fallback, case.https_port);
        prop_assert_eq!(hosts.len(), if case.https_port { 2 } else { 1 });
    }

    #[test]
    fn every_domain_is_served_by_exactly_one_chain(case in cases()) {
        let output = build(&virtual_service(&case));
        let resources = &output.resources;

        let mut served = Vec::new();
        for chain in &resources.filter_chains {
            let names = &chain.filter_chain_match.as_ref().expect("server names").server_names;
            served.extend(names.iter().cloned());
        }
        served.sort();
        let mut expected: Vec<String> = case.domains.iter().map(|d| d.to_string()).collect();
        expected.sort();
        prop_assert_eq!(served, expected);

        let secret_names: BTreeSet<String> = resources.secrets.iter().map(|s| s.name.clone()).collect();
        let used: BTreeSet<String> = resources.used_secrets.iter().map(|id| id.to_string()).collect();
        prop_assert_eq!(&secret_names, &used);
        prop_assert_eq!(resources.filter_chains.len(), used.len());
        for chain in &resources.filter_chains {
            prop_assert!(used.contains(&sds_secret_name(chain)));
        }
    }
}
