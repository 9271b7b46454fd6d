//! # Envoy xDS resource model
//!
//! Serde mirrors of the Envoy v3 JSON shapes accepted by the VirtualService
//! API, their conversion into `envoy-types` protobufs, and the schema checks
//! applied to the resulting messages before they leave the builder.

pub mod canonical;
pub mod cluster;
pub mod duration;
pub mod hcm;
pub mod listener;
pub mod rbac;
pub mod route;
pub mod typed_config;
pub mod validate;

use crate::errors::{Error, Result};
use std::collections::BTreeMap;

/// Type URL for Cluster resources
pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";

/// Type URL for RouteConfiguration resources
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

/// Type URL for Listener resources
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";

/// Type URL for Secret resources
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

pub const HCM_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
pub const TCP_PROXY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
pub const ROUTER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
pub const RBAC_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.rbac.v3.RBAC";
pub const TLS_INSPECTOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector";
pub const FILE_ACCESS_LOG_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.access_loggers.file.v3.FileAccessLog";
pub const DOWNSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";

/// Generic extension envelope understood by Envoy for any registered extension
pub const TYPED_STRUCT_TYPE_URL: &str = "type.googleapis.com/xds.type.v3.TypedStruct";
/// Legacy envelope, accepted on input only
pub const UDPA_TYPED_STRUCT_TYPE_URL: &str = "type.googleapis.com/udpa.type.v1.TypedStruct";

/// Well-known network filter name of the HTTP connection manager
pub const HCM_FILTER_NAME: &str = "envoy.filters.network.http_connection_manager";
pub const TCP_PROXY_FILTER_NAME: &str = "envoy.filters.network.tcp_proxy";
pub const TLS_TRANSPORT_SOCKET_NAME: &str = "envoy.transport_sockets.tls";
pub const TLS_INSPECTOR_FILTER_NAME: &str = "envoy.filters.listener.tls_inspector";
pub const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";
pub const FILE_ACCESS_LOG_NAME: &str = "envoy.access_loggers.file";

/// Name of the RBAC filter the builder prepends to the HTTP filter chain
pub const RBAC_FILTER_NAME: &str = "exc.filters.http.rbac";

/// ALPN protocols advertised on every TLS filter chain
pub const DEFAULT_ALPN_PROTOCOLS: [&str; 2] = ["h2", "http/1.1"];

/// Strip the `type.googleapis.com/` style prefix from a type URL.
pub fn type_name(type_url: &str) -> &str {
    type_url.rsplit('/').next().unwrap_or(type_url)
}

/// Keys of an Envoy message that deserialized but are not modelled here.
pub type UnsupportedFields = BTreeMap<String, serde_json::Value>;

/// Fail on the first key `fields` captured, naming the message it came from.
pub fn reject_unsupported(message: &str, fields: &UnsupportedFields) -> Result<()> {
    match fields.keys().next() {
        Some(key) => Err(Error::invalid_field(
            format!("unsupported field {} in {}", key, message),
            key.as_str(),
        )),
        None => Ok(()),
    }
}
