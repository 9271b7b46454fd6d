//! Schema checks on built messages.
//!
//! envoy-types carries no generated validators, so the constraints from the
//! Envoy proto annotations that the builder depends on are checked here.

use crate::errors::{Error, Result};
use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::listener::v3::{filter, FilterChain, Listener};
use envoy_types::pb::envoy::config::rbac::v3::Policy;
use envoy_types::pb::envoy::config::route::v3::{Route, RouteConfiguration, VirtualHost};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_filter, HttpConnectionManager,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::Secret;

pub fn validate_listener(listener: &Listener) -> Result<()> {
    if listener.name.is_empty() {
        return Err(Error::invalid("invalid Listener.Name: value length must be at least 1"));
    }
    if listener.address.is_none() {
        return Err(Error::invalid(format!("invalid Listener {}: address is required", listener.name)));
    }
    Ok(())
}

pub fn validate_hcm(hcm: &HttpConnectionManager) -> Result<()> {
    if hcm.stat_prefix.is_empty() {
        return Err(Error::invalid(
            "invalid HttpConnectionManager.StatPrefix: value length must be at least 1",
        ));
    }
    if hcm.route_specifier.is_none() {
        return Err(Error::invalid("invalid HttpConnectionManager: route specifier is required"));
    }
    for filter in &hcm.http_filters {
        if filter.name.is_empty() {
            return Err(Error::invalid("invalid HttpFilter.Name: value length must be at least 1"));
        }
        if !matches!(filter.config_type, Some(http_filter::ConfigType::TypedConfig(_))) {
            return Err(Error::invalid(format!("invalid HttpFilter {}: typed_config is required", filter.name)));
        }
    }
    Ok(())
}

pub fn validate_filter_chain(chain: &FilterChain) -> Result<()> {
    if chain.filters.is_empty() {
        return Err(Error::invalid(format!("invalid FilterChain {}: no filters", chain.name)));
    }
    for f in &chain.filters {
        if f.name.is_empty() {
            return Err(Error::invalid("invalid Filter.Name: value length must be at least 1"));
        }
        if !matches!(f.config_type, Some(filter::ConfigType::TypedConfig(_))) {
            return Err(Error::invalid(format!("invalid Filter {}: typed_config is required", f.name)));
        }
    }
    if let Some(socket) = &chain.transport_socket {
        if socket.name.is_empty() {
            return Err(Error::invalid("invalid TransportSocket.Name: value length must be at least 1"));
        }
    }
    Ok(())
}

pub fn validate_route(route: &Route) -> Result<()> {
    if route.r#match.as_ref().and_then(|m| m.path_specifier.as_ref()).is_none() {
        return Err(Error::invalid(format!("invalid Route '{}': match is required", route.name)));
    }
    if route.action.is_none() {
        return Err(Error::invalid(format!("invalid Route '{}': action is required", route.name)));
    }
    Ok(())
}

pub fn validate_virtual_host(vh: &VirtualHost) -> Result<()> {
    if vh.name.is_empty() {
        return Err(Error::invalid("invalid VirtualHost.Name: value length must be at least 1"));
    }
    if vh.domains.is_empty() {
        return Err(Error::invalid_field(
            format!("invalid VirtualHost {}: at least one domain is required", vh.name),
            "domains",
        ));
    }
    vh.routes.iter().try_for_each(validate_route)
}

pub fn validate_route_configuration(rc: &RouteConfiguration) -> Result<()> {
    if rc.name.is_empty() {
        return Err(Error::invalid("invalid RouteConfiguration.Name: value length must be at least 1"));
    }
    rc.virtual_hosts.iter().try_for_each(validate_virtual_host)
}

pub fn validate_cluster(cluster: &Cluster) -> Result<()> {
    if cluster.name.is_empty() {
        return Err(Error::invalid("invalid Cluster.Name: value length must be at least 1"));
    }
    Ok(())
}

pub fn validate_secret(secret: &Secret) -> Result<()> {
    if secret.name.is_empty() {
        return Err(Error::invalid("invalid Secret.Name: value length must be at least 1"));
    }
    if secret.r#type.is_none() {
        return Err(Error::invalid(format!("invalid Secret {}: no secret material", secret.name)));
    }
    Ok(())
}

pub fn validate_policy(name: &str, policy: &Policy) -> Result<()> {
    if policy.permissions.is_empty() {
        return Err(Error::invalid(format!(
            "invalid Policy {}: Permissions must contain at least 1 item(s)",
            name
        )));
    }
    if policy.principals.is_empty() {
        return Err(Error::invalid(format!(
            "invalid Policy {}: Principals must contain at least 1 item(s)",
            name
        )));
    }
    Ok(())
}
