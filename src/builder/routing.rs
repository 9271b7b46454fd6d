//! Virtual host and route configuration assembly.

use crate::api::VirtualService;
use crate::builder::RoutingBuilder;
use crate::errors::{Error, Result, ResultExt};
use crate::store::Store;
use crate::xds::listener::{is_tls_listener, listener_port};
use crate::xds::route::{RouteSpec, VirtualHostSpec};
use crate::xds::validate::{validate_route_configuration, validate_virtual_host};
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::{
    route, route_match::PathSpecifier, DirectResponseAction, Route, RouteConfiguration, RouteMatch,
    VirtualHost,
};
use std::collections::HashSet;
use tracing::debug;

/// Name of the catch-all host answering requests that do not match the SNI-selected chain
pub const FALLBACK_VIRTUAL_HOST_NAME: &str = "421vh";
const MISDIRECTED_REQUEST: u32 = 421;
const HTTPS_PORT: u32 = 443;

/// A route matching every path: prefix `/` or path `/`.
pub fn is_root_route(route: &Route) -> bool {
    matches!(
        route.r#match.as_ref().and_then(|m| m.path_specifier.as_ref()),
        Some(PathSpecifier::Prefix(p)) | Some(PathSpecifier::Path(p)) if p == "/"
    )
}

/// Virtual host returning 421 Misdirected Request for any host.
pub fn fallback_virtual_host() -> VirtualHost {
    VirtualHost {
        name: FALLBACK_VIRTUAL_HOST_NAME.to_string(),
        domains: vec!["*".to_string()],
        routes: vec![Route {
            r#match: Some(RouteMatch {
                path_specifier: Some(PathSpecifier::Prefix("/".to_string())),
                ..Default::default()
            }),
            action: Some(route::Action::DirectResponse(DirectResponseAction {
                status: MISDIRECTED_REQUEST,
                ..Default::default()
            })),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn needs_fallback(listener: &Listener, virtual_host: &VirtualHost) -> bool {
    let wildcard_only = virtual_host.domains.len() == 1 && virtual_host.domains[0] == "*";
    is_tls_listener(listener) && listener_port(listener) == Some(HTTPS_PORT) && !wildcard_only
}

fn check_unique_domains(domains: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(domains.len());
    for domain in domains {
        if !seen.insert(domain.to_lowercase()) {
            return Err(Error::invalid_field(format!("duplicate domain found: {}", domain), "domains"));
        }
    }
    Ok(())
}

/// Keep at most one root route and make sure it is matched last.
fn place_root_route(routes: &mut Vec<Route>) -> Result<()> {
    let roots: Vec<usize> =
        routes.iter().enumerate().filter(|(_, r)| is_root_route(r)).map(|(i, _)| i).collect();
    match roots.as_slice() {
        [] => Ok(()),
        [index] => {
            if *index != routes.len() - 1 {
                let root = routes.remove(*index);
                routes.push(root);
            }
            Ok(())
        }
        _ => Err(Error::conflict("multiple root routes found")),
    }
}

#[derive(Debug, Default)]
pub struct DefaultRoutingBuilder;

impl DefaultRoutingBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl RoutingBuilder for DefaultRoutingBuilder {
    fn build_virtual_host(&self, vs: &VirtualService, store: &dyn Store) -> Result<VirtualHost> {
        let raw = vs
            .spec
            .virtual_host
            .as_ref()
            .ok_or_else(|| Error::invalid_field("virtual host is empty", "virtualHost"))?;

        let mut virtual_host = VirtualHostSpec::from_json(raw)
            .and_then(|spec| spec.to_envoy())
            .context("failed to unmarshal virtual host")?;
        virtual_host.name = vs.metadata.namespaced_name().to_string();

        for reference in &vs.spec.additional_routes {
            let id = reference.resolve(vs.namespace());
            let resource = store.get_route(&id).ok_or_else(|| Error::not_found("route", &id))?;
            for (index, raw) in resource.spec.iter().enumerate() {
                let route = RouteSpec::from_json(raw)
                    .and_then(|spec| spec.to_envoy())
                    .with_context(|| format!("failed to unmarshal route {}[{}]", id, index))?;
                virtual_host.routes.push(route);
            }
        }

        place_root_route(&mut virtual_host.routes)?;
        check_unique_domains(&virtual_host.domains)?;
        validate_virtual_host(&virtual_host).context("failed to validate virtual host")?;

        debug!(
            virtual_host = %virtual_host.name,
            domains = virtual_host.domains.len(),
            routes = virtual_host.routes.len(),
            "Built virtual host"
        );
        Ok(virtual_host)
    }

    fn build_route_configuration(
        &self,
        vs: &VirtualService,
        listener: &Listener,
        store: &dyn Store,
    ) -> Result<(VirtualHost, RouteConfiguration)> {
        let virtual_host = self.build_virtual_host(vs, store)?;

        let mut route_config = RouteConfiguration {
            name: vs.metadata.namespaced_name().to_string(),
            virtual_hosts: vec![virtual_host.clone()],
            ..Default::default()
        };
        if needs_fallback(listener, &virtual_host) {
            route_config.virtual_hosts.push(fallback_virtual_host());
        }

        validate_route_configuration(&route_config).context("failed to validate route configuration")?;
        Ok((virtual_host, route_config))
    }
}
