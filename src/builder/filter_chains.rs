//! HTTP connection manager and filter chain emission.
//!
//! Every chain of one VirtualService carries the same HCM. TLS listeners get
//! one chain per resolved secret, matched on SNI and terminated with an SDS
//! sourced certificate; plain listeners get a single chain.

use crate::api::VirtualService;
use crate::builder::{stat_prefix, FilterChainBuilder, FilterChainParams, SecretDomains};
use crate::errors::{Error, Result, ResultExt};
use crate::store::Store;
use crate::xds::hcm::{ads_config_source, TracingSpec, UpgradeConfigSpec};
use crate::xds::canonical::pack_canonical;
use crate::xds::typed_config::pack;
use crate::xds::validate::{validate_filter_chain, validate_hcm};
use crate::xds::{
    DEFAULT_ALPN_PROTOCOLS, DOWNSTREAM_TLS_CONTEXT_TYPE_URL, HCM_FILTER_NAME, HCM_TYPE_URL,
    TLS_TRANSPORT_SOCKET_NAME,
};
use envoy_types::pb::envoy::config::accesslog::v3::AccessLog;
use envoy_types::pb::envoy::config::core::v3::{transport_socket, TransportSocket};
use envoy_types::pb::envoy::config::listener::v3::{filter, Filter, FilterChain, FilterChainMatch};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier, Tracing, UpgradeConfig},
    HttpConnectionManager, HttpFilter, Rds,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    CommonTlsContext, DownstreamTlsContext, SdsSecretConfig,
};
use envoy_types::pb::google::protobuf::BoolValue;
use serde_json::Value;
use tracing::debug;

fn parse_tracing(raw: &Value) -> Result<Tracing> {
    TracingSpec::from_json(raw)?.to_envoy()
}

/// Downstream TLS context fetching the named certificate over ADS.
pub fn downstream_tls_context(secret_name: &str) -> DownstreamTlsContext {
    DownstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            tls_certificate_sds_secret_configs: vec![SdsSecretConfig {
                name: secret_name.to_string(),
                sds_config: Some(ads_config_source()),
            }],
            alpn_protocols: DEFAULT_ALPN_PROTOCOLS.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn server_names(domains: &[String]) -> Option<FilterChainMatch> {
    if domains.is_empty() || domains == ["*"] {
        return None;
    }
    Some(FilterChainMatch { server_names: domains.to_vec(), ..Default::default() })
}

#[derive(Debug, Default)]
pub struct DefaultFilterChainBuilder;

impl DefaultFilterChainBuilder {
    pub fn new() -> Self {
        Self
    }

    fn tracing(&self, vs: &VirtualService, store: &dyn Store) -> Result<Option<Tracing>> {
        match (&vs.spec.tracing, &vs.spec.tracing_ref) {
            (Some(_), Some(_)) => {
                Err(Error::invalid("only one of spec.tracing or spec.tracingRef may be set"))
            }
            (Some(inline), None) => {
                parse_tracing(inline).context("failed to unmarshal tracing").map(Some)
            }
            (None, Some(reference)) => {
                let id = reference.resolve(vs.namespace());
                let resource = store.get_tracing(&id).ok_or_else(|| Error::not_found("tracing", &id))?;
                parse_tracing(&resource.spec)
                    .with_context(|| format!("failed to unmarshal tracing {}", id))
                    .map(Some)
            }
            (None, None) => Ok(None),
        }
    }

    fn upgrade_configs(&self, vs: &VirtualService) -> Result<Vec<UpgradeConfig>> {
        vs.spec
            .upgrade_configs
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                UpgradeConfigSpec::from_json(raw)
                    .and_then(|spec| spec.to_envoy())
                    .with_context(|| format!("failed to unmarshal upgrade config [{}]", index))
            })
            .collect()
    }

    /// The connection manager shared by every chain of the VirtualService.
    pub fn http_connection_manager(&self, params: &FilterChainParams) -> Result<HttpConnectionManager> {
        let hcm = HttpConnectionManager {
            codec_type: CodecType::Auto as i32,
            stat_prefix: params.stat_prefix.clone(),
            route_specifier: Some(RouteSpecifier::Rds(Rds {
                route_config_name: params.route_config_name.clone(),
                config_source: Some(ads_config_source()),
            })),
            http_filters: params.http_filters.clone(),
            access_log: params.access_logs.clone(),
            tracing: params.tracing.clone(),
            use_remote_address: Some(BoolValue { value: params.use_remote_address }),
            xff_num_trusted_hops: params.xff_num_trusted_hops.unwrap_or_default(),
            upgrade_configs: params.upgrade_configs.clone(),
            ..Default::default()
        };
        validate_hcm(&hcm).context("failed to validate HTTP connection manager")?;
        Ok(hcm)
    }

    fn filter_chain(
        &self,
        params: &FilterChainParams,
        hcm: &HttpConnectionManager,
        tls: Option<(&str, &[String])>,
    ) -> Result<FilterChain> {
        let mut chain = FilterChain {
            name: params.name.clone(),
            filters: vec![Filter {
                name: HCM_FILTER_NAME.to_string(),
                config_type: Some(filter::ConfigType::TypedConfig(pack_canonical(HCM_TYPE_URL, hcm))),
            }],
            ..Default::default()
        };

        if let Some((secret_name, domains)) = tls {
            if params.is_tls {
                chain.filter_chain_match = server_names(domains);
            }
            chain.transport_socket = Some(TransportSocket {
                name: TLS_TRANSPORT_SOCKET_NAME.to_string(),
                config_type: Some(transport_socket::ConfigType::TypedConfig(pack(
                    DOWNSTREAM_TLS_CONTEXT_TYPE_URL,
                    &downstream_tls_context(secret_name),
                ))),
            });
        }

        validate_filter_chain(&chain).context("failed to validate filter chain")?;
        Ok(chain)
    }
}

impl FilterChainBuilder for DefaultFilterChainBuilder {
    fn check_filter_chain_conflicts(&self, vs: &VirtualService) -> Result<()> {
        match vs.spec.first_filter_chain_conflict() {
            Some(field) => Err(Error::conflict(format!(
                "{} is set, but filter chains are found in listener",
                field
            ))),
            None => Ok(()),
        }
    }

    fn build_filter_chain_params(
        &self,
        vs: &VirtualService,
        http_filters: Vec<HttpFilter>,
        access_logs: Vec<AccessLog>,
        is_tls: bool,
        secret_domains: SecretDomains,
        store: &dyn Store,
    ) -> Result<FilterChainParams> {
        let id = vs.metadata.namespaced_name();
        Ok(FilterChainParams {
            name: id.to_string(),
            stat_prefix: stat_prefix(&id),
            route_config_name: id.to_string(),
            use_remote_address: vs.spec.use_remote_address.unwrap_or(false),
            xff_num_trusted_hops: vs.spec.xff_num_trusted_hops,
            http_filters,
            upgrade_configs: self.upgrade_configs(vs)?,
            access_logs,
            tracing: self.tracing(vs, store)?,
            is_tls,
            secret_domains,
        })
    }

    fn build_filter_chains(&self, params: &FilterChainParams) -> Result<Vec<FilterChain>> {
        let hcm = self.http_connection_manager(params)?;

        if params.secret_domains.is_empty() {
            let chain = self.filter_chain(params, &hcm, None).context("failed to build filter chain")?;
            return Ok(vec![chain]);
        }

        let chains = params
            .secret_domains
            .iter()
            .map(|(secret, domains)| {
                let secret_name = secret.to_string();
                self.filter_chain(params, &hcm, Some((secret_name.as_str(), domains.as_slice())))
                    .with_context(|| format!("failed to build filter chain for domain {:?}", domains))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(name = %params.name, chains = chains.len(), "Built TLS filter chains");
        Ok(chains)
    }
}
