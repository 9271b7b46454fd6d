//! Listener configuration in Envoy's v3 JSON shape.
//!
//! A Listener store entity carries an opaque listener blob. It is decoded
//! here into an envoy-types `Listener`; the builder then either keeps its
//! pre-declared filter chains or generates new ones.

use crate::errors::{Error, Result, ResultExt};
use crate::xds::duration;
use crate::xds::typed_config::{effective_type_url, json_to_any};
use crate::xds::{
    reject_unsupported, UnsupportedFields, TLS_INSPECTOR_FILTER_NAME, TLS_INSPECTOR_TYPE_URL,
};
use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address, transport_socket, Address, SocketAddress,
    TransportSocket,
};
use envoy_types::pb::envoy::config::listener::v3::{
    filter, listener_filter, Filter, FilterChain, FilterChainMatch, Listener, ListenerFilter,
};
use envoy_types::pb::google::protobuf::{Duration, UInt32Value};
use serde::Deserialize;
use serde_json::Value;

/// `envoy.config.core.v3.Address`; only socket addresses are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddressSpec {
    pub socket_address: SocketAddressSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SocketAddressSpec {
    pub address: String,
    #[serde(default)]
    pub port_value: u32,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub ipv4_compat: bool,
}

impl AddressSpec {
    pub fn to_envoy(&self) -> Result<Address> {
        let socket = &self.socket_address;
        if socket.port_value > u16::MAX as u32 {
            return Err(Error::invalid_field(
                format!("port {} out of range", socket.port_value),
                "port_value",
            ));
        }
        let protocol = match socket.protocol.as_deref() {
            None => socket_address::Protocol::Tcp,
            Some(name) => socket_address::Protocol::from_str_name(name)
                .ok_or_else(|| Error::invalid(format!("unknown socket protocol {}", name)))?,
        };

        Ok(Address {
            address: Some(AddressType::SocketAddress(SocketAddress {
                protocol: protocol as i32,
                address: socket.address.clone(),
                port_specifier: Some(socket_address::PortSpecifier::PortValue(socket.port_value)),
                ipv4_compat: socket.ipv4_compat,
                ..Default::default()
            })),
        })
    }
}

/// `envoy.config.core.v3.TransportSocket`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportSocketSpec {
    pub name: String,
    pub typed_config: Value,
}

impl TransportSocketSpec {
    pub fn to_envoy(&self) -> Result<TransportSocket> {
        let any = json_to_any(&self.typed_config)
            .with_context(|| format!("invalid transport socket {}", self.name))?;
        Ok(TransportSocket {
            name: self.name.clone(),
            config_type: Some(transport_socket::ConfigType::TypedConfig(any)),
        })
    }
}

/// `envoy.config.listener.v3.ListenerFilter`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerFilterSpec {
    pub name: String,
    #[serde(default)]
    pub typed_config: Option<Value>,
}

/// `envoy.config.listener.v3.Filter`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkFilterSpec {
    pub name: String,
    #[serde(default)]
    pub typed_config: Option<Value>,
}

/// `envoy.config.listener.v3.FilterChainMatch`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterChainMatchSpec {
    #[serde(default)]
    pub destination_port: Option<u32>,
    #[serde(default)]
    pub server_names: Vec<String>,
    #[serde(default)]
    pub transport_protocol: String,
    #[serde(default)]
    pub application_protocols: Vec<String>,
}

/// `envoy.config.listener.v3.FilterChain`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterChainSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub filter_chain_match: Option<FilterChainMatchSpec>,
    #[serde(default)]
    pub filters: Vec<NetworkFilterSpec>,
    #[serde(default)]
    pub transport_socket: Option<TransportSocketSpec>,
}

/// `envoy.config.listener.v3.Listener`
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerSpec {
    #[serde(default)]
    pub name: String,
    pub address: AddressSpec,
    #[serde(default)]
    pub listener_filters: Vec<ListenerFilterSpec>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub listener_filters_timeout: Option<Duration>,
    #[serde(default)]
    pub continue_on_listener_filters_timeout: bool,
    #[serde(default)]
    pub filter_chains: Vec<FilterChainSpec>,
    #[serde(default)]
    pub per_connection_buffer_limit_bytes: Option<u32>,
    #[serde(default)]
    pub stat_prefix: String,
    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

impl ListenerSpec {
    pub fn from_json(raw: &Value) -> Result<Self> {
        serde_json::from_value(raw.clone()).map_err(|e| Error::json("invalid listener", e))
    }

    /// Convert into an envoy-types Listener named `name`.
    pub fn to_envoy(&self, name: &str) -> Result<Listener> {
        reject_unsupported("Listener", &self.unsupported)?;
        let listener_filters = self
            .listener_filters
            .iter()
            .map(|lf| -> Result<ListenerFilter> {
                let typed_config = lf
                    .typed_config
                    .as_ref()
                    .map(json_to_any)
                    .transpose()
                    .with_context(|| format!("invalid listener filter {}", lf.name))?;
                Ok(ListenerFilter {
                    name: lf.name.clone(),
                    config_type: typed_config.map(listener_filter::ConfigType::TypedConfig),
                    ..Default::default()
                })
            })
            .collect::<Result<_>>()?;

        let filter_chains = self
            .filter_chains
            .iter()
            .map(FilterChainSpec::to_envoy)
            .collect::<Result<_>>()?;

        Ok(Listener {
            name: name.to_string(),
            address: Some(self.address.to_envoy()?),
            listener_filters,
            listener_filters_timeout: self.listener_filters_timeout,
            continue_on_listener_filters_timeout: self.continue_on_listener_filters_timeout,
            filter_chains,
            per_connection_buffer_limit_bytes: self
                .per_connection_buffer_limit_bytes
                .map(|value| UInt32Value { value }),
            stat_prefix: self.stat_prefix.clone(),
            ..Default::default()
        })
    }
}

impl FilterChainSpec {
    pub fn to_envoy(&self) -> Result<FilterChain> {
        let filters = self
            .filters
            .iter()
            .map(|f| -> Result<Filter> {
                let typed_config = f
                    .typed_config
                    .as_ref()
                    .map(json_to_any)
                    .transpose()
                    .with_context(|| format!("invalid network filter {}", f.name))?;
                Ok(Filter {
                    name: f.name.clone(),
                    config_type: typed_config.map(filter::ConfigType::TypedConfig),
                })
            })
            .collect::<Result<_>>()?;

        Ok(FilterChain {
            name: self.name.clone(),
            filter_chain_match: self.filter_chain_match.as_ref().map(|m| FilterChainMatch {
                destination_port: m.destination_port.map(|value| UInt32Value { value }),
                server_names: m.server_names.clone(),
                transport_protocol: m.transport_protocol.clone(),
                application_protocols: m.application_protocols.clone(),
                ..Default::default()
            }),
            filters,
            transport_socket: self
                .transport_socket
                .as_ref()
                .map(TransportSocketSpec::to_envoy)
                .transpose()?,
            ..Default::default()
        })
    }
}

/// Whether the listener terminates TLS, i.e. runs a TLS inspector listener filter.
pub fn is_tls_listener(listener: &Listener) -> bool {
    listener.listener_filters.iter().any(|lf| match &lf.config_type {
        Some(listener_filter::ConfigType::TypedConfig(any)) => {
            effective_type_url(any) == TLS_INSPECTOR_TYPE_URL
        }
        _ => lf.name == TLS_INSPECTOR_FILTER_NAME,
    })
}

/// Port the listener binds, when it binds a socket address.
pub fn listener_port(listener: &Listener) -> Option<u32> {
    match listener.address.as_ref()?.address.as_ref()? {
        AddressType::SocketAddress(socket) => match socket.port_specifier {
            Some(socket_address::PortSpecifier::PortValue(port)) => Some(port),
            _ => None,
        },
        _ => None,
    }
}
