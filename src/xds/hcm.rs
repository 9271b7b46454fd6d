//! HTTP connection manager and network filter configuration.
//!
//! Serde mirrors of the HCM family (HTTP filters, access logs, tracing,
//! upgrade configs), the TCP proxy and the small natively encoded extensions
//! (router, TLS inspector, file access log).

use crate::errors::{Error, Result, ResultExt};
use crate::xds::duration;
use crate::xds::route::RouteConfigurationSpec;
use crate::xds::typed_config::json_to_any;
use crate::xds::{reject_unsupported, UnsupportedFields};
use envoy_types::pb::envoy::config::accesslog::v3::{access_log, AccessLog};
use envoy_types::pb::envoy::config::core::v3::{
    config_source::ConfigSourceSpecifier, data_source, substitution_format_string,
    AggregatedConfigSource, ApiVersion, ConfigSource, DataSource, HttpProtocolOptions,
    SubstitutionFormatString,
};
use envoy_types::pb::envoy::config::trace::v3::tracing::{http as tracing_http, Http as HttpTracing};
use envoy_types::pb::envoy::extensions::access_loggers::file::v3::{
    file_access_log, FileAccessLog,
};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use envoy_types::pb::envoy::extensions::filters::listener::tls_inspector::v3::TlsInspector;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{self, CodecType, RouteSpecifier},
    http_filter, HttpConnectionManager, HttpFilter, Rds,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{tcp_proxy, TcpProxy};
use envoy_types::pb::envoy::r#type::v3::Percent;
use envoy_types::pb::google::protobuf::{BoolValue, Duration, UInt32Value};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Config source pointing at the aggregated discovery stream, API v3.
pub fn ads_config_source() -> ConfigSource {
    ConfigSource {
        resource_api_version: ApiVersion::V3 as i32,
        config_source_specifier: Some(ConfigSourceSpecifier::Ads(AggregatedConfigSource::default())),
        ..Default::default()
    }
}

pub(crate) fn bool_value(value: Option<bool>) -> Option<BoolValue> {
    value.map(|value| BoolValue { value })
}

pub(crate) fn u32_value(value: Option<u32>) -> Option<UInt32Value> {
    value.map(|value| UInt32Value { value })
}

/// `envoy.config.core.v3.ConfigSource`; only ADS sources are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSourceSpec {
    #[serde(default)]
    pub ads: Option<Map<String, Value>>,
    #[serde(default)]
    pub resource_api_version: Option<String>,
}

impl ConfigSourceSpec {
    pub fn to_envoy(&self) -> Result<ConfigSource> {
        if self.ads.is_none() {
            return Err(Error::invalid("only ads config sources are supported"));
        }
        match self.resource_api_version.as_deref() {
            None | Some("V3") => Ok(ads_config_source()),
            Some(other) => Err(Error::invalid(format!("unsupported resource_api_version {}", other))),
        }
    }
}

/// One entry of an HCM `http_filters` list.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpFilterSpec {
    pub name: String,
    #[serde(default)]
    pub typed_config: Option<Value>,
    #[serde(default)]
    pub is_optional: bool,
    #[serde(default)]
    pub disabled: bool,
}

impl HttpFilterSpec {
    pub fn from_json(raw: &Value) -> Result<Self> {
        serde_json::from_value(raw.clone()).map_err(|e| Error::json("invalid http filter", e))
    }

    pub fn to_envoy(&self) -> Result<HttpFilter> {
        let typed_config = self
            .typed_config
            .as_ref()
            .ok_or_else(|| Error::invalid(format!("http filter {} is missing typed_config", self.name)))?;
        let any = json_to_any(typed_config)
            .with_context(|| format!("invalid http filter {}", self.name))?;

        Ok(HttpFilter {
            name: self.name.clone(),
            is_optional: self.is_optional,
            disabled: self.disabled,
            config_type: Some(http_filter::ConfigType::TypedConfig(any)),
        })
    }
}

/// `envoy.config.accesslog.v3.AccessLog`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessLogSpec {
    #[serde(default)]
    pub name: String,
    pub typed_config: Value,
}

impl AccessLogSpec {
    pub fn from_json(raw: &Value) -> Result<Self> {
        serde_json::from_value(raw.clone()).map_err(|e| Error::json("invalid access log config", e))
    }

    pub fn to_envoy(&self) -> Result<AccessLog> {
        let any = json_to_any(&self.typed_config).context("invalid access log typed_config")?;
        Ok(AccessLog {
            name: self.name.clone(),
            filter: None,
            config_type: Some(access_log::ConfigType::TypedConfig(any)),
        })
    }
}

/// File access logger body.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileAccessLogSpec {
    pub path: String,
    #[serde(default)]
    pub log_format: Option<LogFormatSpec>,
}

/// `envoy.config.core.v3.SubstitutionFormatString`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogFormatSpec {
    #[serde(default)]
    pub text_format: Option<String>,
    #[serde(default)]
    pub text_format_source: Option<InlineStringSpec>,
    #[serde(default)]
    pub json_format: Option<Value>,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub omit_empty_values: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InlineStringSpec {
    pub inline_string: String,
}

impl FileAccessLogSpec {
    pub fn to_envoy(&self) -> Result<FileAccessLog> {
        if self.path.is_empty() {
            return Err(Error::invalid_field("file access log path cannot be empty", "path"));
        }

        let access_log_format = self
            .log_format
            .as_ref()
            .map(|format| format.to_envoy().map(file_access_log::AccessLogFormat::LogFormat))
            .transpose()?;

        Ok(FileAccessLog { path: self.path.clone(), access_log_format })
    }
}

impl LogFormatSpec {
    fn to_envoy(&self) -> Result<SubstitutionFormatString> {
        let format = match (&self.text_format, &self.text_format_source, &self.json_format) {
            (Some(text), None, None) => substitution_format_string::Format::TextFormat(text.clone()),
            (None, Some(source), None) => {
                substitution_format_string::Format::TextFormatSource(DataSource {
                    specifier: Some(data_source::Specifier::InlineString(
                        source.inline_string.clone(),
                    )),
                    ..Default::default()
                })
            }
            (None, None, Some(json)) => substitution_format_string::Format::JsonFormat(
                crate::xds::typed_config::json_to_struct(json)?,
            ),
            _ => {
                return Err(Error::invalid(
                    "log_format requires exactly one of text_format, text_format_source, json_format",
                ))
            }
        };

        Ok(SubstitutionFormatString {
            format: Some(format),
            content_type: self.content_type.clone(),
            omit_empty_values: self.omit_empty_values,
            ..Default::default()
        })
    }
}

/// `envoy.type.v3.Percent`
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PercentSpec {
    #[serde(default)]
    pub value: f64,
}

impl PercentSpec {
    pub(crate) fn to_envoy(self) -> Result<Percent> {
        if !(0.0..=100.0).contains(&self.value) {
            return Err(Error::invalid(format!("percent {} out of range", self.value)));
        }
        Ok(Percent { value: self.value })
    }
}

/// HCM `tracing` block
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TracingSpec {
    #[serde(default)]
    pub provider: Option<TracingProviderSpec>,
    #[serde(default)]
    pub client_sampling: Option<PercentSpec>,
    #[serde(default)]
    pub random_sampling: Option<PercentSpec>,
    #[serde(default)]
    pub overall_sampling: Option<PercentSpec>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub max_path_tag_length: Option<u32>,
    #[serde(default)]
    pub spawn_upstream_span: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TracingProviderSpec {
    pub name: String,
    pub typed_config: Value,
}

impl TracingSpec {
    pub fn from_json(raw: &Value) -> Result<Self> {
        serde_json::from_value(raw.clone()).map_err(|e| Error::json("invalid tracing config", e))
    }

    pub fn to_envoy(&self) -> Result<http_connection_manager::Tracing> {
        let provider = self
            .provider
            .as_ref()
            .map(|provider| -> Result<HttpTracing> {
                if provider.name.is_empty() {
                    return Err(Error::invalid("tracing provider name cannot be empty"));
                }
                Ok(HttpTracing {
                    name: provider.name.clone(),
                    config_type: Some(tracing_http::ConfigType::TypedConfig(
                        json_to_any(&provider.typed_config)
                            .context("invalid tracing provider typed_config")?,
                    )),
                })
            })
            .transpose()?;

        Ok(http_connection_manager::Tracing {
            provider,
            client_sampling: self.client_sampling.map(PercentSpec::to_envoy).transpose()?,
            random_sampling: self.random_sampling.map(PercentSpec::to_envoy).transpose()?,
            overall_sampling: self.overall_sampling.map(PercentSpec::to_envoy).transpose()?,
            verbose: self.verbose,
            max_path_tag_length: u32_value(self.max_path_tag_length),
            spawn_upstream_span: bool_value(self.spawn_upstream_span),
            ..Default::default()
        })
    }
}

/// HCM `upgrade_configs` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpgradeConfigSpec {
    pub upgrade_type: String,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl UpgradeConfigSpec {
    pub fn from_json(raw: &Value) -> Result<Self> {
        serde_json::from_value(raw.clone()).map_err(|e| Error::json("invalid upgrade config", e))
    }

    pub fn to_envoy(&self) -> Result<http_connection_manager::UpgradeConfig> {
        if self.upgrade_type.is_empty() {
            return Err(Error::invalid_field("upgrade_type cannot be empty", "upgrade_type"));
        }
        Ok(http_connection_manager::UpgradeConfig {
            upgrade_type: self.upgrade_type.clone(),
            filters: Vec::new(),
            enabled: bool_value(self.enabled),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RdsSpec {
    pub route_config_name: String,
    #[serde(default)]
    pub config_source: Option<ConfigSourceSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpProtocolOptionsSpec {
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub idle_timeout: Option<Duration>,
    #[serde(default)]
    pub max_headers_count: Option<u32>,
}

/// `envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager`
#[derive(Debug, Clone, Deserialize)]
pub struct HcmSpec {
    #[serde(default)]
    pub stat_prefix: String,
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub rds: Option<RdsSpec>,
    #[serde(default)]
    pub route_config: Option<RouteConfigurationSpec>,
    #[serde(default)]
    pub http_filters: Vec<HttpFilterSpec>,
    #[serde(default)]
    pub access_log: Vec<AccessLogSpec>,
    #[serde(default)]
    pub tracing: Option<TracingSpec>,
    #[serde(default)]
    pub use_remote_address: Option<bool>,
    #[serde(default)]
    pub xff_num_trusted_hops: u32,
    #[serde(default)]
    pub skip_xff_append: bool,
    #[serde(default)]
    pub upgrade_configs: Vec<UpgradeConfigSpec>,
    #[serde(default)]
    pub server_name: String,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub stream_idle_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub request_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub drain_timeout: Option<Duration>,
    #[serde(default)]
    pub generate_request_id: Option<bool>,
    #[serde(default)]
    pub normalize_path: Option<bool>,
    #[serde(default)]
    pub merge_slashes: bool,
    #[serde(default)]
    pub common_http_protocol_options: Option<HttpProtocolOptionsSpec>,
    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

impl HcmSpec {
    pub fn to_envoy(&self) -> Result<HttpConnectionManager> {
        reject_unsupported("HttpConnectionManager", &self.unsupported)?;
        let route_specifier = match (&self.rds, &self.route_config) {
            (Some(rds), None) => RouteSpecifier::Rds(Rds {
                route_config_name: rds.route_config_name.clone(),
                config_source: Some(match &rds.config_source {
                    Some(source) => source.to_envoy()?,
                    None => ads_config_source(),
                }),
            }),
            (None, Some(route_config)) => RouteSpecifier::RouteConfig(route_config.to_envoy()?),
            _ => {
                return Err(Error::invalid(
                    "HttpConnectionManager requires exactly one of rds or route_config",
                ))
            }
        };

        let codec_type = match self.codec_type.as_deref() {
            None => CodecType::Auto,
            Some(name) => CodecType::from_str_name(name)
                .ok_or_else(|| Error::invalid(format!("unknown codec_type {}", name)))?,
        };

        Ok(HttpConnectionManager {
            codec_type: codec_type as i32,
            stat_prefix: self.stat_prefix.clone(),
            route_specifier: Some(route_specifier),
            http_filters: self
                .http_filters
                .iter()
                .map(HttpFilterSpec::to_envoy)
                .collect::<Result<Vec<_>>>()?,
            access_log: self.access_log.iter().map(AccessLogSpec::to_envoy).collect::<Result<_>>()?,
            tracing: self.tracing.as_ref().map(TracingSpec::to_envoy).transpose()?,
            use_remote_address: bool_value(self.use_remote_address),
            xff_num_trusted_hops: self.xff_num_trusted_hops,
            skip_xff_append: self.skip_xff_append,
            upgrade_configs: self
                .upgrade_configs
                .iter()
                .map(UpgradeConfigSpec::to_envoy)
                .collect::<Result<_>>()?,
            server_name: self.server_name.clone(),
            stream_idle_timeout: self.stream_idle_timeout,
            request_timeout: self.request_timeout,
            drain_timeout: self.drain_timeout,
            generate_request_id: bool_value(self.generate_request_id),
            normalize_path: bool_value(self.normalize_path),
            merge_slashes: self.merge_slashes,
            common_http_protocol_options: self.common_http_protocol_options.as_ref().map(|opts| {
                HttpProtocolOptions {
                    idle_timeout: opts.idle_timeout,
                    max_headers_count: u32_value(opts.max_headers_count),
                    ..Default::default()
                }
            }),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpWeightedClustersSpec {
    pub clusters: Vec<TcpClusterWeightSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpClusterWeightSpec {
    pub name: String,
    #[serde(default)]
    pub weight: u32,
}

/// `envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpProxySpec {
    #[serde(default)]
    pub stat_prefix: String,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub weighted_clusters: Option<TcpWeightedClustersSpec>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub idle_timeout: Option<Duration>,
    #[serde(default)]
    pub access_log: Vec<AccessLogSpec>,
    #[serde(default)]
    pub max_connect_attempts: Option<u32>,
}

impl TcpProxySpec {
    pub fn to_envoy(&self) -> Result<TcpProxy> {
        let cluster_specifier = match (&self.cluster, &self.weighted_clusters) {
            (Some(cluster), None) => tcp_proxy::ClusterSpecifier::Cluster(cluster.clone()),
            (None, Some(weighted)) => {
                tcp_proxy::ClusterSpecifier::WeightedClusters(tcp_proxy::WeightedCluster {
                    clusters: weighted
                        .clusters
                        .iter()
                        .map(|c| tcp_proxy::weighted_cluster::ClusterWeight {
                            name: c.name.clone(),
                            weight: c.weight,
                            ..Default::default()
                        })
                        .collect(),
                })
            }
            _ => {
                return Err(Error::invalid(
                    "TcpProxy requires exactly one of cluster or weighted_clusters",
                ))
            }
        };

        Ok(TcpProxy {
            stat_prefix: self.stat_prefix.clone(),
            cluster_specifier: Some(cluster_specifier),
            idle_timeout: self.idle_timeout,
            access_log: self.access_log.iter().map(AccessLogSpec::to_envoy).collect::<Result<_>>()?,
            max_connect_attempts: u32_value(self.max_connect_attempts),
            ..Default::default()
        })
    }
}

/// `envoy.extensions.filters.http.router.v3.Router`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterSpec {
    #[serde(default)]
    pub dynamic_stats: Option<bool>,
    #[serde(default)]
    pub start_child_span: bool,
    #[serde(default)]
    pub suppress_envoy_headers: bool,
}

impl RouterSpec {
    pub fn to_envoy(&self) -> Router {
        Router {
            dynamic_stats: bool_value(self.dynamic_stats),
            start_child_span: self.start_child_span,
            suppress_envoy_headers: self.suppress_envoy_headers,
            ..Default::default()
        }
    }
}

/// `envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsInspectorSpec {
    #[serde(default)]
    pub enable_ja3_fingerprinting: Option<bool>,
}

impl TlsInspectorSpec {
    pub fn to_envoy(&self) -> TlsInspector {
        TlsInspector {
            enable_ja3_fingerprinting: bool_value(self.enable_ja3_fingerprinting),
            ..Default::default()
        }
    }
}
