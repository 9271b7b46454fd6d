//! Cluster definitions in Envoy's v3 JSON shape.

use crate::errors::{Error, Result, ResultExt};
use crate::xds::duration;
use crate::xds::hcm::{bool_value, u32_value, ConfigSourceSpec, PercentSpec};
use crate::xds::listener::{AddressSpec, TransportSocketSpec};
use crate::xds::route::{header_options, HeaderValueOptionSpec};
use crate::xds::typed_config::json_to_any;
use crate::xds::{reject_unsupported, UnsupportedFields};
use base64::Engine;
use envoy_types::pb::envoy::config::cluster::v3::{
    circuit_breakers, cluster, CircuitBreakers, Cluster, OutlierDetection,
};
use envoy_types::pb::envoy::config::core::v3::{
    health_check::{self, payload, HealthChecker},
    HealthCheck, RequestMethod, RoutingPriority,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint::HostIdentifier, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::envoy::r#type::v3::{CodecClientType, Int64Range};
use envoy_types::pb::google::protobuf::{Duration, UInt32Value};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// `envoy.config.cluster.v3.Cluster`
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub discovery_type: Option<String>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub connect_timeout: Option<Duration>,
    #[serde(default)]
    pub lb_policy: Option<String>,
    #[serde(default)]
    pub dns_lookup_family: Option<String>,
    #[serde(default)]
    pub load_assignment: Option<LoadAssignmentSpec>,
    #[serde(default)]
    pub eds_cluster_config: Option<EdsClusterConfigSpec>,
    #[serde(default)]
    pub transport_socket: Option<TransportSocketSpec>,
    #[serde(default)]
    pub typed_extension_protocol_options: BTreeMap<String, Value>,
    #[serde(default)]
    pub per_connection_buffer_limit_bytes: Option<u32>,
    #[serde(default)]
    pub health_checks: Vec<HealthCheckSpec>,
    #[serde(default)]
    pub circuit_breakers: Option<CircuitBreakersSpec>,
    #[serde(default)]
    pub outlier_detection: Option<OutlierDetectionSpec>,
    #[serde(default)]
    pub common_lb_config: Option<CommonLbConfigSpec>,
    #[serde(default)]
    pub ignore_health_on_host_removal: bool,
    #[serde(default)]
    pub close_connections_on_host_health_failure: bool,
    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

/// `envoy.config.core.v3.HealthCheck`
#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckSpec {
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub timeout: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub interval: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub initial_jitter: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub interval_jitter: Option<Duration>,
    #[serde(default)]
    pub interval_jitter_percent: u32,
    #[serde(default)]
    pub unhealthy_threshold: Option<u32>,
    #[serde(default)]
    pub healthy_threshold: Option<u32>,
    #[serde(default)]
    pub reuse_connection: Option<bool>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub no_traffic_interval: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub unhealthy_interval: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub unhealthy_edge_interval: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub healthy_edge_interval: Option<Duration>,
    #[serde(default)]
    pub always_log_health_check_failures: bool,
    #[serde(default)]
    pub http_health_check: Option<HttpHealthCheckSpec>,
    #[serde(default)]
    pub tcp_health_check: Option<TcpHealthCheckSpec>,
    #[serde(default)]
    pub grpc_health_check: Option<GrpcHealthCheckSpec>,
    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpHealthCheckSpec {
    #[serde(default)]
    pub host: String,
    pub path: String,
    #[serde(default)]
    pub request_headers_to_add: Vec<HeaderValueOptionSpec>,
    #[serde(default)]
    pub request_headers_to_remove: Vec<String>,
    #[serde(default)]
    pub expected_statuses: Vec<Int64RangeSpec>,
    #[serde(default)]
    pub retriable_statuses: Vec<Int64RangeSpec>,
    #[serde(default)]
    pub codec_client_type: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
}

/// `[start, end)` status range
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Int64RangeSpec {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpHealthCheckSpec {
    #[serde(default)]
    pub send: Option<PayloadSpec>,
    #[serde(default)]
    pub receive: Vec<PayloadSpec>,
}

/// Health check payload, either `text` (hex) or `binary` (base64)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadSpec {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub binary: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrpcHealthCheckSpec {
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub authority: String,
}

/// `envoy.config.cluster.v3.CircuitBreakers`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakersSpec {
    #[serde(default)]
    pub thresholds: Vec<ThresholdsSpec>,
    #[serde(default)]
    pub per_host_thresholds: Vec<ThresholdsSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdsSpec {
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub max_pending_requests: Option<u32>,
    #[serde(default)]
    pub max_requests: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub max_connection_pools: Option<u32>,
    #[serde(default)]
    pub track_remaining: bool,
}

/// `envoy.config.cluster.v3.OutlierDetection`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutlierDetectionSpec {
    #[serde(default)]
    pub consecutive_5xx: Option<u32>,
    #[serde(default)]
    pub consecutive_gateway_failure: Option<u32>,
    #[serde(default)]
    pub consecutive_local_origin_failure: Option<u32>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub interval: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub base_ejection_time: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub max_ejection_time: Option<Duration>,
    #[serde(default)]
    pub max_ejection_percent: Option<u32>,
    #[serde(default)]
    pub enforcing_consecutive_5xx: Option<u32>,
    #[serde(default)]
    pub enforcing_consecutive_gateway_failure: Option<u32>,
    #[serde(default)]
    pub enforcing_success_rate: Option<u32>,
    #[serde(default)]
    pub success_rate_minimum_hosts: Option<u32>,
    #[serde(default)]
    pub success_rate_request_volume: Option<u32>,
    #[serde(default)]
    pub success_rate_stdev_factor: Option<u32>,
    #[serde(default)]
    pub failure_percentage_threshold: Option<u32>,
    #[serde(default)]
    pub enforcing_failure_percentage: Option<u32>,
    #[serde(default)]
    pub failure_percentage_minimum_hosts: Option<u32>,
    #[serde(default)]
    pub failure_percentage_request_volume: Option<u32>,
    #[serde(default)]
    pub split_external_local_origin_errors: bool,
    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

/// `envoy.config.cluster.v3.Cluster.CommonLbConfig`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommonLbConfigSpec {
    #[serde(default)]
    pub healthy_panic_threshold: Option<PercentSpec>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub update_merge_window: Option<Duration>,
    #[serde(default)]
    pub ignore_new_hosts_until_first_hc: bool,
    #[serde(default)]
    pub close_connections_on_host_set_change: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdsClusterConfigSpec {
    #[serde(default)]
    pub eds_config: Option<ConfigSourceSpec>,
    #[serde(default)]
    pub service_name: String,
}

/// `envoy.config.endpoint.v3.ClusterLoadAssignment`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadAssignmentSpec {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub endpoints: Vec<LocalityEndpointsSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalityEndpointsSpec {
    #[serde(default)]
    pub lb_endpoints: Vec<LbEndpointSpec>,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub load_balancing_weight: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LbEndpointSpec {
    pub endpoint: EndpointSpec,
    #[serde(default)]
    pub load_balancing_weight: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSpec {
    pub address: AddressSpec,
    #[serde(default)]
    pub hostname: String,
}

impl ClusterSpec {
    pub fn from_json(raw: &Value) -> Result<Self> {
        serde_json::from_value(raw.clone()).map_err(|e| Error::json("invalid cluster", e))
    }

    /// Convert into an envoy-types Cluster.
    pub fn to_envoy(&self) -> Result<Cluster> {
        reject_unsupported("Cluster", &self.unsupported)?;

        let discovery_type = match self.discovery_type.as_deref() {
            None => None,
            Some(name) => Some(cluster::ClusterDiscoveryType::Type(
                cluster::DiscoveryType::from_str_name(name)
                    .ok_or_else(|| Error::invalid(format!("unknown cluster type {}", name)))?
                    as i32,
            )),
        };

        let lb_policy = match self.lb_policy.as_deref() {
            None => cluster::LbPolicy::RoundRobin,
            Some(name) => cluster::LbPolicy::from_str_name(name)
                .ok_or_else(|| Error::invalid(format!("unknown lb_policy {}", name)))?,
        };

        let dns_lookup_family = match self.dns_lookup_family.as_deref() {
            None => cluster::DnsLookupFamily::Auto,
            Some(name) => cluster::DnsLookupFamily::from_str_name(name)
                .ok_or_else(|| Error::invalid(format!("unknown dns_lookup_family {}", name)))?,
        };

        let typed_extension_protocol_options = self
            .typed_extension_protocol_options
            .iter()
            .map(|(name, config)| {
                json_to_any(config)
                    .with_context(|| format!("invalid typed_extension_protocol_options {}", name))
                    .map(|any| (name.clone(), any))
            })
            .collect::<Result<_>>()?;

        Ok(Cluster {
            name: self.name.clone(),
            cluster_discovery_type: discovery_type,
            connect_timeout: self.connect_timeout,
            lb_policy: lb_policy as i32,
            dns_lookup_family: dns_lookup_family as i32,
            load_assignment: self
                .load_assignment
                .as_ref()
                .map(|assignment| assignment.to_envoy(&self.name))
                .transpose()?,
            eds_cluster_config: self
                .eds_cluster_config
                .as_ref()
                .map(|eds| -> Result<cluster::EdsClusterConfig> {
                    Ok(cluster::EdsClusterConfig {
                        eds_config: eds.eds_config.as_ref().map(ConfigSourceSpec::to_envoy).transpose()?,
                        service_name: eds.service_name.clone(),
                    })
                })
                .transpose()?,
            transport_socket: self
                .transport_socket
                .as_ref()
                .map(TransportSocketSpec::to_envoy)
                .transpose()?,
            typed_extension_protocol_options,
            per_connection_buffer_limit_bytes: self
                .per_connection_buffer_limit_bytes
                .map(|value| UInt32Value { value }),
            health_checks: self
                .health_checks
                .iter()
                .enumerate()
                .map(|(i, hc)| hc.to_envoy().with_context(|| format!("invalid health_checks[{}]", i)))
                .collect::<Result<_>>()?,
            circuit_breakers: self
                .circuit_breakers
                .as_ref()
                .map(CircuitBreakersSpec::to_envoy)
                .transpose()?,
            outlier_detection: self
                .outlier_detection
                .as_ref()
                .map(OutlierDetectionSpec::to_envoy)
                .transpose()?,
            common_lb_config: self
                .common_lb_config
                .as_ref()
                .map(CommonLbConfigSpec::to_envoy)
                .transpose()?,
            ignore_health_on_host_removal: self.ignore_health_on_host_removal,
            close_connections_on_host_health_failure: self.close_connections_on_host_health_failure,
            ..Default::default()
        })
    }
}

impl HealthCheckSpec {
    pub fn to_envoy(&self) -> Result<HealthCheck> {
        reject_unsupported("HealthCheck", &self.unsupported)?;
        if self.timeout.is_none() || self.interval.is_none() {
            return Err(Error::invalid("health check requires timeout and interval"));
        }

        let checkers = [
            self.http_health_check
                .as_ref()
                .map(|http| http.to_envoy().map(HealthChecker::HttpHealthCheck)),
            self.tcp_health_check
                .as_ref()
                .map(|tcp| tcp.to_envoy().map(HealthChecker::TcpHealthCheck)),
            self.grpc_health_check.as_ref().map(|grpc| {
                Ok(HealthChecker::GrpcHealthCheck(health_check::GrpcHealthCheck {
                    service_name: grpc.service_name.clone(),
                    authority: grpc.authority.clone(),
                    ..Default::default()
                }))
            }),
        ];
        let mut set = checkers.into_iter().flatten();
        let health_checker = set.next().ok_or_else(|| {
            Error::invalid("health check requires one of http_health_check, tcp_health_check, grpc_health_check")
        })??;
        if set.next().is_some() {
            return Err(Error::invalid("health check has more than one health checker"));
        }

        Ok(HealthCheck {
            timeout: self.timeout,
            interval: self.interval,
            initial_jitter: self.initial_jitter,
            interval_jitter: self.interval_jitter,
            interval_jitter_percent: self.interval_jitter_percent,
            unhealthy_threshold: u32_value(self.unhealthy_threshold),
            healthy_threshold: u32_value(self.healthy_threshold),
            reuse_connection: bool_value(self.reuse_connection),
            no_traffic_interval: self.no_traffic_interval,
            unhealthy_interval: self.unhealthy_interval,
            unhealthy_edge_interval: self.unhealthy_edge_interval,
            healthy_edge_interval: self.healthy_edge_interval,
            always_log_health_check_failures: self.always_log_health_check_failures,
            health_checker: Some(health_checker),
            ..Default::default()
        })
    }
}

fn status_ranges(ranges: &[Int64RangeSpec]) -> Result<Vec<Int64Range>> {
    ranges
        .iter()
        .map(|range| {
            if !(100..=600).contains(&range.start) || range.end <= range.start || range.end > 600 {
                return Err(Error::invalid(format!(
                    "invalid status range [{}, {})",
                    range.start, range.end
                )));
            }
            Ok(Int64Range { start: range.start, end: range.end })
        })
        .collect()
}

impl HttpHealthCheckSpec {
    fn to_envoy(&self) -> Result<health_check::HttpHealthCheck> {
        if self.path.is_empty() {
            return Err(Error::invalid_field("http health check path cannot be empty", "path"));
        }

        let codec_client_type = match self.codec_client_type.as_deref() {
            None => CodecClientType::Http1,
            Some(name) => CodecClientType::from_str_name(name)
                .ok_or_else(|| Error::invalid(format!("unknown codec_client_type {}", name)))?,
        };
        let method = match self.method.as_deref() {
            None => RequestMethod::MethodUnspecified,
            Some(name) => RequestMethod::from_str_name(name)
                .ok_or_else(|| Error::invalid(format!("unknown health check method {}", name)))?,
        };

        Ok(health_check::HttpHealthCheck {
            host: self.host.clone(),
            path: self.path.clone(),
            request_headers_to_add: header_options(&self.request_headers_to_add)?,
            request_headers_to_remove: self.request_headers_to_remove.clone(),
            expected_statuses: status_ranges(&self.expected_statuses)?,
            retriable_statuses: status_ranges(&self.retriable_statuses)?,
            codec_client_type: codec_client_type as i32,
            method: method as i32,
            ..Default::default()
        })
    }
}

impl TcpHealthCheckSpec {
    fn to_envoy(&self) -> Result<health_check::TcpHealthCheck> {
        Ok(health_check::TcpHealthCheck {
            send: self.send.as_ref().map(PayloadSpec::to_envoy).transpose()?,
            receive: self.receive.iter().map(PayloadSpec::to_envoy).collect::<Result<_>>()?,
            ..Default::default()
        })
    }
}

impl PayloadSpec {
    fn to_envoy(&self) -> Result<health_check::Payload> {
        let payload = match (&self.text, &self.binary) {
            (Some(text), None) => payload::Payload::Text(text.clone()),
            (None, Some(binary)) => payload::Payload::Binary(
                base64::engine::general_purpose::STANDARD
                    .decode(binary)
                    .map_err(|e| Error::invalid(format!("invalid binary payload: {}", e)))?,
            ),
            _ => return Err(Error::invalid("payload requires exactly one of text or binary")),
        };
        Ok(health_check::Payload { payload: Some(payload) })
    }
}

impl CircuitBreakersSpec {
    fn to_envoy(&self) -> Result<CircuitBreakers> {
        Ok(CircuitBreakers {
            thresholds: self.thresholds.iter().map(ThresholdsSpec::to_envoy).collect::<Result<_>>()?,
            per_host_thresholds: self
                .per_host_thresholds
                .iter()
                .map(ThresholdsSpec::to_envoy)
                .collect::<Result<_>>()?,
        })
    }
}

impl ThresholdsSpec {
    fn to_envoy(&self) -> Result<circuit_breakers::Thresholds> {
        let priority = match self.priority.as_deref() {
            None => RoutingPriority::Default,
            Some(name) => RoutingPriority::from_str_name(name)
                .ok_or_else(|| Error::invalid(format!("unknown routing priority {}", name)))?,
        };

        Ok(circuit_breakers::Thresholds {
            priority: priority as i32,
            max_connections: u32_value(self.max_connections),
            max_pending_requests: u32_value(self.max_pending_requests),
            max_requests: u32_value(self.max_requests),
            max_retries: u32_value(self.max_retries),
            max_connection_pools: u32_value(self.max_connection_pools),
            track_remaining: self.track_remaining,
            ..Default::default()
        })
    }
}

impl OutlierDetectionSpec {
    fn to_envoy(&self) -> Result<OutlierDetection> {
        reject_unsupported("OutlierDetection", &self.unsupported)?;
        let percents = [
            ("max_ejection_percent", self.max_ejection_percent),
            ("enforcing_consecutive_5xx", self.enforcing_consecutive_5xx),
            ("enforcing_consecutive_gateway_failure", self.enforcing_consecutive_gateway_failure),
            ("enforcing_success_rate", self.enforcing_success_rate),
            ("failure_percentage_threshold", self.failure_percentage_threshold),
            ("enforcing_failure_percentage", self.enforcing_failure_percentage),
        ];
        if let Some((field, value)) = percents
            .into_iter()
            .find_map(|(field, value)| value.filter(|v| *v > 100).map(|v| (field, v)))
        {
            return Err(Error::invalid_field(format!("{} {} exceeds 100", field, value), field));
        }

        Ok(OutlierDetection {
            consecutive_5xx: u32_value(self.consecutive_5xx),
            consecutive_gateway_failure: u32_value(self.consecutive_gateway_failure),
            consecutive_local_origin_failure: u32_value(self.consecutive_local_origin_failure),
            interval: self.interval,
            base_ejection_time: self.base_ejection_time,
            max_ejection_time: self.max_ejection_time,
            max_ejection_percent: u32_value(self.max_ejection_percent),
            enforcing_consecutive_5xx: u32_value(self.enforcing_consecutive_5xx),
            enforcing_consecutive_gateway_failure: u32_value(self.enforcing_consecutive_gateway_failure),
            enforcing_success_rate: u32_value(self.enforcing_success_rate),
            success_rate_minimum_hosts: u32_value(self.success_rate_minimum_hosts),
            success_rate_request_volume: u32_value(self.success_rate_request_volume),
            success_rate_stdev_factor: u32_value(self.success_rate_stdev_factor),
            failure_percentage_threshold: u32_value(self.failure_percentage_threshold),
            enforcing_failure_percentage: u32_value(self.enforcing_failure_percentage),
            failure_percentage_minimum_hosts: u32_value(self.failure_percentage_minimum_hosts),
            failure_percentage_request_volume: u32_value(self.failure_percentage_request_volume),
            split_external_local_origin_errors: self.split_external_local_origin_errors,
            ..Default::default()
        })
    }
}

impl CommonLbConfigSpec {
    fn to_envoy(&self) -> Result<cluster::CommonLbConfig> {
        Ok(cluster::CommonLbConfig {
            healthy_panic_threshold: self
                .healthy_panic_threshold
                .map(PercentSpec::to_envoy)
                .transpose()?,
            update_merge_window: self.update_merge_window,
            ignore_new_hosts_until_first_hc: self.ignore_new_hosts_until_first_hc,
            close_connections_on_host_set_change: self.close_connections_on_host_set_change,
            ..Default::default()
        })
    }
}

impl LoadAssignmentSpec {
    fn to_envoy(&self, cluster_name: &str) -> Result<ClusterLoadAssignment> {
        let endpoints = self
            .endpoints
            .iter()
            .map(|locality| -> Result<LocalityLbEndpoints> {
                let lb_endpoints = locality
                    .lb_endpoints
                    .iter()
                    .map(|lb| -> Result<LbEndpoint> {
                        Ok(LbEndpoint {
                            host_identifier: Some(HostIdentifier::Endpoint(Endpoint {
                                address: Some(lb.endpoint.address.to_envoy()?),
                                hostname: lb.endpoint.hostname.clone(),
                                ..Default::default()
                            })),
                            load_balancing_weight: lb
                                .load_balancing_weight
                                .map(|value| UInt32Value { value }),
                            ..Default::default()
                        })
                    })
                    .collect::<Result<_>>()?;

                Ok(LocalityLbEndpoints {
                    lb_endpoints,
                    priority: locality.priority,
                    load_balancing_weight: locality
                        .load_balancing_weight
                        .map(|value| UInt32Value { value }),
                    ..Default::default()
                })
            })
            .collect::<Result<_>>()?;

        let name = if self.cluster_name.is_empty() { cluster_name } else { &self.cluster_name };

        Ok(ClusterLoadAssignment {
            cluster_name: name.to_string(),
            endpoints,
            ..Default::default()
        })
    }
}
