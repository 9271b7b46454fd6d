//! Route configuration in Envoy's v3 JSON shape.
//!
//! Virtual hosts, routes, matchers and actions as they appear inside a
//! VirtualService, converted into `envoy-types` route messages.

use crate::errors::{Error, Result, ResultExt};
use crate::xds::duration;
use crate::xds::typed_config::json_to_any;
use crate::xds::{reject_unsupported, UnsupportedFields};
use envoy_types::pb::envoy::config::core::v3::{
    data_source, header_value_option::HeaderAppendAction, DataSource, HeaderValue,
    HeaderValueOption,
};
use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier, redirect_action, retry_policy, route, route_action,
    route_action::hash_policy, route_match::PathSpecifier, weighted_cluster::ClusterWeight,
    DirectResponseAction, HeaderMatcher, RedirectAction, RetryPolicy, Route, RouteAction,
    RouteConfiguration, RouteMatch, VirtualHost, WeightedCluster,
};
use envoy_types::pb::envoy::r#type::matcher::v3::{
    string_matcher::MatchPattern, RegexMatchAndSubstitute, RegexMatcher, StringMatcher,
};
use envoy_types::pb::google::protobuf::{Any, BoolValue, Duration, UInt32Value};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

fn per_filter_configs(configs: &BTreeMap<String, Value>) -> Result<HashMap<String, Any>> {
    configs
        .iter()
        .map(|(name, config)| {
            json_to_any(config)
                .with_context(|| format!("invalid typed_per_filter_config {}", name))
                .map(|any| (name.clone(), any))
        })
        .collect()
}

/// `envoy.config.route.v3.RouteConfiguration` (inline HCM route config)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfigurationSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub virtual_hosts: Vec<VirtualHostSpec>,
}

impl RouteConfigurationSpec {
    pub fn to_envoy(&self) -> Result<RouteConfiguration> {
        Ok(RouteConfiguration {
            name: self.name.clone(),
            virtual_hosts: self
                .virtual_hosts
                .iter()
                .map(VirtualHostSpec::to_envoy)
                .collect::<Result<_>>()?,
            ..Default::default()
        })
    }
}

/// `envoy.config.route.v3.VirtualHost`
#[derive(Debug, Clone, Deserialize)]
pub struct VirtualHostSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub typed_per_filter_config: BTreeMap<String, Value>,
    #[serde(default)]
    pub request_headers_to_add: Vec<HeaderValueOptionSpec>,
    #[serde(default)]
    pub response_headers_to_add: Vec<HeaderValueOptionSpec>,
    #[serde(default)]
    pub request_headers_to_remove: Vec<String>,
    #[serde(default)]
    pub response_headers_to_remove: Vec<String>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicySpec>,
    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

impl VirtualHostSpec {
    pub fn from_json(raw: &Value) -> Result<Self> {
        serde_json::from_value(raw.clone()).map_err(|e| Error::json("invalid virtual host", e))
    }

    pub fn to_envoy(&self) -> Result<VirtualHost> {
        reject_unsupported("VirtualHost", &self.unsupported)?;
        Ok(VirtualHost {
            name: self.name.clone(),
            domains: self.domains.clone(),
            routes: self.routes.iter().map(RouteSpec::to_envoy).collect::<Result<_>>()?,
            typed_per_filter_config: per_filter_configs(&self.typed_per_filter_config)?,
            request_headers_to_add: header_options(&self.request_headers_to_add)?,
            response_headers_to_add: header_options(&self.response_headers_to_add)?,
            request_headers_to_remove: self.request_headers_to_remove.clone(),
            response_headers_to_remove: self.response_headers_to_remove.clone(),
            retry_policy: self.retry_policy.as_ref().map(RetryPolicySpec::to_envoy).transpose()?,
            ..Default::default()
        })
    }
}

/// `envoy.config.route.v3.Route`
#[derive(Debug, Clone, Deserialize)]
pub struct RouteSpec {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "match")]
    pub route_match: RouteMatchSpec,
    #[serde(default)]
    pub route: Option<RouteActionSpec>,
    #[serde(default)]
    pub redirect: Option<RedirectSpec>,
    #[serde(default)]
    pub direct_response: Option<DirectResponseSpec>,
    #[serde(default)]
    pub typed_per_filter_config: BTreeMap<String, Value>,
    #[serde(default)]
    pub request_headers_to_add: Vec<HeaderValueOptionSpec>,
    #[serde(default)]
    pub response_headers_to_add: Vec<HeaderValueOptionSpec>,
    #[serde(default)]
    pub request_headers_to_remove: Vec<String>,
    #[serde(default)]
    pub response_headers_to_remove: Vec<String>,
    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

impl RouteSpec {
    pub fn from_json(raw: &Value) -> Result<Self> {
        serde_json::from_value(raw.clone()).map_err(|e| Error::json("invalid route", e))
    }

    pub fn to_envoy(&self) -> Result<Route> {
        reject_unsupported("Route", &self.unsupported)?;
        let action = match (&self.route, &self.redirect, &self.direct_response) {
            (Some(action), None, None) => route::Action::Route(action.to_envoy()?),
            (None, Some(redirect), None) => route::Action::Redirect(redirect.to_envoy()?),
            (None, None, Some(direct)) => route::Action::DirectResponse(direct.to_envoy()),
            _ => {
                return Err(Error::invalid(format!(
                    "route '{}' requires exactly one of route, redirect, direct_response",
                    self.name
                )))
            }
        };

        Ok(Route {
            name: self.name.clone(),
            r#match: Some(self.route_match.to_envoy()?),
            action: Some(action),
            typed_per_filter_config: per_filter_configs(&self.typed_per_filter_config)?,
            request_headers_to_add: header_options(&self.request_headers_to_add)?,
            response_headers_to_add: header_options(&self.response_headers_to_add)?,
            request_headers_to_remove: self.request_headers_to_remove.clone(),
            response_headers_to_remove: self.response_headers_to_remove.clone(),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexSpec {
    pub regex: String,
}

impl RegexSpec {
    fn to_envoy(&self) -> RegexMatcher {
        RegexMatcher { regex: self.regex.clone(), ..Default::default() }
    }
}

/// `envoy.config.route.v3.RouteMatch`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteMatchSpec {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub safe_regex: Option<RegexSpec>,
    #[serde(default)]
    pub case_sensitive: Option<bool>,
    #[serde(default)]
    pub headers: Vec<HeaderMatcherSpec>,
}

impl RouteMatchSpec {
    pub fn to_envoy(&self) -> Result<RouteMatch> {
        let path_specifier = match (&self.prefix, &self.path, &self.safe_regex) {
            (Some(prefix), None, None) => PathSpecifier::Prefix(prefix.clone()),
            (None, Some(path), None) => PathSpecifier::Path(path.clone()),
            (None, None, Some(regex)) => PathSpecifier::SafeRegex(regex.to_envoy()),
            _ => {
                return Err(Error::invalid(
                    "route match requires exactly one of prefix, path, safe_regex",
                ))
            }
        };

        Ok(RouteMatch {
            path_specifier: Some(path_specifier),
            case_sensitive: self.case_sensitive.map(|value| BoolValue { value }),
            headers: self.headers.iter().map(HeaderMatcherSpec::to_envoy).collect::<Result<_>>()?,
            ..Default::default()
        })
    }
}

/// `envoy.type.matcher.v3.StringMatcher`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StringMatcherSpec {
    #[serde(default)]
    pub exact: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default)]
    pub safe_regex: Option<RegexSpec>,
    #[serde(default)]
    pub ignore_case: bool,
}

impl StringMatcherSpec {
    pub fn to_envoy(&self) -> Result<StringMatcher> {
        let patterns = [
            self.exact.clone().map(MatchPattern::Exact),
            self.prefix.clone().map(MatchPattern::Prefix),
            self.suffix.clone().map(MatchPattern::Suffix),
            self.contains.clone().map(MatchPattern::Contains),
            self.safe_regex.as_ref().map(|r| MatchPattern::SafeRegex(r.to_envoy())),
        ];
        let mut set = patterns.into_iter().flatten();
        let pattern = set.next().ok_or_else(|| Error::invalid("string matcher has no pattern"))?;
        if set.next().is_some() {
            return Err(Error::invalid("string matcher has more than one pattern"));
        }

        Ok(StringMatcher { match_pattern: Some(pattern), ignore_case: self.ignore_case })
    }
}

/// `envoy.config.route.v3.HeaderMatcher`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderMatcherSpec {
    pub name: String,
    #[serde(default)]
    pub exact_match: Option<String>,
    #[serde(default)]
    pub prefix_match: Option<String>,
    #[serde(default)]
    pub suffix_match: Option<String>,
    #[serde(default)]
    pub contains_match: Option<String>,
    #[serde(default)]
    pub present_match: Option<bool>,
    #[serde(default)]
    pub safe_regex_match: Option<RegexSpec>,
    #[serde(default)]
    pub string_match: Option<StringMatcherSpec>,
    #[serde(default)]
    pub invert_match: bool,
    #[serde(default)]
    pub treat_missing_header_as_empty: bool,
}

impl HeaderMatcherSpec {
    #[allow(deprecated)]
    pub fn to_envoy(&self) -> Result<HeaderMatcher> {
        if self.name.is_empty() {
            return Err(Error::invalid_field("header matcher name cannot be empty", "name"));
        }

        let string_match = self.string_match.as_ref().map(StringMatcherSpec::to_envoy).transpose()?;
        let specifiers = [
            self.exact_match.clone().map(HeaderMatchSpecifier::ExactMatch),
            self.prefix_match.clone().map(HeaderMatchSpecifier::PrefixMatch),
            self.suffix_match.clone().map(HeaderMatchSpecifier::SuffixMatch),
            self.contains_match.clone().map(HeaderMatchSpecifier::ContainsMatch),
            self.present_match.map(HeaderMatchSpecifier::PresentMatch),
            self.safe_regex_match.as_ref().map(|r| HeaderMatchSpecifier::SafeRegexMatch(r.to_envoy())),
            string_match.map(HeaderMatchSpecifier::StringMatch),
        ];
        let mut set = specifiers.into_iter().flatten();
        let header_match_specifier = set.next();
        if set.next().is_some() {
            return Err(Error::invalid(format!(
                "header matcher '{}' has more than one match specifier",
                self.name
            )));
        }

        Ok(HeaderMatcher {
            name: self.name.clone(),
            header_match_specifier,
            invert_match: self.invert_match,
            treat_missing_header_as_empty: self.treat_missing_header_as_empty,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterWeightSpec {
    pub name: String,
    #[serde(default)]
    pub weight: Option<u32>,
    #[serde(default)]
    pub typed_per_filter_config: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightedClustersSpec {
    pub clusters: Vec<ClusterWeightSpec>,
    #[serde(default)]
    pub total_weight: Option<u32>,
}

/// `envoy.config.route.v3.RouteAction`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteActionSpec {
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub weighted_clusters: Option<WeightedClustersSpec>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub timeout: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub idle_timeout: Option<Duration>,
    #[serde(default)]
    pub prefix_rewrite: String,
    #[serde(default)]
    pub host_rewrite_literal: Option<String>,
    #[serde(default)]
    pub auto_host_rewrite: Option<bool>,
    #[serde(default)]
    pub regex_rewrite: Option<RegexRewriteSpec>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicySpec>,
    #[serde(default)]
    pub hash_policy: Vec<HashPolicySpec>,
    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

/// `envoy.type.matcher.v3.RegexMatchAndSubstitute`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexRewriteSpec {
    pub pattern: RegexSpec,
    #[serde(default)]
    pub substitution: String,
}

impl RegexRewriteSpec {
    fn to_envoy(&self) -> Result<RegexMatchAndSubstitute> {
        if self.pattern.regex.is_empty() {
            return Err(Error::invalid_field("regex_rewrite pattern cannot be empty", "regex_rewrite"));
        }
        Ok(RegexMatchAndSubstitute {
            pattern: Some(self.pattern.to_envoy()),
            substitution: self.substitution.clone(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryBackOffSpec {
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub base_interval: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub max_interval: Option<Duration>,
}

/// `envoy.config.route.v3.RetryPolicy`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryPolicySpec {
    #[serde(default)]
    pub retry_on: String,
    #[serde(default)]
    pub num_retries: Option<u32>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub per_try_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub per_try_idle_timeout: Option<Duration>,
    #[serde(default)]
    pub host_selection_retry_max_attempts: i64,
    #[serde(default)]
    pub retriable_status_codes: Vec<u32>,
    #[serde(default)]
    pub retry_back_off: Option<RetryBackOffSpec>,
    #[serde(default)]
    pub retriable_headers: Vec<HeaderMatcherSpec>,
    #[serde(default)]
    pub retriable_request_headers: Vec<HeaderMatcherSpec>,
    #[serde(flatten)]
    pub unsupported: UnsupportedFields,
}

impl RetryPolicySpec {
    pub fn to_envoy(&self) -> Result<RetryPolicy> {
        reject_unsupported("RetryPolicy", &self.unsupported)?;

        let retry_back_off = match &self.retry_back_off {
            None => None,
            Some(back_off) => {
                let base_interval = back_off.base_interval.ok_or_else(|| {
                    Error::invalid_field("retry_back_off requires base_interval", "retry_back_off")
                })?;
                Some(retry_policy::RetryBackOff {
                    base_interval: Some(base_interval),
                    max_interval: back_off.max_interval,
                })
            }
        };

        Ok(RetryPolicy {
            retry_on: self.retry_on.clone(),
            num_retries: self.num_retries.map(|value| UInt32Value { value }),
            per_try_timeout: self.per_try_timeout,
            per_try_idle_timeout: self.per_try_idle_timeout,
            host_selection_retry_max_attempts: self.host_selection_retry_max_attempts,
            retriable_status_codes: self.retriable_status_codes.clone(),
            retry_back_off,
            retriable_headers: self
                .retriable_headers
                .iter()
                .map(HeaderMatcherSpec::to_envoy)
                .collect::<Result<_>>()?,
            retriable_request_headers: self
                .retriable_request_headers
                .iter()
                .map(HeaderMatcherSpec::to_envoy)
                .collect::<Result<_>>()?,
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HashHeaderSpec {
    pub header_name: String,
    #[serde(default)]
    pub regex_rewrite: Option<RegexRewriteSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HashCookieSpec {
    pub name: String,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub ttl: Option<Duration>,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionPropertiesSpec {
    #[serde(default)]
    pub source_ip: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamedSpec {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterStateSpec {
    pub key: String,
}

/// `envoy.config.route.v3.RouteAction.HashPolicy`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HashPolicySpec {
    #[serde(default)]
    pub header: Option<HashHeaderSpec>,
    #[serde(default)]
    pub cookie: Option<HashCookieSpec>,
    #[serde(default)]
    pub connection_properties: Option<ConnectionPropertiesSpec>,
    #[serde(default)]
    pub query_parameter: Option<NamedSpec>,
    #[serde(default)]
    pub filter_state: Option<FilterStateSpec>,
    #[serde(default)]
    pub terminal: bool,
}

impl HashPolicySpec {
    pub fn to_envoy(&self) -> Result<route_action::HashPolicy> {
        use hash_policy::PolicySpecifier;

        let header = self
            .header
            .as_ref()
            .map(|h| -> Result<PolicySpecifier> {
                Ok(PolicySpecifier::Header(hash_policy::Header {
                    header_name: h.header_name.clone(),
                    regex_rewrite: h.regex_rewrite.as_ref().map(RegexRewriteSpec::to_envoy).transpose()?,
                }))
            })
            .transpose()?;
        let specifiers = [
            header,
            self.cookie.as_ref().map(|c| {
                PolicySpecifier::Cookie(hash_policy::Cookie {
                    name: c.name.clone(),
                    ttl: c.ttl,
                    path: c.path.clone(),
                    ..Default::default()
                })
            }),
            self.connection_properties.as_ref().map(|p| {
                PolicySpecifier::ConnectionProperties(hash_policy::ConnectionProperties {
                    source_ip: p.source_ip,
                })
            }),
            self.query_parameter.as_ref().map(|q| {
                PolicySpecifier::QueryParameter(hash_policy::QueryParameter { name: q.name.clone() })
            }),
            self.filter_state.as_ref().map(|f| {
                PolicySpecifier::FilterState(hash_policy::FilterState { key: f.key.clone() })
            }),
        ];
        let mut set = specifiers.into_iter().flatten();
        let policy_specifier = set.next().ok_or_else(|| Error::invalid("hash policy has no policy specifier"))?;
        if set.next().is_some() {
            return Err(Error::invalid("hash policy has more than one policy specifier"));
        }

        Ok(route_action::HashPolicy { policy_specifier: Some(policy_specifier), terminal: self.terminal })
    }
}

impl RouteActionSpec {
    #[allow(deprecated)]
    pub fn to_envoy(&self) -> Result<RouteAction> {
        reject_unsupported("RouteAction", &self.unsupported)?;
        let cluster_specifier = match (&self.cluster, &self.weighted_clusters) {
            (Some(cluster), None) => route_action::ClusterSpecifier::Cluster(cluster.clone()),
            (None, Some(weighted)) => {
                let clusters = weighted
                    .clusters
                    .iter()
                    .map(|c| -> Result<ClusterWeight> {
                        Ok(ClusterWeight {
                            name: c.name.clone(),
                            weight: c.weight.map(|value| UInt32Value { value }),
                            typed_per_filter_config: per_filter_configs(&c.typed_per_filter_config)?,
                            ..Default::default()
                        })
                    })
                    .collect::<Result<_>>()?;
                route_action::ClusterSpecifier::WeightedClusters(WeightedCluster {
                    clusters,
                    total_weight: weighted.total_weight.map(|value| UInt32Value { value }),
                    ..Default::default()
                })
            }
            _ => {
                return Err(Error::invalid(
                    "route action requires exactly one of cluster or weighted_clusters",
                ))
            }
        };

        let host_rewrite_specifier = match (&self.host_rewrite_literal, self.auto_host_rewrite) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid(
                    "host_rewrite_literal and auto_host_rewrite are mutually exclusive",
                ))
            }
            (Some(host), None) => Some(route_action::HostRewriteSpecifier::HostRewriteLiteral(host.clone())),
            (None, Some(value)) => {
                Some(route_action::HostRewriteSpecifier::AutoHostRewrite(BoolValue { value }))
            }
            (None, None) => None,
        };

        Ok(RouteAction {
            cluster_specifier: Some(cluster_specifier),
            timeout: self.timeout,
            idle_timeout: self.idle_timeout,
            prefix_rewrite: self.prefix_rewrite.clone(),
            host_rewrite_specifier,
            regex_rewrite: self.regex_rewrite.as_ref().map(RegexRewriteSpec::to_envoy).transpose()?,
            retry_policy: self.retry_policy.as_ref().map(RetryPolicySpec::to_envoy).transpose()?,
            hash_policy: self.hash_policy.iter().map(HashPolicySpec::to_envoy).collect::<Result<_>>()?,
            ..Default::default()
        })
    }
}

/// `envoy.config.route.v3.RedirectAction`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedirectSpec {
    #[serde(default)]
    pub host_redirect: String,
    #[serde(default)]
    pub port_redirect: u32,
    #[serde(default)]
    pub path_redirect: Option<String>,
    #[serde(default)]
    pub prefix_rewrite: Option<String>,
    #[serde(default)]
    pub https_redirect: Option<bool>,
    #[serde(default)]
    pub scheme_redirect: Option<String>,
    #[serde(default)]
    pub response_code: Option<String>,
    #[serde(default)]
    pub strip_query: bool,
}

impl RedirectSpec {
    pub fn to_envoy(&self) -> Result<RedirectAction> {
        let scheme_rewrite_specifier = match (self.https_redirect, &self.scheme_redirect) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid("https_redirect and scheme_redirect are mutually exclusive"))
            }
            (Some(https), None) => Some(redirect_action::SchemeRewriteSpecifier::HttpsRedirect(https)),
            (None, Some(scheme)) => {
                Some(redirect_action::SchemeRewriteSpecifier::SchemeRedirect(scheme.clone()))
            }
            (None, None) => None,
        };

        let path_rewrite_specifier = match (&self.path_redirect, &self.prefix_rewrite) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid("path_redirect and prefix_rewrite are mutually exclusive"))
            }
            (Some(path), None) => Some(redirect_action::PathRewriteSpecifier::PathRedirect(path.clone())),
            (None, Some(prefix)) => {
                Some(redirect_action::PathRewriteSpecifier::PrefixRewrite(prefix.clone()))
            }
            (None, None) => None,
        };

        let response_code = match self.response_code.as_deref() {
            None => redirect_action::RedirectResponseCode::MovedPermanently,
            Some(name) => redirect_action::RedirectResponseCode::from_str_name(name)
                .ok_or_else(|| Error::invalid(format!("unknown redirect response_code {}", name)))?,
        };

        Ok(RedirectAction {
            host_redirect: self.host_redirect.clone(),
            port_redirect: self.port_redirect,
            scheme_rewrite_specifier,
            path_rewrite_specifier,
            response_code: response_code as i32,
            strip_query: self.strip_query,
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InlineBodySpec {
    pub inline_string: String,
}

/// `envoy.config.route.v3.DirectResponseAction`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectResponseSpec {
    pub status: u32,
    #[serde(default)]
    pub body: Option<InlineBodySpec>,
}

impl DirectResponseSpec {
    pub fn to_envoy(&self) -> DirectResponseAction {
        DirectResponseAction {
            status: self.status,
            body: self.body.as_ref().map(|body| DataSource {
                specifier: Some(data_source::Specifier::InlineString(body.inline_string.clone())),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderSpec {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// `envoy.config.core.v3.HeaderValueOption`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderValueOptionSpec {
    pub header: HeaderSpec,
    #[serde(default)]
    pub append_action: Option<String>,
    #[serde(default)]
    pub keep_empty_value: bool,
}

pub(crate) fn header_options(specs: &[HeaderValueOptionSpec]) -> Result<Vec<HeaderValueOption>> {
    specs
        .iter()
        .map(|spec| {
            let append_action = match spec.append_action.as_deref() {
                None => HeaderAppendAction::AppendIfExistsOrAdd,
                Some(name) => HeaderAppendAction::from_str_name(name)
                    .ok_or_else(|| Error::invalid(format!("unknown append_action {}", name)))?,
            };
            Ok(HeaderValueOption {
                header: Some(HeaderValue {
                    key: spec.header.key.clone(),
                    value: spec.header.value.clone(),
                    ..Default::default()
                }),
                append_action: append_action as i32,
                keep_empty_value: spec.keep_empty_value,
                ..Default::default()
            })
        })
        .collect()
}
