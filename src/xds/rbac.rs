//! RBAC policies and filter configuration
//!
//! Policies use Envoy's JSON form, where each permission and principal is a
//! single-key object such as `{"any": true}` or `{"header": {...}}`.
//!
//! The RBAC filter is encoded by hand so that the policy map is written in
//! name order, like every other map in [`crate::xds::canonical`].

use crate::errors::{Error, Result};
use crate::xds::canonical::write_length_delimited;
use crate::xds::route::{HeaderMatcherSpec, StringMatcherSpec};
use crate::xds::RBAC_TYPE_URL;
use envoy_types::pb::envoy::config::core::v3::CidrRange;
use envoy_types::pb::envoy::config::rbac::v3::{
    permission, principal, rbac::Action, Permission, Policy, Principal, Rbac as RbacRules,
};
use envoy_types::pb::envoy::extensions::filters::http::rbac::v3::Rbac as RbacFilter;
use envoy_types::pb::envoy::r#type::matcher::v3::{path_matcher, PathMatcher};
use envoy_types::pb::google::protobuf::{Any, UInt32Value};
use prost::Message;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Parse an RBAC action name (`ALLOW`, `DENY`, `LOG`).
pub fn parse_action(name: &str) -> Result<Action> {
    if name.is_empty() {
        return Err(Error::invalid_field("RBAC action is empty", "rbac.action"));
    }
    Action::from_str_name(name)
        .ok_or_else(|| Error::invalid_field(format!("invalid RBAC action {}", name), "rbac.action"))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CidrRangeSpec {
    pub address_prefix: String,
    #[serde(default)]
    pub prefix_len: Option<u32>,
}

impl CidrRangeSpec {
    fn to_envoy(&self) -> CidrRange {
        CidrRange {
            address_prefix: self.address_prefix.clone(),
            prefix_len: self.prefix_len.map(|value| UInt32Value { value }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathMatcherSpec {
    pub path: StringMatcherSpec,
}

impl PathMatcherSpec {
    fn to_envoy(&self) -> Result<PathMatcher> {
        Ok(PathMatcher { rule: Some(path_matcher::Rule::Path(self.path.to_envoy()?)) })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionSetSpec {
    pub rules: Vec<PermissionSpec>,
}

/// `envoy.config.rbac.v3.Permission`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionSpec {
    Any(bool),
    AndRules(PermissionSetSpec),
    OrRules(PermissionSetSpec),
    NotRule(Box<PermissionSpec>),
    Header(HeaderMatcherSpec),
    UrlPath(PathMatcherSpec),
    DestinationIp(CidrRangeSpec),
    DestinationPort(u32),
    RequestedServerName(StringMatcherSpec),
}

impl PermissionSpec {
    pub fn to_envoy(&self) -> Result<Permission> {
        let rule = match self {
            Self::Any(any) => permission::Rule::Any(*any),
            Self::AndRules(set) => permission::Rule::AndRules(permission::Set {
                rules: set.rules.iter().map(Self::to_envoy).collect::<Result<_>>()?,
            }),
            Self::OrRules(set) => permission::Rule::OrRules(permission::Set {
                rules: set.rules.iter().map(Self::to_envoy).collect::<Result<_>>()?,
            }),
            Self::NotRule(inner) => permission::Rule::NotRule(Box::new(inner.to_envoy()?)),
            Self::Header(header) => permission::Rule::Header(header.to_envoy()?),
            Self::UrlPath(path) => permission::Rule::UrlPath(path.to_envoy()?),
            Self::DestinationIp(cidr) => permission::Rule::DestinationIp(cidr.to_envoy()),
            Self::DestinationPort(port) => permission::Rule::DestinationPort(*port),
            Self::RequestedServerName(name) => {
                permission::Rule::RequestedServerName(name.to_envoy()?)
            }
        };
        Ok(Permission { rule: Some(rule) })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrincipalSetSpec {
    pub ids: Vec<PrincipalSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthenticatedSpec {
    #[serde(default)]
    pub principal_name: Option<StringMatcherSpec>,
}

/// `envoy.config.rbac.v3.Principal`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalSpec {
    Any(bool),
    AndIds(PrincipalSetSpec),
    OrIds(PrincipalSetSpec),
    NotId(Box<PrincipalSpec>),
    Authenticated(AuthenticatedSpec),
    DirectRemoteIp(CidrRangeSpec),
    RemoteIp(CidrRangeSpec),
    Header(HeaderMatcherSpec),
    UrlPath(PathMatcherSpec),
}

impl PrincipalSpec {
    pub fn to_envoy(&self) -> Result<Principal> {
        let identifier = match self {
            Self::Any(any) => principal::Identifier::Any(*any),
            Self::AndIds(set) => principal::Identifier::AndIds(principal::Set {
                ids: set.ids.iter().map(Self::to_envoy).collect::<Result<_>>()?,
            }),
            Self::OrIds(set) => principal::Identifier::OrIds(principal::Set {
                ids: set.ids.iter().map(Self::to_envoy).collect::<Result<_>>()?,
            }),
            Self::NotId(inner) => principal::Identifier::NotId(Box::new(inner.to_envoy()?)),
            Self::Authenticated(auth) => {
                principal::Identifier::Authenticated(principal::Authenticated {
                    principal_name: auth
                        .principal_name
                        .as_ref()
                        .map(StringMatcherSpec::to_envoy)
                        .transpose()?,
                })
            }
            Self::DirectRemoteIp(cidr) => principal::Identifier::DirectRemoteIp(cidr.to_envoy()),
            Self::RemoteIp(cidr) => principal::Identifier::RemoteIp(cidr.to_envoy()),
            Self::Header(header) => principal::Identifier::Header(header.to_envoy()?),
            Self::UrlPath(path) => principal::Identifier::UrlPath(path.to_envoy()?),
        };
        Ok(Principal { identifier: Some(identifier) })
    }
}

/// `envoy.config.rbac.v3.Policy`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySpec {
    #[serde(default)]
    pub permissions: Vec<PermissionSpec>,
    #[serde(default)]
    pub principals: Vec<PrincipalSpec>,
}

impl PolicySpec {
    pub fn from_json(raw: &Value) -> Result<Self> {
        serde_json::from_value(raw.clone()).map_err(|e| Error::json("invalid rbac policy", e))
    }

    pub fn to_envoy(&self) -> Result<Policy> {
        Ok(Policy {
            permissions: self.permissions.iter().map(PermissionSpec::to_envoy).collect::<Result<_>>()?,
            principals: self.principals.iter().map(PrincipalSpec::to_envoy).collect::<Result<_>>()?,
            ..Default::default()
        })
    }
}

/// Action plus named policies, kept in name order.
#[derive(Debug, Clone, PartialEq)]
pub struct RbacRuleSet {
    pub action: Action,
    pub policies: BTreeMap<String, Policy>,
}

impl RbacRuleSet {
    /// Encode as `envoy.config.rbac.v3.RBAC` with policies written in name order.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = RbacRules { action: self.action as i32, ..Default::default() }.encode_to_vec();
        for (name, policy) in &self.policies {
            let mut entry = Vec::new();
            prost::encoding::string::encode(1, name, &mut entry);
            prost::encoding::message::encode(2, policy, &mut entry);
            write_length_delimited(2, &entry, &mut buf);
        }
        buf
    }
}

/// Encode the HTTP RBAC filter config as an `Any`.
pub fn rbac_filter_any(
    rules: Option<&RbacRuleSet>,
    shadow_rules: Option<&RbacRuleSet>,
    envelope: &RbacFilter,
) -> Any {
    let mut value = RbacFilter { rules: None, shadow_rules: None, ..envelope.clone() }.encode_to_vec();
    if let Some(rules) = rules {
        write_length_delimited(1, &rules.encode(), &mut value);
    }
    if let Some(shadow) = shadow_rules {
        write_length_delimited(2, &shadow.encode(), &mut value);
    }
    Any { type_url: RBAC_TYPE_URL.to_string(), value }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RbacRulesSpec {
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub policies: BTreeMap<String, PolicySpec>,
}

fn default_action() -> String {
    "ALLOW".to_string()
}

impl RbacRulesSpec {
    fn to_rule_set(&self) -> Result<RbacRuleSet> {
        let policies = self
            .policies
            .iter()
            .map(|(name, policy)| Ok((name.clone(), policy.to_envoy()?)))
            .collect::<Result<_>>()?;
        Ok(RbacRuleSet { action: parse_action(&self.action)?, policies })
    }
}

/// `envoy.extensions.filters.http.rbac.v3.RBAC` supplied as a typed config
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RbacFilterSpec {
    #[serde(default)]
    pub rules: Option<RbacRulesSpec>,
    #[serde(default)]
    pub rules_stat_prefix: String,
    #[serde(default)]
    pub shadow_rules: Option<RbacRulesSpec>,
    #[serde(default)]
    pub shadow_rules_stat_prefix: String,
    #[serde(default)]
    pub track_per_rule_stats: bool,
}

impl RbacFilterSpec {
    pub fn to_any(&self) -> Result<Any> {
        let rules = self.rules.as_ref().map(RbacRulesSpec::to_rule_set).transpose()?;
        let shadow = self.shadow_rules.as_ref().map(RbacRulesSpec::to_rule_set).transpose()?;
        let envelope = RbacFilter {
            rules_stat_prefix: self.rules_stat_prefix.clone(),
            shadow_rules_stat_prefix: self.shadow_rules_stat_prefix.clone(),
            track_per_rule_stats: self.track_per_rule_stats,
            ..Default::default()
        };
        Ok(rbac_filter_any(rules.as_ref(), shadow.as_ref(), &envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_policy() -> Policy {
        PolicySpec::from_json(&json!({
            "permissions": [{"any": true}],
            "principals": [{"header": {"name": "x-user", "exact_match": "admin"}}]
        }))
        .unwrap()
        .to_envoy()
        .unwrap()
    }

    #[test]
    fn test_parse_action() {
        assert_eq!(parse_action("DENY").unwrap(), Action::Deny);
        assert_eq!(parse_action("").unwrap_err().to_string(), "RBAC action is empty");
        assert_eq!(parse_action("deny").unwrap_err().to_string(), "invalid RBAC action deny");
    }

    #[test]
    fn test_policy_json_form() {
        let policy = PolicySpec::from_json(&json!({
            "permissions": [{"and_rules": {"rules": [
                {"url_path": {"path": {"prefix": "/admin"}}},
                {"not_rule": {"destination_port": 8080}}
            ]}}],
            "principals": [{"or_ids": {"ids": [
                {"remote_ip": {"address_prefix": "10.0.0.0", "prefix_len": 8}},
                {"authenticated": {"principal_name": {"exact": "spiffe://a"}}}
            ]}}]
        }))
        .unwrap()
        .to_envoy()
        .unwrap();
        assert_eq!(policy.permissions.len(), 1);
        assert_eq!(policy.principals.len(), 1);
    }

    #[test]
    fn test_unknown_permission_rejected() {
        assert!(PolicySpec::from_json(&json!({"permissions": [{"teleport": true}]})).is_err());
    }

    #[test]
    fn test_rule_set_encoding_is_stable_and_decodable() {
        let mut policies = BTreeMap::new();
        for name in ["zeta", "alpha", "mid"] {
            policies.insert(name.to_string(), sample_policy());
        }
        let set = RbacRuleSet { action: Action::Deny, policies };

        let first = rbac_filter_any(Some(&set), None, &RbacFilter::default());
        let second = rbac_filter_any(Some(&set.clone()), None, &RbacFilter::default());
        assert_eq!(first, second);

        let decoded = RbacFilter::decode(first.value.as_slice()).unwrap();
        let rules = decoded.rules.unwrap();
        assert_eq!(rules.action, Action::Deny as i32);
        assert_eq!(rules.policies.len(), 3);
        assert_eq!(rules.policies["alpha"], sample_policy());
    }

    #[test]
    fn test_filter_spec_to_any() {
        let spec: RbacFilterSpec = serde_json::from_value(json!({
            "rules": {"action": "ALLOW", "policies": {"p": {"permissions": [{"any": true}], "principals": [{"any": true}]}}},
            "rules_stat_prefix": "vs_"
        }))
        .unwrap();
        let any = spec.to_any().unwrap();
        let decoded = RbacFilter::decode(any.value.as_slice()).unwrap();
        assert_eq!(decoded.rules_stat_prefix, "vs_");
        assert!(decoded.rules.unwrap().policies.contains_key("p"));
    }
}
