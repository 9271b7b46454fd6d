//! RBAC filter assembly from a VirtualService `rbac` block.

use crate::api::{Rbac, VirtualService};
use crate::builder::cache::KeyHasher;
use crate::errors::{Error, Result, ResultExt};
use crate::store::Store;
use crate::xds::rbac::{parse_action, rbac_filter_any, PolicySpec, RbacRuleSet};
use crate::xds::validate::validate_policy;
use crate::xds::RBAC_FILTER_NAME;
use envoy_types::pb::envoy::config::rbac::v3::Policy;
use envoy_types::pb::envoy::extensions::filters::http::rbac::v3::Rbac as RbacFilter;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_filter, HttpFilter,
};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

fn parse_policy(raw: &Value, name: &str) -> Result<Policy> {
    let policy = PolicySpec::from_json(raw)
        .and_then(|spec| spec.to_envoy())
        .with_context(|| format!("failed to unmarshal RBAC policy {}", name))?;
    validate_policy(name, &policy).with_context(|| format!("failed to validate RBAC policy {}", name))?;
    Ok(policy)
}

/// Resolve the action and every inline and referenced policy.
pub fn build_rule_set(vs: &VirtualService, rbac: &Rbac, store: &dyn Store) -> Result<RbacRuleSet> {
    let action = parse_action(&rbac.action)?;

    if rbac.policies.is_empty() && rbac.additional_policies.is_empty() {
        return Err(Error::invalid_field("RBAC policies is empty", "rbac.policies"));
    }

    let mut policies = BTreeMap::new();
    for (name, raw) in &rbac.policies {
        policies.insert(name.clone(), parse_policy(raw, name)?);
    }

    for reference in &rbac.additional_policies {
        let id = reference.resolve(vs.namespace());
        let resource = store.get_policy(&id).ok_or_else(|| Error::not_found("RBAC policy", &id))?;
        let name = resource.metadata.name.clone();
        if policies.contains_key(&name) {
            return Err(Error::conflict(format!("policy '{}' already exist in RBAC", name)));
        }
        let policy = parse_policy(&resource.spec, &id.to_string())?;
        policies.insert(name, policy);
    }

    debug!(vs = %vs.metadata.namespaced_name(), policies = policies.len(), "Resolved RBAC policies");
    Ok(RbacRuleSet { action, policies })
}

/// The RBAC HTTP filter placed at the head of the chain.
pub fn build_rbac_filter(vs: &VirtualService, rbac: &Rbac, store: &dyn Store) -> Result<HttpFilter> {
    let rules = build_rule_set(vs, rbac, store)?;
    let any = rbac_filter_any(Some(&rules), None, &RbacFilter::default());
    Ok(HttpFilter {
        name: RBAC_FILTER_NAME.to_string(),
        config_type: Some(http_filter::ConfigType::TypedConfig(any)),
        ..Default::default()
    })
}

/// Feed every input of the RBAC filter into a cache key.
pub fn hash_rbac(hasher: &mut KeyHasher, vs: &VirtualService, rbac: &Rbac, store: &dyn Store) {
    hasher.write_str(&rbac.action);
    hasher.write_u64(rbac.policies.len() as u64);
    for (name, raw) in &rbac.policies {
        hasher.write_str(name).write_json(raw);
    }
    hasher.write_u64(rbac.additional_policies.len() as u64);
    for reference in &rbac.additional_policies {
        let id = reference.resolve(vs.namespace());
        hasher.write_str(&id.to_string());
        match store.get_policy(&id) {
            Some(policy) => hasher.write_str(&policy.metadata.name).write_opt_json(Some(&policy.spec)),
            None => hasher.write_opt_json(None),
        };
    }
}
