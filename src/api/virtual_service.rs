//! The VirtualService custom resource.

use super::{
    ObjectMeta, ResourceRef, ACCESS_GROUP_LABEL, DEFAULT_ACCESS_GROUP, NODE_ID_ANNOTATION,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// User-facing record translated into xDS resources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualService {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VirtualServiceSpec,
    #[serde(default, skip_serializing_if = "VirtualServiceStatus::is_empty")]
    pub status: VirtualServiceStatus,
}

impl VirtualService {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { metadata: ObjectMeta::new(namespace, name), ..Default::default() }
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Envoy node ids this VirtualService targets; `*` means every node.
    pub fn node_ids(&self) -> Vec<String> {
        self.metadata
            .annotation(NODE_ID_ANNOTATION)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn access_group(&self) -> String {
        self.metadata
            .labels
            .get(ACCESS_GROUP_LABEL)
            .filter(|group| !group.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_ACCESS_GROUP.to_string())
    }
}

/// Validity flag and human-readable message written back by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualServiceStatus {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub invalid: bool,
}

impl VirtualServiceStatus {
    pub fn valid(message: impl Into<String>) -> Self {
        Self { message: message.into(), invalid: false }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self { message: message.into(), invalid: true }
    }

    fn is_empty(&self) -> bool {
        self.message.is_empty() && !self.invalid
    }
}

/// TLS material selection; exactly one of the two modes must be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_discovery: Option<bool>,
}

/// Inline RBAC configuration; `policies` are Envoy policy JSON blobs by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rbac {
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub policies: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_policies: Vec<ResourceRef>,
}

/// Per-field template folding directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateOption {
    pub field: String,
    pub modifier: String,
}

/// Everything a VirtualService (or its template) can configure.
///
/// Unset fields are omitted on serialization so that template folding only
/// sees what the user actually wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template_options: Vec<TemplateOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_host: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_routes: Vec<ResourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_filters: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_http_filters: Vec<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbac: Option<Rbac>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_log: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_log_config: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_logs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_log_configs: Vec<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_remote_address: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xff_num_trusted_hops: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upgrade_configs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing_ref: Option<ResourceRef>,
}

impl VirtualServiceSpec {
    /// First field that cannot coexist with filter chains declared on the listener.
    pub fn first_filter_chain_conflict(&self) -> Option<&'static str> {
        let checks: [(&'static str, bool); 13] = [
            ("virtualHost", self.virtual_host.is_some()),
            ("additionalRoutes", !self.additional_routes.is_empty()),
            ("httpFilters", !self.http_filters.is_empty()),
            ("additionalHttpFilters", !self.additional_http_filters.is_empty()),
            ("tlsConfig", self.tls_config.is_some()),
            ("rbac", self.rbac.is_some()),
            ("useRemoteAddress", self.use_remote_address.is_some()),
            ("xffNumTrustedHops", self.xff_num_trusted_hops.is_some()),
            ("upgradeConfigs", !self.upgrade_configs.is_empty()),
            ("accessLog", self.access_log.is_some()),
            ("accessLogConfig", self.access_log_config.is_some()),
            ("accessLogs", !self.access_logs.is_empty()),
            ("accessLogConfigs", !self.access_log_configs.is_empty()),
        ];
        checks.into_iter().find(|(_, set)| *set).map(|(field, _)| field)
    }
}
