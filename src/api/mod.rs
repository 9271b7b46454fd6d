//! # Resource API
//!
//! Kubernetes-shaped records the builder consumes: the VirtualService itself,
//! the store entities it references, and the identities used to look them up.

pub mod resources;
pub mod secret;
pub mod virtual_service;

pub use resources::{
    AccessLogConfig, Cluster, HttpFilter, Listener, Manifest, Policy, Route, Tracing,
    VirtualServiceTemplate,
};
pub use secret::KubeSecret;
pub use virtual_service::{
    Rbac, TemplateOption, TlsConfig, VirtualService, VirtualServiceSpec, VirtualServiceStatus,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Comma-separated list of domains a TLS secret serves
pub const DOMAINS_ANNOTATION: &str = "envoy.kaasops.io/domains";
/// Comma-separated list of Envoy node ids a VirtualService targets
pub const NODE_ID_ANNOTATION: &str = "envoy.kaasops.io/node-id";
/// Access log configs that append `/<vs-name>.log` to the file path
pub const AUTO_GENERATED_FILENAME_ANNOTATION: &str = "envoy.kaasops.io/auto-generated-filename";
/// Label grouping resources into snapshot access groups
pub const ACCESS_GROUP_LABEL: &str = "exc-access-group";
pub const DEFAULT_ACCESS_GROUP: &str = "general";

/// Namespace-qualified resource identity, rendered `<ns>/<name>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Subset of Kubernetes object metadata the builder reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub generation: i64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into(), ..Default::default() }
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName::new(self.namespace.clone(), self.name.clone())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Reference to another resource; the namespace defaults to the referrer's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: None }
    }

    pub fn in_namespace(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: Some(namespace.into()) }
    }

    pub fn resolve(&self, default_namespace: &str) -> NamespacedName {
        let namespace = match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => default_namespace,
        };
        NamespacedName::new(namespace, self.name.clone())
    }
}
