//! Store entities referenced from a VirtualService.
//!
//! Each entity carries its Envoy configuration as an opaque JSON blob; the
//! builder decodes it into `envoy-types` messages when it is used.

use super::{KubeSecret, ObjectMeta, VirtualService, VirtualServiceSpec, AUTO_GENERATED_FILENAME_ANNOTATION};
use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reusable VirtualService fragment folded in through `spec.template`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualServiceTemplate {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VirtualServiceSpec,
}

/// Envoy listener blob
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: Value,
}

/// Envoy cluster blob
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: Value,
}

impl Cluster {
    /// Name Envoy will know the cluster by: the blob's `name`, else the resource name.
    pub fn envoy_name(&self) -> &str {
        self.spec
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.metadata.name)
    }
}

/// Ordered list of HTTP filter blobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpFilter {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Vec<Value>,
}

/// RBAC policy blob, named after the resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: Value,
}

/// Access log blob
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessLogConfig {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: Value,
}

impl AccessLogConfig {
    /// Whether the file path gets a per-VirtualService `<name>.log` suffix.
    pub fn auto_generated_filename(&self) -> Result<bool> {
        match self.metadata.annotation(AUTO_GENERATED_FILENAME_ANNOTATION) {
            None => Ok(false),
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            Some(other) => Err(Error::invalid_field(
                format!(
                    "annotation {} must be 'true' or 'false', got '{}'",
                    AUTO_GENERATED_FILENAME_ANNOTATION, other
                ),
                AUTO_GENERATED_FILENAME_ANNOTATION,
            )),
        }
    }
}

/// HCM tracing blob
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tracing {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: Value,
}

/// Ordered list of route blobs appended through `additionalRoutes`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Vec<Value>,
}

/// Any resource that can be loaded into a store from a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    VirtualService(VirtualService),
    VirtualServiceTemplate(VirtualServiceTemplate),
    Listener(Listener),
    Cluster(Cluster),
    HttpFilter(HttpFilter),
    Policy(Policy),
    AccessLogConfig(AccessLogConfig),
    Tracing(Tracing),
    Route(Route),
    Secret(KubeSecret),
}

impl Manifest {
    pub fn kind(&self) -> &'static str {
        match self {
            Manifest::VirtualService(_) => "VirtualService",
            Manifest::VirtualServiceTemplate(_) => "VirtualServiceTemplate",
            Manifest::Listener(_) => "Listener",
            Manifest::Cluster(_) => "Cluster",
            Manifest::HttpFilter(_) => "HttpFilter",
            Manifest::Policy(_) => "Policy",
            Manifest::AccessLogConfig(_) => "AccessLogConfig",
            Manifest::Tracing(_) => "Tracing",
            Manifest::Route(_) => "Route",
            Manifest::Secret(_) => "Secret",
        }
    }
}
