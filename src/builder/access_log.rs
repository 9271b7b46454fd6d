//! Access log configuration for the HTTP connection manager.
//!
//! A VirtualService sets at most one of four shapes: `accessLog` (inline,
//! deprecated), `accessLogConfig` (reference, deprecated), `accessLogs` or
//! `accessLogConfigs`.

use crate::api::{AccessLogConfig, ResourceRef, VirtualService};
use crate::builder::{AccessLogBuilder, AccessLogs};
use crate::errors::{Error, Result, ResultExt};
use crate::store::Store;
use crate::xds::hcm::AccessLogSpec;
use crate::xds::typed_config::TYPE_KEY;
use crate::xds::FILE_ACCESS_LOG_TYPE_URL;
use envoy_types::pb::envoy::config::accesslog::v3::AccessLog;
use serde_json::Value;
use tracing::info;

pub const ACCESS_LOG_DEPRECATED: &str = "accessLog is deprecated, use accessLogs instead";
pub const ACCESS_LOG_CONFIG_DEPRECATED: &str =
    "accessLogConfig is deprecated, use accessLogConfigs instead";

fn parse_access_log(raw: &Value) -> Result<AccessLog> {
    AccessLogSpec::from_json(raw)?.to_envoy()
}

/// Decode a referenced config, appending `/<vs-name>.log` to file paths when annotated.
pub fn referenced_access_log(config: &AccessLogConfig, vs_name: &str) -> Result<AccessLog> {
    if !config.auto_generated_filename()? {
        return parse_access_log(&config.spec);
    }

    let mut spec = config.spec.clone();
    let typed_config = spec
        .get_mut("typed_config")
        .filter(|tc| tc.get(TYPE_KEY).and_then(Value::as_str) == Some(FILE_ACCESS_LOG_TYPE_URL))
        .ok_or_else(|| Error::invalid("access log config type must be of type file"))?;
    let path = typed_config.get("path").and_then(Value::as_str).unwrap_or_default().to_string();
    typed_config["path"] = Value::String(format!("{}/{}.log", path, vs_name));

    parse_access_log(&spec)
}

#[derive(Debug, Default)]
pub struct DefaultAccessLogBuilder;

impl DefaultAccessLogBuilder {
    pub fn new() -> Self {
        Self
    }

    fn load(&self, vs: &VirtualService, reference: &ResourceRef, store: &dyn Store) -> Result<AccessLog> {
        let id = reference.resolve(vs.namespace());
        let config = store
            .get_access_log(&id)
            .ok_or_else(|| Error::missing("accessLogConfig", format!("can't find accessLogConfig {}", id)))?;
        referenced_access_log(&config, vs.name())
            .with_context(|| format!("failed to unmarshal accessLogConfig {}", id))
    }
}

impl AccessLogBuilder for DefaultAccessLogBuilder {
    fn build_access_logs(&self, vs: &VirtualService, store: &dyn Store) -> Result<AccessLogs> {
        let spec = &vs.spec;
        let shapes = [
            spec.access_log.is_some(),
            spec.access_log_config.is_some(),
            !spec.access_logs.is_empty(),
            !spec.access_log_configs.is_empty(),
        ];
        match shapes.iter().filter(|set| **set).count() {
            0 => return Ok(AccessLogs::default()),
            1 => {}
            _ => {
                return Err(Error::invalid(
                    "can't use accessLog, accessLogConfig, accessLogs and accessLogConfigs at the same time",
                ))
            }
        }

        let mut result = AccessLogs::default();

        if let Some(raw) = &spec.access_log {
            result.advisories.push(ACCESS_LOG_DEPRECATED.to_string());
            result.logs.push(parse_access_log(raw).context("failed to unmarshal accessLog")?);
        } else if let Some(reference) = &spec.access_log_config {
            result.advisories.push(ACCESS_LOG_CONFIG_DEPRECATED.to_string());
            result.logs.push(self.load(vs, reference, store)?);
        } else if !spec.access_logs.is_empty() {
            for (index, raw) in spec.access_logs.iter().enumerate() {
                result.logs.push(
                    parse_access_log(raw)
                        .with_context(|| format!("failed to unmarshal accessLogs[{}]", index))?,
                );
            }
        } else {
            for reference in &spec.access_log_configs {
                result.logs.push(self.load(vs, reference, store)?);
            }
        }

        for advisory in &result.advisories {
            info!(vs = %vs.metadata.namespaced_name(), advisory = %advisory, "Deprecated access log field in use");
        }
        Ok(result)
    }
}
