//! Template expansion.
//!
//! A VirtualServiceTemplate is folded into a VirtualService at the JSON level:
//! both specs are serialized, merged path by path according to the
//! VirtualService's `templateOptions`, and deserialized back. Unset fields are
//! skipped on serialization, so only what a user actually wrote takes part.

use crate::api::{TemplateOption, VirtualService, VirtualServiceSpec, VirtualServiceTemplate};
use crate::errors::{Error, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

const ROUTES_PATH: &str = "virtualHost.routes";

/// How a field path is folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    /// Objects merge recursively, arrays append, scalars take the VirtualService value
    Merge,
    /// The VirtualService value wins wholesale
    Replace,
    /// The path is removed from the result
    Delete,
}

impl Modifier {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "merge" => Ok(Self::Merge),
            "replace" => Ok(Self::Replace),
            "delete" => Ok(Self::Delete),
            other => Err(Error::invalid_field(
                format!("unknown template modifier '{}'", other),
                "templateOptions",
            )),
        }
    }
}

fn parse_options(options: &[TemplateOption]) -> Result<BTreeMap<String, Modifier>> {
    options
        .iter()
        .map(|opt| {
            if opt.field.is_empty() {
                return Err(Error::invalid_field("template option field cannot be empty", "templateOptions"));
            }
            Ok((opt.field.clone(), Modifier::parse(&opt.modifier)?))
        })
        .collect()
}

/// Fold `template` into a copy of `vs`; the input is left untouched.
pub fn apply_template(vs: &VirtualService, template: &VirtualServiceTemplate) -> Result<VirtualService> {
    let options = parse_options(&vs.spec.template_options)?;

    let mut base = serde_json::to_value(&template.spec)
        .map_err(|e| Error::json("failed to encode template spec", e))?;
    if let Value::Object(map) = &mut base {
        // a template never chains to another template
        map.remove("template");
        map.remove("templateOptions");
    }
    let overlay = serde_json::to_value(&vs.spec)
        .map_err(|e| Error::json("failed to encode virtual service spec", e))?;

    drop_shadowed_root_route(&mut base, &overlay);

    let mut merged = merge_values(base, overlay, &options, "");
    for (path, _) in options.iter().filter(|(_, m)| **m == Modifier::Delete) {
        delete_path(&mut merged, path);
    }

    let spec: VirtualServiceSpec = serde_json::from_value(merged)
        .map_err(|e| Error::json("failed to decode merged virtual service spec", e))?;

    debug!(
        vs = %vs.metadata.namespaced_name(),
        template = %template.metadata.namespaced_name(),
        "Applied virtual service template"
    );

    Ok(VirtualService { metadata: vs.metadata.clone(), spec, status: vs.status.clone() })
}

fn merge_values(base: Value, overlay: Value, options: &BTreeMap<String, Modifier>, path: &str) -> Value {
    if options.get(path) == Some(&Modifier::Replace) {
        return overlay;
    }
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            Value::Object(merge_objects(base, overlay, options, path))
        }
        (Value::Array(mut base), Value::Array(overlay)) => {
            for item in overlay {
                if !base.contains(&item) {
                    base.push(item);
                }
            }
            Value::Array(base)
        }
        (_, overlay) => overlay,
    }
}

fn merge_objects(
    mut base: Map<String, Value>,
    overlay: Map<String, Value>,
    options: &BTreeMap<String, Modifier>,
    path: &str,
) -> Map<String, Value> {
    for (key, value) in overlay {
        let child = join_path(path, &key);
        let merged = match base.remove(&key) {
            Some(existing) => merge_values(existing, value, options, &child),
            None => value,
        };
        base.insert(key, merged);
    }
    base
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn delete_path(value: &mut Value, path: &str) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };
    let mut current = value;
    for segment in segments {
        match current.get_mut(segment) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Value::Object(map) = current {
        map.remove(last);
    }
}

/// Whether a route JSON blob matches every path, i.e. prefix or path `/`.
pub fn is_root_route_json(route: &Value) -> bool {
    let Some(route_match) = route.get("match") else {
        return false;
    };
    ["prefix", "path"]
        .iter()
        .any(|key| route_match.get(*key).and_then(Value::as_str) == Some("/"))
}

fn routes_at<'a>(spec: &'a Value) -> Option<&'a Vec<Value>> {
    spec.get("virtualHost")?.get("routes")?.as_array()
}

/// Remove the template's root route when the VirtualService brings its own.
fn drop_shadowed_root_route(base: &mut Value, overlay: &Value) {
    let user_has_root = routes_at(overlay).is_some_and(|routes| routes.iter().any(is_root_route_json));
    if !user_has_root {
        return;
    }
    if let Some(Value::Array(routes)) =
        base.get_mut("virtualHost").and_then(|vh| vh.get_mut("routes"))
    {
        let before = routes.len();
        routes.retain(|route| !is_root_route_json(route));
        if routes.len() != before {
            debug!(path = ROUTES_PATH, "Dropped template root route shadowed by virtual service");
        }
    }
}
