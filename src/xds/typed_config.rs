//! Typed config encoding.
//!
//! `typed_config` objects arrive as JSON carrying an `@type` key. Extensions
//! this crate models are encoded as their real protobuf message; every other
//! extension travels as an `xds.type.v3.TypedStruct`, which Envoy unpacks
//! against its own extension registry.

use crate::errors::{Error, Result};
use crate::xds::canonical::{pack_canonical, write_length_delimited, CanonicalEncode};
use crate::xds::hcm::{FileAccessLogSpec, HcmSpec, RouterSpec, TcpProxySpec, TlsInspectorSpec};
use crate::xds::rbac::RbacFilterSpec;
use crate::xds::{
    type_name, FILE_ACCESS_LOG_TYPE_URL, HCM_TYPE_URL, RBAC_TYPE_URL, ROUTER_TYPE_URL,
    TCP_PROXY_TYPE_URL, TLS_INSPECTOR_TYPE_URL, TYPED_STRUCT_TYPE_URL, UDPA_TYPED_STRUCT_TYPE_URL,
};
use envoy_types::pb::google::protobuf::{value::Kind, Any, ListValue, Struct, Value as ProtoValue};
use prost::Message;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Key holding the type URL inside a JSON typed config
pub const TYPE_KEY: &str = "@type";

/// Wrap a prost message into an `Any`.
pub fn pack<M: Message>(type_url: impl Into<String>, msg: &M) -> Any {
    Any { type_url: type_url.into(), value: msg.encode_to_vec() }
}

/// Decode an `Any` into a concrete message, checking the type URL first.
pub fn unpack<M: Message + Default>(any: &Any, type_url: &str) -> Result<M> {
    if any.type_url != type_url {
        return Err(Error::invalid(format!(
            "expected {} but found {}",
            type_name(type_url),
            type_name(&any.type_url)
        )));
    }
    M::decode(any.value.as_slice()).map_err(|e| Error::decode(type_name(type_url).to_string(), e))
}

/// Encode a JSON typed config into an `Any`.
pub fn json_to_any(value: &Value) -> Result<Any> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::invalid("typed_config must be a JSON object"))?;

    let type_url = object
        .get(TYPE_KEY)
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| Error::invalid("typed_config is missing @type"))?;

    let mut body = object.clone();
    body.remove(TYPE_KEY);
    let body = Value::Object(body);

    let any = match type_url {
        HCM_TYPE_URL => pack_canonical(type_url, &parse::<HcmSpec>(type_url, body)?.to_envoy()?),
        TCP_PROXY_TYPE_URL => pack(type_url, &parse::<TcpProxySpec>(type_url, body)?.to_envoy()?),
        ROUTER_TYPE_URL => pack(type_url, &parse::<RouterSpec>(type_url, body)?.to_envoy()),
        TLS_INSPECTOR_TYPE_URL => {
            pack(type_url, &parse::<TlsInspectorSpec>(type_url, body)?.to_envoy())
        }
        FILE_ACCESS_LOG_TYPE_URL => {
            pack(type_url, &parse::<FileAccessLogSpec>(type_url, body)?.to_envoy()?)
        }
        RBAC_TYPE_URL => parse::<RbacFilterSpec>(type_url, body)?.to_any()?,
        TYPED_STRUCT_TYPE_URL | UDPA_TYPED_STRUCT_TYPE_URL => {
            let envelope: TypedStructSpec = parse(type_url, body)?;
            typed_struct_any(&envelope.type_url, &envelope.value)?
        }
        other => typed_struct_any(other, &body)?,
    };

    Ok(any)
}

/// `xds.type.v3.TypedStruct`
#[derive(Clone, PartialEq, prost::Message)]
pub struct TypedStruct {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(message, optional, tag = "2")]
    pub value: Option<Struct>,
}

impl CanonicalEncode for TypedStruct {
    fn encode_canonical(&self, buf: &mut Vec<u8>) {
        prost::encoding::string::encode(1, &self.type_url, buf);
        if let Some(value) = &self.value {
            write_length_delimited(2, &value.to_canonical_bytes(), buf);
        }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct TypedStructSpec {
    type_url: String,
    #[serde(default = "empty_object")]
    value: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn parse<T: DeserializeOwned>(type_url: &str, body: Value) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|e| Error::json(format!("invalid {}", type_name(type_url)), e))
}

/// Build a TypedStruct envelope carrying `body` for the extension `type_url`.
pub fn typed_struct_any(type_url: &str, body: &Value) -> Result<Any> {
    if type_url.is_empty() {
        return Err(Error::invalid("TypedStruct type_url cannot be empty"));
    }
    let envelope =
        TypedStruct { type_url: type_url.to_string(), value: Some(json_to_struct(body)?) };
    Ok(pack_canonical(TYPED_STRUCT_TYPE_URL, &envelope))
}

/// The extension type an `Any` stands for, looking through a TypedStruct envelope.
pub fn effective_type_url(any: &Any) -> String {
    if is_typed_struct(any) {
        if let Ok(envelope) = TypedStruct::decode(any.value.as_slice()) {
            return envelope.type_url;
        }
    }
    any.type_url.clone()
}

/// JSON body of a TypedStruct envelope, or `None` for natively encoded messages.
pub fn any_to_json(any: &Any) -> Result<Option<Value>> {
    if !is_typed_struct(any) {
        return Ok(None);
    }
    let envelope = TypedStruct::decode(any.value.as_slice())
        .map_err(|e| Error::decode("TypedStruct", e))?;
    Ok(Some(envelope.value.as_ref().map(struct_to_json).unwrap_or_else(empty_object)))
}

fn is_typed_struct(any: &Any) -> bool {
    any.type_url == TYPED_STRUCT_TYPE_URL || any.type_url == UDPA_TYPED_STRUCT_TYPE_URL
}

/// Convert a JSON object to a protobuf Struct.
pub fn json_to_struct(json: &Value) -> Result<Struct> {
    match json {
        Value::Object(map) => Ok(Struct { fields: map_to_fields(map)? }),
        _ => Err(Error::invalid("extension configuration must be a JSON object")),
    }
}

fn map_to_fields(map: &Map<String, Value>) -> Result<HashMap<String, ProtoValue>> {
    map.iter().map(|(key, value)| Ok((key.clone(), json_to_proto_value(value)?))).collect()
}

fn json_to_proto_value(json: &Value) -> Result<ProtoValue> {
    let kind = match json {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => Kind::NumberValue(
            n.as_f64()
                .ok_or_else(|| Error::invalid(format!("cannot represent number {}", n)))?,
        ),
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(json_to_proto_value).collect::<Result<Vec<_>>>()?,
        }),
        Value::Object(map) => Kind::StructValue(Struct { fields: map_to_fields(map)? }),
    };
    Ok(ProtoValue { kind: Some(kind) })
}

/// Convert a protobuf Struct back to JSON.
pub fn struct_to_json(s: &Struct) -> Value {
    Value::Object(s.fields.iter().map(|(k, v)| (k.clone(), proto_value_to_json(v))).collect())
}

fn proto_value_to_json(value: &ProtoValue) -> Value {
    match &value.kind {
        Some(Kind::NullValue(_)) | None => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::NumberValue(n)) => {
            // Whole numbers come back as integers so ports and counts keep their JSON form
            if n.fract() == 0.0 && n.abs() < 9.0e15 {
                Value::from(*n as i64)
            } else {
                serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)
            }
        }
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.iter().map(proto_value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => struct_to_json(s),
    }
}
