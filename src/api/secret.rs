//! Kubernetes Secret holding TLS material.
//!
//! `data` values are base64 in manifests, as in Kubernetes; `stringData`
//! entries are plain text and win over `data` on conflicting keys.

use super::ObjectMeta;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";
pub const SECRET_TYPE_OPAQUE: &str = "Opaque";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeSecret {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(rename = "type", default = "default_secret_type")]
    pub secret_type: String,
    #[serde(
        default,
        serialize_with = "serialize_base64_map",
        deserialize_with = "deserialize_base64_map"
    )]
    pub data: BTreeMap<String, Vec<u8>>,
    #[serde(default, skip_serializing)]
    pub string_data: BTreeMap<String, String>,
}

fn default_secret_type() -> String {
    SECRET_TYPE_OPAQUE.to_string()
}

impl KubeSecret {
    /// A `kubernetes.io/tls` secret holding a PEM certificate chain and key.
    pub fn tls(
        namespace: impl Into<String>,
        name: impl Into<String>,
        cert_pem: impl Into<Vec<u8>>,
        key_pem: impl Into<Vec<u8>>,
    ) -> Self {
        let mut data = BTreeMap::new();
        data.insert(TLS_CERT_KEY.to_string(), cert_pem.into());
        data.insert(TLS_PRIVATE_KEY_KEY.to_string(), key_pem.into());
        Self {
            metadata: ObjectMeta::new(namespace, name),
            secret_type: SECRET_TYPE_TLS.to_string(),
            data,
            string_data: BTreeMap::new(),
        }
    }

    /// Fold `stringData` into `data`, the way the API server does on write.
    pub fn normalized(mut self) -> Self {
        for (key, value) in std::mem::take(&mut self.string_data) {
            self.data.insert(key, value.into_bytes());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }
}

fn serialize_base64_map<S>(map: &BTreeMap<String, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let encoded: BTreeMap<&str, String> = map
        .iter()
        .map(|(k, v)| (k.as_str(), base64::engine::general_purpose::STANDARD.encode(v)))
        .collect();
    encoded.serialize(serializer)
}

fn deserialize_base64_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
    encoded
        .into_iter()
        .map(|(key, value)| {
            base64::engine::general_purpose::STANDARD
                .decode(value.trim())
                .map(|bytes| (key.clone(), bytes))
                .map_err(|e| serde::de::Error::custom(format!("data[{}]: {}", key, e)))
        })
        .collect()
}
