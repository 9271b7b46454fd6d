//! TLS secret selection and SDS secret materialization.
//!
//! A VirtualService either names its secret (`tlsConfig.secretRef`) or asks
//! for auto-discovery, in which case every domain is matched against the
//! store's domain index, falling back to the wildcard parent domain.

use crate::api::secret::{SECRET_TYPE_OPAQUE, SECRET_TYPE_TLS, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY};
use crate::api::{KubeSecret, NamespacedName, TlsConfig, VirtualService};
use crate::builder::{SecretDomains, TlsBuilder};
use crate::errors::{Error, Result};
use crate::store::Store;
use crate::xds::validate::validate_secret;
use chrono::{DateTime, Utc};
use envoy_types::pb::envoy::config::core::v3::{data_source, DataSource};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    secret, Secret, TlsCertificate,
};
use tracing::debug;

/// How the TLS material of a VirtualService is selected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsType {
    SecretRef(NamespacedName),
    AutoDiscovery,
}

impl TlsType {
    pub fn from_config(config: &TlsConfig, namespace: &str) -> Result<Self> {
        match (&config.secret_ref, config.auto_discovery) {
            (Some(_), Some(true)) => Err(Error::conflict(
                "TLS configuration conflict: cannot use both secretRef and autoDiscovery simultaneously",
            )),
            (Some(reference), _) => Ok(Self::SecretRef(reference.resolve(namespace))),
            (None, Some(true)) => Ok(Self::AutoDiscovery),
            (None, Some(false)) => Err(Error::invalid_field(
                "invalid TLS configuration: cannot use autoDiscovery=false without specifying secretRef",
                "tlsConfig",
            )),
            (None, None) => Err(Error::invalid_field(
                "empty TLS configuration: either secretRef or autoDiscovery must be specified",
                "tlsConfig",
            )),
        }
    }
}

/// `*.rest` for `label.rest`; domains with a single label have no wildcard parent.
pub fn wildcard_parent(domain: &str) -> Option<String> {
    let (_, rest) = domain.split_once('.')?;
    if rest.is_empty() {
        return None;
    }
    Some(format!("*.{}", rest))
}

fn lookup_domain(
    store: &dyn Store,
    domain: &str,
    namespace: &str,
    now: DateTime<Utc>,
) -> Option<KubeSecret> {
    store.best_secret_for_domain(domain, namespace, now).or_else(|| {
        let wildcard = wildcard_parent(domain)?;
        debug!(domain, wildcard = %wildcard, "Falling back to wildcard secret lookup");
        store.best_secret_for_domain(&wildcard, namespace, now)
    })
}

fn inline_bytes(bytes: &[u8]) -> DataSource {
    DataSource {
        specifier: Some(data_source::Specifier::InlineBytes(bytes.to_vec())),
        ..Default::default()
    }
}

#[derive(Debug, Default)]
pub struct DefaultTlsBuilder;

impl DefaultTlsBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl TlsBuilder for DefaultTlsBuilder {
    fn resolve_secrets(
        &self,
        vs: &VirtualService,
        domains: &[String],
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> Result<SecretDomains> {
        let config = vs
            .spec
            .tls_config
            .as_ref()
            .ok_or_else(|| Error::invalid_field("tls config is empty", "tlsConfig"))?;

        let mut secrets = SecretDomains::new();
        match TlsType::from_config(config, vs.namespace())? {
            TlsType::SecretRef(id) => {
                secrets.insert(id, domains.to_vec());
            }
            TlsType::AutoDiscovery => {
                for domain in domains {
                    let secret = lookup_domain(store, domain, vs.namespace(), now).ok_or_else(|| {
                        Error::missing("secret", format!("can't find secret for domain {}", domain))
                    })?;
                    secrets.entry(secret.metadata.namespaced_name()).or_default().push(domain.clone());
                }
            }
        }

        debug!(vs = %vs.metadata.namespaced_name(), secrets = secrets.len(), "Resolved TLS secrets");
        Ok(secrets)
    }

    fn build_secret(&self, id: &NamespacedName, store: &dyn Store) -> Result<Secret> {
        let kube_secret = store
            .get_secret(id)
            .ok_or_else(|| Error::missing("secret", format!("Kubernetes secret {} not found", id)))?;

        if kube_secret.secret_type != SECRET_TYPE_TLS && kube_secret.secret_type != SECRET_TYPE_OPAQUE {
            return Err(Error::invalid(format!(
                "unsupported secret type {} for secret {}",
                kube_secret.secret_type, id
            )));
        }

        let certificate = kube_secret
            .get(TLS_CERT_KEY)
            .filter(|data| !data.is_empty())
            .ok_or_else(|| Error::invalid(format!("certificate data not found in secret {}", id)))?;
        let private_key = kube_secret
            .get(TLS_PRIVATE_KEY_KEY)
            .filter(|data| !data.is_empty())
            .ok_or_else(|| Error::invalid(format!("private key data not found in secret {}", id)))?;

        let secret = Secret {
            name: id.to_string(),
            r#type: Some(secret::Type::TlsCertificate(TlsCertificate {
                certificate_chain: Some(inline_bytes(certificate)),
                private_key: Some(inline_bytes(private_key)),
                ..Default::default()
            })),
        };
        validate_secret(&secret)?;
        Ok(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ResourceRef, DOMAINS_ANNOTATION};
    use crate::errors::ErrorKind;
    use crate::store::MemoryStore;

    fn annotated(namespace: &str, name: &str, domains: &str) -> KubeSecret {
        let mut secret = KubeSecret::tls(namespace, name, b"cert".to_vec(), b"key".to_vec());
        secret.metadata.annotations.insert(DOMAINS_ANNOTATION.to_string(), domains.to_string());
        secret
    }

    fn vs_with(config: TlsConfig) -> VirtualService {
        let mut vs = VirtualService::new("default", "vs");
        vs.spec.tls_config = Some(config);
        vs
    }

    fn auto() -> TlsConfig {
        TlsConfig { secret_ref: None, auto_discovery: Some(true) }
    }

    fn domains(list: &[&str]) -> Vec<String> {
        list.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_tls_type_exclusivity() {
        let both = TlsConfig { secret_ref: Some(ResourceRef::new("s")), auto_discovery: Some(true) };
        let err = TlsType::from_config(&both, "default").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("cannot use both secretRef and autoDiscovery"));

        let disabled = TlsConfig { secret_ref: None, auto_discovery: Some(false) };
        assert!(TlsType::from_config(&disabled, "default").is_err());
        assert!(TlsType::from_config(&TlsConfig::default(), "default")
            .unwrap_err()
            .to_string()
            .starts_with("empty TLS configuration"));

        let explicit = TlsConfig { secret_ref: Some(ResourceRef::new("s")), auto_discovery: Some(false) };
        assert_eq!(
            TlsType::from_config(&explicit, "default").unwrap(),
            TlsType::SecretRef(NamespacedName::new("default", "s"))
        );
    }

    #[test]
    fn test_wildcard_parent() {
        assert_eq!(wildcard_parent("api.exc.kaasops.io").as_deref(), Some("*.exc.kaasops.io"));
        assert_eq!(wildcard_parent("kaasops.io").as_deref(), Some("*.io"));
        assert_eq!(wildcard_parent("localhost"), None);
    }

    #[test]
    fn test_secret_ref_mode() {
        let config = TlsConfig { secret_ref: Some(ResourceRef::in_namespace("certs", "s")), auto_discovery: None };
        let secrets = DefaultTlsBuilder::new()
            .resolve_secrets(&vs_with(config), &domains(&["a.io", "b.io"]), &MemoryStore::new(), Utc::now())
            .unwrap();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[&NamespacedName::new("certs", "s")], domains(&["a.io", "b.io"]));
    }

    #[test]
    fn test_auto_discovery_groups_and_falls_back_to_wildcard() {
        let mut store = MemoryStore::new();
        store.upsert_secret(annotated("default", "exact", "a.kaasops.io"));
        store.upsert_secret(annotated("default", "wild", "*.kaasops.io"));

        let requested = domains(&["a.kaasops.io", "b.kaasops.io", "c.kaasops.io"]);
        let secrets = DefaultTlsBuilder::new()
            .resolve_secrets(&vs_with(auto()), &requested, &store, Utc::now())
            .unwrap();
        assert_eq!(secrets[&NamespacedName::new("default", "exact")], domains(&["a.kaasops.io"]));
        assert_eq!(
            secrets[&NamespacedName::new("default", "wild")],
            domains(&["b.kaasops.io", "c.kaasops.io"])
        );
    }

    #[test]
    fn test_auto_discovery_miss() {
        let err = DefaultTlsBuilder::new()
            .resolve_secrets(&vs_with(auto()), &domains(&["missing.io"]), &MemoryStore::new(), Utc::now())
            .unwrap_err();
        assert_eq!(err.to_string(), "can't find secret for domain missing.io");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_build_secret() {
        let mut store = MemoryStore::new();
        store.upsert_secret(KubeSecret::tls("default", "s", b"CERT".to_vec(), b"KEY".to_vec()));

        let secret = DefaultTlsBuilder::new().build_secret(&NamespacedName::new("default", "s"), &store).unwrap();
        assert_eq!(secret.name, "default/s");
        let Some(secret::Type::TlsCertificate(cert)) = secret.r#type else {
            panic!("expected a TLS certificate");
        };
        assert_eq!(
            cert.certificate_chain.unwrap().specifier,
            Some(data_source::Specifier::InlineBytes(b"CERT".to_vec()))
        );
    }

    #[test]
    fn test_build_secret_errors() {
        let builder = DefaultTlsBuilder::new();
        let mut store = MemoryStore::new();
        let id = NamespacedName::new("default", "s");

        assert_eq!(
            builder.build_secret(&id, &store).unwrap_err().to_string(),
            "Kubernetes secret default/s not found"
        );

        let mut wrong_type = KubeSecret::tls("default", "s", b"c".to_vec(), b"k".to_vec());
        wrong_type.secret_type = "kubernetes.io/basic-auth".into();
        store.upsert_secret(wrong_type);
        assert_eq!(
            builder.build_secret(&id, &store).unwrap_err().to_string(),
            "unsupported secret type kubernetes.io/basic-auth for secret default/s"
        );

        store.upsert_secret(KubeSecret::tls("default", "s", Vec::new(), b"k".to_vec()));
        assert_eq!(
            builder.build_secret(&id, &store).unwrap_err().to_string(),
            "certificate data not found in secret default/s"
        );

        store.upsert_secret(KubeSecret::tls("default", "s", b"c".to_vec(), Vec::new()));
        assert_eq!(
            builder.build_secret(&id, &store).unwrap_err().to_string(),
            "private key data not found in secret default/s"
        );
    }
}
