//! Domain to TLS secret index used by auto-discovery.
//!
//! Secrets announce the domains they serve through the
//! `envoy.kaasops.io/domains` annotation. Several secrets may claim the same
//! domain, so every candidate is kept and the best one is picked at lookup
//! time: a certificate that is still valid beats one whose expiry cannot be
//! read, which beats an expired one; ties go to the caller's namespace and
//! then to the alphabetically first `<ns>/<name>`.

use crate::api::secret::TLS_CERT_KEY;
use crate::api::{KubeSecret, NamespacedName, DOMAINS_ANNOTATION};
use crate::errors::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use x509_parser::pem::parse_x509_pem;

const MAX_DOMAIN_LENGTH: usize = 253;
const MAX_LABEL_LENGTH: usize = 63;

/// Certificate validity class, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CertValidity {
    Expired,
    Unknown,
    Valid,
}

#[derive(Debug, Clone)]
struct Candidate {
    id: NamespacedName,
    not_after: Option<DateTime<Utc>>,
}

impl Candidate {
    fn validity(&self, now: DateTime<Utc>) -> CertValidity {
        match self.not_after {
            None => CertValidity::Unknown,
            Some(not_after) if not_after > now => CertValidity::Valid,
            Some(_) => CertValidity::Expired,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DomainSecretIndex {
    candidates: BTreeMap<String, Vec<Candidate>>,
}

impl DomainSecretIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a secret, replacing whatever it announced before.
    pub fn upsert(&mut self, secret: &KubeSecret) {
        let id = secret.metadata.namespaced_name();
        self.remove(&id);

        let Some(raw) = secret.metadata.annotation(DOMAINS_ANNOTATION) else {
            return;
        };
        let not_after = certificate_not_after(secret);

        for domain in raw.split(',').map(normalize_domain).filter(|d| !d.is_empty()) {
            if let Err(e) = validate_domain_pattern(&domain) {
                warn!(secret = %id, domain = %domain, error = %e, "Skipping invalid domain in secret annotation");
                continue;
            }
            let entry = self.candidates.entry(domain).or_default();
            if !entry.iter().any(|c| c.id == id) {
                entry.push(Candidate { id: id.clone(), not_after });
            }
        }
        debug!(secret = %id, domains = self.candidates.len(), "Indexed secret domains");
    }

    /// Drop a secret from every domain it was a candidate for.
    pub fn remove(&mut self, id: &NamespacedName) {
        self.candidates.retain(|_, entries| {
            entries.retain(|c| &c.id != id);
            !entries.is_empty()
        });
    }

    /// Best secret for `domain` at `now`, preferring `preferred_namespace`
    /// among equally valid certificates.
    pub fn best(
        &self,
        domain: &str,
        preferred_namespace: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<&NamespacedName> {
        let entries = self.candidates.get(&normalize_domain(domain))?;
        entries
            .iter()
            .max_by(|a, b| {
                let preferred = |c: &Candidate| Some(c.id.namespace.as_str()) == preferred_namespace;
                a.validity(now)
                    .cmp(&b.validity(now))
                    .then_with(|| preferred(a).cmp(&preferred(b)))
                    // max_by keeps the greater; reverse so the smaller id wins
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|c| &c.id)
    }

    /// Every indexed domain with its best secret at `now`, ignoring namespace preference.
    pub fn resolved(&self, now: DateTime<Utc>) -> BTreeMap<String, NamespacedName> {
        self.candidates
            .keys()
            .filter_map(|domain| self.best(domain, None, now).map(|id| (domain.clone(), id.clone())))
            .collect()
    }

    /// Candidates whose certificate has expired at `now`.
    ///
    /// Expiry is the only time-dependent input to [`best`](Self::best), so
    /// rankings at two instants agree whenever this count does.
    pub fn expired_count(&self, now: DateTime<Utc>) -> usize {
        self.candidates
            .values()
            .flatten()
            .filter(|c| c.validity(now) == CertValidity::Expired)
            .count()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

fn normalize_domain(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Check a domain pattern: DNS labels, optionally behind a single leading `*.`.
pub fn validate_domain_pattern(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(Error::invalid("domain cannot be empty"));
    }
    if domain.len() > MAX_DOMAIN_LENGTH {
        return Err(Error::invalid(format!("domain {} is longer than {} characters", domain, MAX_DOMAIN_LENGTH)));
    }

    let host = match domain.strip_prefix("*.") {
        Some(rest) => rest,
        None => domain,
    };
    if host.is_empty() {
        return Err(Error::invalid(format!("wildcard domain {} has no labels", domain)));
    }

    for label in host.split('.') {
        let valid = !label.is_empty()
            && label.len() <= MAX_LABEL_LENGTH
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if !valid {
            return Err(Error::invalid(format!("invalid domain {}: bad label '{}'", domain, label)));
        }
    }
    Ok(())
}

/// Expiry of the first certificate in `tls.crt`, if it parses.
fn certificate_not_after(secret: &KubeSecret) -> Option<DateTime<Utc>> {
    let pem_bytes = secret.get(TLS_CERT_KEY)?;
    let (_, pem) = parse_x509_pem(pem_bytes).ok()?;
    let cert = pem.parse_x509().ok()?;
    let timestamp = cert.validity().not_after.timestamp();
    Utc.timestamp_opt(timestamp, 0).single()
}
