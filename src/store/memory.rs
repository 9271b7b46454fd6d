//! In-memory store.
//!
//! Holds the resources the Kubernetes layer has observed. Clusters are
//! converted and validated on insert so that `get_spec_cluster` can hand out
//! ready Envoy messages; secrets keep the domain index current on every
//! insert and delete.

use super::{DomainSecretIndex, NamespacedName, Store, StoreRevision};
use crate::api::{
    AccessLogConfig, Cluster, HttpFilter, KubeSecret, Listener, Manifest, Policy, Route, Tracing,
    VirtualService, VirtualServiceTemplate,
};
use crate::errors::{Error, Result, ResultExt};
use crate::xds::cluster::ClusterSpec;
use crate::xds::validate::validate_cluster;
use envoy_types::pb::envoy::config::cluster::v3::Cluster as EnvoyCluster;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Process-unique store identity. Cloning allocates a fresh one, so a clone
/// never shares a revision with its source.
#[derive(Debug)]
struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::next()
    }
}

impl Clone for InstanceId {
    fn clone(&self) -> Self {
        Self::next()
    }
}

#[derive(Debug, Clone)]
struct StoredCluster {
    resource: Cluster,
    envoy: EnvoyCluster,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    virtual_services: BTreeMap<NamespacedName, VirtualService>,
    templates: BTreeMap<NamespacedName, VirtualServiceTemplate>,
    listeners: BTreeMap<NamespacedName, Listener>,
    clusters: BTreeMap<String, StoredCluster>,
    http_filters: BTreeMap<NamespacedName, HttpFilter>,
    policies: BTreeMap<NamespacedName, Policy>,
    access_logs: BTreeMap<NamespacedName, AccessLogConfig>,
    tracings: BTreeMap<NamespacedName, Tracing>,
    routes: BTreeMap<NamespacedName, Route>,
    secrets: BTreeMap<NamespacedName, KubeSecret>,
    domain_index: DomainSecretIndex,
    instance: InstanceId,
    revision: u64,
}

macro_rules! namespaced_accessors {
    ($field:ident, $ty:ty, $upsert:ident, $delete:ident) => {
        pub fn $upsert(&mut self, resource: $ty) {
            self.bump();
            self.$field.insert(resource.metadata.namespaced_name(), resource);
        }

        pub fn $delete(&mut self, id: &NamespacedName) -> bool {
            let removed = self.$field.remove(id).is_some();
            if removed {
                self.bump();
            }
            removed
        }
    };
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self) {
        self.revision += 1;
    }

    namespaced_accessors!(virtual_services, VirtualService, upsert_virtual_service, delete_virtual_service);
    namespaced_accessors!(templates, VirtualServiceTemplate, upsert_template, delete_template);
    namespaced_accessors!(listeners, Listener, upsert_listener, delete_listener);
    namespaced_accessors!(http_filters, HttpFilter, upsert_http_filter, delete_http_filter);
    namespaced_accessors!(policies, Policy, upsert_policy, delete_policy);
    namespaced_accessors!(access_logs, AccessLogConfig, upsert_access_log, delete_access_log);
    namespaced_accessors!(tracings, Tracing, upsert_tracing, delete_tracing);
    namespaced_accessors!(routes, Route, upsert_route, delete_route);

    /// Insert a cluster, keyed by the name Envoy will know it by.
    ///
    /// The blob is converted and validated here; an invalid cluster is rejected
    /// and the store is left unchanged.
    pub fn upsert_cluster(&mut self, resource: Cluster) -> Result<()> {
        let name = resource.envoy_name().to_string();
        let mut spec = ClusterSpec::from_json(&resource.spec)
            .with_context(|| format!("cluster {}", resource.metadata.namespaced_name()))?;
        if spec.name.is_empty() {
            spec.name = name.clone();
        }
        let envoy = spec
            .to_envoy()
            .with_context(|| format!("cluster {}", resource.metadata.namespaced_name()))?;
        validate_cluster(&envoy)?;

        debug!(cluster = %name, "Stored cluster");
        self.bump();
        self.clusters.insert(name, StoredCluster { resource, envoy });
        Ok(())
    }

    pub fn delete_cluster(&mut self, name: &str) -> bool {
        let removed = self.clusters.remove(name).is_some();
        if removed {
            self.bump();
        }
        removed
    }

    /// Insert a secret and re-index the domains it announces.
    pub fn upsert_secret(&mut self, secret: KubeSecret) {
        let secret = secret.normalized();
        self.domain_index.upsert(&secret);
        self.bump();
        self.secrets.insert(secret.metadata.namespaced_name(), secret);
    }

    pub fn delete_secret(&mut self, id: &NamespacedName) -> bool {
        let removed = self.secrets.remove(id).is_some();
        if removed {
            self.domain_index.remove(id);
            self.bump();
        }
        removed
    }

    pub fn get_virtual_service(&self, id: &NamespacedName) -> Option<VirtualService> {
        self.virtual_services.get(id).cloned()
    }

    pub fn virtual_services(&self) -> impl Iterator<Item = &VirtualService> {
        self.virtual_services.values()
    }

    /// Raw cluster resource as it was inserted.
    pub fn get_cluster_resource(&self, name: &str) -> Option<Cluster> {
        self.clusters.get(name).map(|stored| stored.resource.clone())
    }

    /// Insert one manifest of any kind.
    pub fn apply(&mut self, manifest: Manifest) -> Result<()> {
        match manifest {
            Manifest::VirtualService(vs) => self.upsert_virtual_service(vs),
            Manifest::VirtualServiceTemplate(t) => self.upsert_template(t),
            Manifest::Listener(l) => self.upsert_listener(l),
            Manifest::Cluster(c) => self.upsert_cluster(c)?,
            Manifest::HttpFilter(f) => self.upsert_http_filter(f),
            Manifest::Policy(p) => self.upsert_policy(p),
            Manifest::AccessLogConfig(a) => self.upsert_access_log(a),
            Manifest::Tracing(t) => self.upsert_tracing(t),
            Manifest::Route(r) => self.upsert_route(r),
            Manifest::Secret(s) => self.upsert_secret(s),
        }
        Ok(())
    }

    /// Load a multi-document YAML stream of manifests; returns how many were applied.
    pub fn apply_yaml(&mut self, yaml: &str) -> Result<usize> {
        let mut applied = 0;
        for (index, document) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
            let manifest = Manifest::deserialize(document)
                .map_err(|e| Error::invalid(format!("invalid manifest #{}: {}", index, e)))?;
            let kind = manifest.kind();
            self.apply(manifest)
                .with_context(|| format!("failed to apply {} manifest #{}", kind, index))?;
            applied += 1;
        }
        info!(applied, revision = self.revision, "Applied manifests to store");
        Ok(applied)
    }
}

impl Store for MemoryStore {
    fn get_virtual_service_template(&self, id: &NamespacedName) -> Option<VirtualServiceTemplate> {
        self.templates.get(id).cloned()
    }

    fn get_listener(&self, id: &NamespacedName) -> Option<Listener> {
        self.listeners.get(id).cloned()
    }

    fn get_spec_cluster(&self, name: &str) -> Option<EnvoyCluster> {
        self.clusters.get(name).map(|stored| stored.envoy.clone())
    }

    fn get_http_filter(&self, id: &NamespacedName) -> Option<HttpFilter> {
        self.http_filters.get(id).cloned()
    }

    fn get_policy(&self, id: &NamespacedName) -> Option<Policy> {
        self.policies.get(id).cloned()
    }

    fn get_access_log(&self, id: &NamespacedName) -> Option<AccessLogConfig> {
        self.access_logs.get(id).cloned()
    }

    fn get_tracing(&self, id: &NamespacedName) -> Option<Tracing> {
        self.tracings.get(id).cloned()
    }

    fn get_route(&self, id: &NamespacedName) -> Option<Route> {
        self.routes.get(id).cloned()
    }

    fn get_secret(&self, id: &NamespacedName) -> Option<KubeSecret> {
        self.secrets.get(id).cloned()
    }

    fn map_domain_secrets(&self, now: DateTime<Utc>) -> BTreeMap<String, KubeSecret> {
        self.domain_index
            .resolved(now)
            .into_iter()
            .filter_map(|(domain, id)| self.secrets.get(&id).map(|s| (domain, s.clone())))
            .collect()
    }

    fn best_secret_for_domain(
        &self,
        domain: &str,
        preferred_namespace: &str,
        now: DateTime<Utc>,
    ) -> Option<KubeSecret> {
        self.domain_index
            .best(domain, Some(preferred_namespace), now)
            .and_then(|id| self.secrets.get(id))
            .cloned()
    }

    fn revision(&self) -> StoreRevision {
        StoreRevision { instance: self.instance.0, mutations: self.revision }
    }

    fn expired_certificates(&self, now: DateTime<Utc>) -> usize {
        self.domain_index.expired_count(now)
    }
}
