//! # Build orchestration
//!
//! [`Builder::build`] expands the template, loads the listener and then runs
//! one of two pipelines:
//!
//! - **filter-chains mode** when the listener already declares filter
//!   chains: the VirtualService may only contribute targeting metadata, and
//!   the clusters those chains reference are resolved.
//! - **virtual-service mode** otherwise: HTTP filters, the route
//!   configuration, TLS secrets, filter chains and clusters are all derived
//!   from the VirtualService.
//!
//! Whole builds are cached on the VirtualService identity, generation, spec,
//! the store revision and how many indexed certificates have expired at the
//! evaluation time. Targeting metadata (node ids, access group) is read from
//! the VirtualService on every call and never comes from the cache.

use crate::api::{NamespacedName, VirtualService, VirtualServiceStatus};
use crate::builder::access_log::DefaultAccessLogBuilder;
use crate::builder::cache::{CacheStats, KeyHasher, LruCache};
use crate::builder::clusters::DefaultClusterExtractor;
use crate::builder::filter_chains::DefaultFilterChainBuilder;
use crate::builder::http_filters::DefaultHttpFilterBuilder;
use crate::builder::routing::DefaultRoutingBuilder;
use crate::builder::template::apply_template;
use crate::builder::tls::DefaultTlsBuilder;
use crate::builder::{
    AccessLogBuilder, ClusterExtractor, FilterChainBuilder, HttpFilterBuilder, Resources,
    RoutingBuilder, SecretDomains, TlsBuilder,
};
use crate::config::{BuilderConfig, CacheConfig};
use crate::errors::{Error, Result, ResultExt};
use crate::store::Store;
use crate::xds::listener::{is_tls_listener, ListenerSpec};
use crate::{build_span, phase_span};
use chrono::{DateTime, Utc};
use envoy_types::pb::envoy::config::listener::v3::Listener;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, info};

/// Which pipeline produced a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// The listener declares its own filter chains
    FilterChains,
    /// Filter chains are generated from the VirtualService
    VirtualService,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::FilterChains => "filter_chains",
            BuildMode::VirtualService => "virtual_service",
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful build
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutput {
    pub mode: BuildMode,
    pub resources: Resources,
    /// Non-fatal notices for the VirtualService status
    pub advisories: Vec<String>,
}

impl BuildOutput {
    /// Status to write back to the VirtualService after this build.
    pub fn status(&self) -> VirtualServiceStatus {
        VirtualServiceStatus::valid(self.advisories.join("; "))
    }
}

/// Status for a failed build; only the innermost cause is reported.
pub fn status_for_error(err: &Error) -> VirtualServiceStatus {
    VirtualServiceStatus::invalid(err.root_cause().to_string())
}

/// The capability set the orchestrator runs.
pub struct Components {
    pub http_filters: Box<dyn HttpFilterBuilder>,
    pub routing: Box<dyn RoutingBuilder>,
    pub tls: Box<dyn TlsBuilder>,
    pub clusters: Box<dyn ClusterExtractor>,
    pub filter_chains: Box<dyn FilterChainBuilder>,
    pub access_logs: Box<dyn AccessLogBuilder>,
}

impl Components {
    /// The default implementations, with caches sized from `config`.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            http_filters: Box::new(DefaultHttpFilterBuilder::new(config)),
            routing: Box::new(DefaultRoutingBuilder::new()),
            tls: Box::new(DefaultTlsBuilder::new()),
            clusters: Box::new(DefaultClusterExtractor::new(config)),
            filter_chains: Box::new(DefaultFilterChainBuilder::new()),
            access_logs: Box::new(DefaultAccessLogBuilder::new()),
        }
    }
}

pub struct Builder {
    components: Components,
    resources: LruCache<BuildOutput>,
}

impl Builder {
    pub fn new(config: &BuilderConfig) -> Self {
        Self::from_components(Components::new(&config.cache), &config.cache)
    }

    pub fn from_components(components: Components, config: &CacheConfig) -> Self {
        Self {
            components,
            resources: LruCache::from_config("resources", config.resources_capacity, config),
        }
    }

    /// Build every resource serving `vs`, ranking certificates at the current time.
    ///
    /// `vs` is never modified; use [`BuildOutput::status`] or
    /// [`status_for_error`] to update its status. Panics raised while
    /// building are reported as internal errors.
    pub fn build(&self, vs: &VirtualService, store: &dyn Store) -> Result<BuildOutput> {
        self.build_at(vs, store, Utc::now())
    }

    /// Like [`build`](Self::build), with certificate expiry evaluated at `now`.
    pub fn build_at(
        &self,
        vs: &VirtualService,
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> Result<BuildOutput> {
        let span = build_span!(vs.namespace(), vs.name(), vs.metadata.generation);
        let _guard = span.enter();

        let outcome = catch_unwind(AssertUnwindSafe(|| self.build_cached(vs, store, now)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "Recovered panic while building resources");
                Err(Error::internal(format!("panic while building resources: {}", message)))
            });

        match outcome {
            Ok(output) => {
                span.record("mode", output.mode.as_str());
                Ok(output)
            }
            Err(e) => {
                debug!(error = %e, "Resource build failed");
                Err(e.wrap("MainBuilder.BuildResources failed"))
            }
        }
    }

    /// Statistics for every cache owned by this builder.
    pub fn cache_stats(&self) -> Vec<CacheStats> {
        let mut stats = vec![self.resources.stats()];
        stats.extend(self.components.http_filters.cache_stats());
        stats.extend(self.components.clusters.cache_stats());
        stats
    }

    pub fn clear_caches(&self) {
        self.resources.clear();
        self.components.http_filters.clear_caches();
        self.components.clusters.clear_caches();
    }

    fn build_cached(
        &self,
        vs: &VirtualService,
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> Result<BuildOutput> {
        if vs.name().is_empty() {
            return Err(Error::invalid_field("virtual service name is empty", "metadata.name"));
        }

        let spec = serde_json::to_value(&vs.spec)
            .map_err(|e| Error::json("failed to serialize virtual service spec", e))?;
        let revision = store.revision();
        let mut hasher = KeyHasher::new("resources");
        hasher
            .write_str(vs.name())
            .write_str(vs.namespace())
            .write_u64(vs.metadata.generation.max(0) as u64)
            .write_json(&spec)
            .write_u64(revision.instance)
            .write_u64(revision.mutations)
            .write_u64(store.expired_certificates(now) as u64);
        let key = hasher.finish();

        let mut output = match self.resources.get(&key) {
            Some(output) => {
                debug!("Resources served from cache");
                output
            }
            None => {
                let output = self.build_uncached(vs, store, now)?;
                self.resources.insert(key, &output);
                info!(
                    mode = %output.mode,
                    filter_chains = output.resources.filter_chains.len(),
                    clusters = output.resources.clusters.len(),
                    secrets = output.resources.secrets.len(),
                    "Built resources"
                );
                output
            }
        };

        output.resources.node_ids = vs.node_ids();
        output.resources.access_group = vs.access_group();
        Ok(output)
    }

    fn build_uncached(
        &self,
        vs: &VirtualService,
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> Result<BuildOutput> {
        let expanded = self.expand_template(vs, store).context("failed to apply template")?;
        let vs = &expanded;

        let listener_id = vs
            .spec
            .listener
            .as_ref()
            .map(|reference| reference.resolve(vs.namespace()))
            .ok_or_else(|| Error::invalid_field("listener is empty", "listener"))?;
        let listener = self.load_listener(&listener_id, store).context("failed to build listener")?;

        let (mode, resources, advisories) = if listener.filter_chains.is_empty() {
            let (resources, advisories) = self
                .build_from_virtual_service(vs, &listener, listener_id, store, now)
                .context("failed to build resources from virtual service")?;
            (BuildMode::VirtualService, resources, advisories)
        } else {
            let resources = self.build_from_filter_chains(vs, listener, listener_id, store)?;
            (BuildMode::FilterChains, resources, Vec::new())
        };

        Ok(BuildOutput { mode, resources, advisories })
    }

    fn expand_template(&self, vs: &VirtualService, store: &dyn Store) -> Result<VirtualService> {
        let Some(reference) = &vs.spec.template else {
            return Ok(vs.clone());
        };
        let _phase = phase_span!("template").entered();

        let id = reference.resolve(vs.namespace());
        let template = store
            .get_virtual_service_template(&id)
            .ok_or_else(|| Error::not_found("virtual service template", &id))?;
        apply_template(vs, &template)
    }

    fn load_listener(&self, id: &NamespacedName, store: &dyn Store) -> Result<Listener> {
        let resource = store.get_listener(id).ok_or_else(|| Error::not_found("listener", id))?;
        ListenerSpec::from_json(&resource.spec)
            .and_then(|spec| spec.to_envoy(&id.to_string()))
            .with_context(|| format!("failed to unmarshal listener {}", id))
    }

    fn build_from_filter_chains(
        &self,
        vs: &VirtualService,
        listener: Listener,
        listener_id: NamespacedName,
        store: &dyn Store,
    ) -> Result<Resources> {
        let _phase = phase_span!("filter_chains", chains = listener.filter_chains.len()).entered();

        self.components
            .filter_chains
            .check_filter_chain_conflicts(vs)
            .context("filter chain conflicts")?;

        let clusters = self
            .components
            .clusters
            .clusters_for_filter_chains(&listener.filter_chains, store)
            .context("failed to extract clusters from filter chains")?;

        Ok(Resources {
            listener: listener_id,
            filter_chains: listener.filter_chains,
            clusters,
            ..Default::default()
        })
    }

    fn build_from_virtual_service(
        &self,
        vs: &VirtualService,
        listener: &Listener,
        listener_id: NamespacedName,
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> Result<(Resources, Vec<String>)> {
        let c = &self.components;

        let http_filters = {
            let _phase = phase_span!("http_filters").entered();
            c.http_filters.build_http_filters(vs, store).context("failed to build HTTP filters")?
        };

        let (virtual_host, route_config) = {
            let _phase = phase_span!("routing").entered();
            c.routing
                .build_route_configuration(vs, listener, store)
                .context("failed to build route configuration")?
        };
        let domains = virtual_host.domains.clone();

        let access_logs = c.access_logs.build_access_logs(vs, store).context("failed to build access logs")?;

        let is_tls = is_tls_listener(listener);
        let secret_domains = match (is_tls, &vs.spec.tls_config) {
            (true, None) => {
                return Err(Error::conflict("tls listener not configured, virtual service has not tls config"))
            }
            (false, Some(_)) => {
                return Err(Error::conflict("listener is not tls, virtual service has tls config"))
            }
            (true, Some(_)) => {
                let _phase = phase_span!("tls", domains = domains.len()).entered();
                c.tls.resolve_secrets(vs, &domains, store, now).context("failed to resolve TLS secrets")?
            }
            (false, None) => SecretDomains::new(),
        };

        let params = c
            .filter_chains
            .build_filter_chain_params(vs, http_filters, access_logs.logs, is_tls, secret_domains, store)
            .context("failed to build filter chain parameters")?;
        let filter_chains = c.filter_chains.build_filter_chains(&params).context("failed to build filter chains")?;

        let clusters = {
            let _phase = phase_span!("clusters").entered();
            c.clusters
                .clusters_for_virtual_service(vs, &virtual_host, &params.http_filters, &params.access_logs, store)
                .context("failed to extract clusters")?
        };

        let used_secrets: Vec<NamespacedName> = params.secret_domains.keys().cloned().collect();
        let secrets = used_secrets
            .iter()
            .map(|id| c.tls.build_secret(id, store).with_context(|| format!("failed to build secret {}", id)))
            .collect::<Result<Vec<_>>>()?;

        let resources = Resources {
            listener: listener_id,
            filter_chains,
            route_config: Some(route_config),
            clusters,
            secrets,
            used_secrets,
            domains,
            ..Default::default()
        };
        Ok((resources, access_logs.advisories))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
