//! HTTP filter chain composition.
//!
//! Order is fixed: the RBAC filter (when configured), inline filters in user
//! order, filters from referenced HttpFilter resources in user order, and the
//! router last. Results are cached on a digest of every contributing input.

use crate::api::VirtualService;
use crate::builder::cache::{CacheStats, KeyHasher, LruCache};
use crate::builder::rbac::{build_rbac_filter, hash_rbac};
use crate::builder::HttpFilterBuilder;
use crate::config::CacheConfig;
use crate::errors::{Error, Result, ResultExt};
use crate::store::Store;
use crate::xds::hcm::HttpFilterSpec;
use crate::xds::typed_config::effective_type_url;
use crate::xds::ROUTER_TYPE_URL;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_filter, HttpFilter,
};
use serde_json::Value;
use tracing::debug;

/// Whether the filter is Envoy's terminal router.
pub fn is_router(filter: &HttpFilter) -> bool {
    match &filter.config_type {
        Some(http_filter::ConfigType::TypedConfig(any)) => effective_type_url(any) == ROUTER_TYPE_URL,
        _ => false,
    }
}

/// Require exactly one router and move it to the end, keeping the others in order.
pub fn ensure_router_last(mut filters: Vec<HttpFilter>) -> Result<Vec<HttpFilter>> {
    let routers: Vec<usize> =
        filters.iter().enumerate().filter(|(_, f)| is_router(f)).map(|(i, _)| i).collect();

    match routers.as_slice() {
        [] => Err(Error::invalid("no router HTTP filter found")),
        [index] => {
            if *index != filters.len() - 1 {
                let router = filters.remove(*index);
                filters.push(router);
            }
            Ok(filters)
        }
        _ => Err(Error::conflict("multiple router HTTP filters found")),
    }
}

fn parse_filter(raw: &Value) -> Result<HttpFilter> {
    HttpFilterSpec::from_json(raw)?.to_envoy()
}

pub struct DefaultHttpFilterBuilder {
    cache: LruCache<Vec<HttpFilter>>,
}

impl DefaultHttpFilterBuilder {
    pub fn new(config: &CacheConfig) -> Self {
        Self { cache: LruCache::from_config("http_filters", config.http_filters_capacity, config) }
    }

    fn cache_key(&self, vs: &VirtualService, store: &dyn Store) -> crate::builder::CacheKey {
        let mut hasher = KeyHasher::new("http_filters");
        hasher.write_str(vs.namespace()).write_str(vs.name());

        match &vs.spec.rbac {
            Some(rbac) => {
                hasher.write_u64(1);
                hash_rbac(&mut hasher, vs, rbac, store);
            }
            None => {
                hasher.write_u64(0);
            }
        }

        hasher.write_u64(vs.spec.http_filters.len() as u64);
        for raw in &vs.spec.http_filters {
            hasher.write_json(raw);
        }

        hasher.write_u64(vs.spec.additional_http_filters.len() as u64);
        for reference in &vs.spec.additional_http_filters {
            let id = reference.resolve(vs.namespace());
            hasher.write_str(&id.to_string());
            match store.get_http_filter(&id) {
                Some(resource) => {
                    hasher.write_u64(resource.spec.len() as u64);
                    for raw in &resource.spec {
                        hasher.write_json(raw);
                    }
                }
                None => {
                    hasher.write_opt_json(None);
                }
            }
        }
        hasher.finish()
    }

    fn build_uncached(&self, vs: &VirtualService, store: &dyn Store) -> Result<Vec<HttpFilter>> {
        let mut filters = Vec::new();

        if let Some(rbac) = &vs.spec.rbac {
            filters.push(build_rbac_filter(vs, rbac, store).context("failed to build RBAC filter")?);
        }

        for (index, raw) in vs.spec.http_filters.iter().enumerate() {
            filters.push(
                parse_filter(raw)
                    .with_context(|| format!("failed to unmarshal HTTP filter [{}]", index))?,
            );
        }

        for reference in &vs.spec.additional_http_filters {
            let id = reference.resolve(vs.namespace());
            let resource =
                store.get_http_filter(&id).ok_or_else(|| Error::not_found("HTTP filter", &id))?;
            for (index, raw) in resource.spec.iter().enumerate() {
                filters.push(
                    parse_filter(raw)
                        .with_context(|| format!("failed to unmarshal HTTP filter {}[{}]", id, index))?,
                );
            }
        }

        ensure_router_last(filters)
    }
}

impl HttpFilterBuilder for DefaultHttpFilterBuilder {
    fn build_http_filters(&self, vs: &VirtualService, store: &dyn Store) -> Result<Vec<HttpFilter>> {
        let key = self.cache_key(vs, store);
        if let Some(filters) = self.cache.get(&key) {
            debug!(vs = %vs.metadata.namespaced_name(), count = filters.len(), "HTTP filters served from cache");
            return Ok(filters);
        }

        let filters = self.build_uncached(vs, store)?;
        self.cache.insert(key, &filters);
        debug!(vs = %vs.metadata.namespaced_name(), count = filters.len(), "Built HTTP filters");
        Ok(filters)
    }

    fn cache_stats(&self) -> Vec<CacheStats> {
        vec![self.cache.stats()]
    }

    fn clear_caches(&self) {
        self.cache.clear();
    }
}
