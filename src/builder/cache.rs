//! LRU cache with TTL shared by the builder components.
//!
//! Keys are SHA-256 digests over every input that contributes to the cached
//! value. Values are cloned on the way in and on the way out, so callers can
//! never mutate what another build will read.

use crate::config::CacheConfig;
use indexmap::IndexMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// Hex-encoded SHA-256 cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental builder for a [`CacheKey`].
///
/// Every piece is length-prefixed so that adjacent inputs cannot run together.
#[derive(Clone)]
pub struct KeyHasher {
    hasher: Sha256,
}

impl KeyHasher {
    /// Start a key for the cache section `scope`.
    pub fn new(scope: &str) -> Self {
        let mut hasher = Self { hasher: Sha256::new() };
        hasher.write_str(scope);
        hasher
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn write_str(&mut self, value: &str) -> &mut Self {
        self.write_bytes(value.as_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub fn write_json(&mut self, value: &Value) -> &mut Self {
        // serde_json renders object keys in a stable order
        self.write_str(&value.to_string())
    }

    pub fn write_opt_json(&mut self, value: Option<&Value>) -> &mut Self {
        match value {
            Some(value) => self.write_u64(1).write_json(value),
            None => self.write_u64(0),
        }
    }

    pub fn finish(self) -> CacheKey {
        CacheKey(hex::encode(self.hasher.finalize()))
    }
}

/// Point-in-time counters for one cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub name: &'static str,
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Thread-safe LRU map whose entries also expire after a fixed TTL.
#[derive(Debug)]
pub struct LruCache<V> {
    name: &'static str,
    entries: RwLock<IndexMap<CacheKey, Entry<V>>>,
    capacity: usize,
    ttl: Duration,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> LruCache<V> {
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        Self {
            name,
            entries: RwLock::new(IndexMap::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            ttl,
            enabled: true,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A cache sized from configuration; disabled caches always miss.
    pub fn from_config(name: &'static str, capacity: usize, config: &CacheConfig) -> Self {
        let mut cache = Self::new(name, capacity, config.ttl());
        cache.enabled = config.enabled;
        cache
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // Write lock: a hit moves the entry to the most recently used end
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let fresh = match entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() < self.ttl,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(cache = self.name, "Cache miss");
                return None;
            }
        };

        let Some(entry) = entries.shift_remove(key) else {
            return None;
        };
        if !fresh {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(cache = self.name, "Cache entry expired");
            return None;
        }

        let value = entry.value.clone();
        entries.insert(key.clone(), entry);
        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!(cache = self.name, "Cache hit");
        Some(value)
    }

    pub fn insert(&self, key: CacheKey, value: &V) {
        if !self.enabled {
            return;
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.shift_remove(&key);

        if entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        }
        while entries.len() >= self.capacity {
            entries.shift_remove_index(0);
        }

        entries.insert(key, Entry { value: value.clone(), inserted_at: Instant::now() });
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
        debug!(cache = self.name, "Cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name,
            len: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
