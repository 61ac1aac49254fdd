//! Search result cache.
//!
//! Entries are keyed by the state version they were read from, so a commit
//! or delete makes every earlier entry unreachable without an explicit
//! invalidation; those age out by TTL or capacity.

use std::time::Duration;

use moka::sync::Cache;

use ragdb_core::config::CacheConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchMode {
    Hybrid,
    Lexical,
    Vector,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub query: String,
    pub mode: SearchMode,
    pub k: usize,
    pub version: u64,
}

impl QueryKey {
    pub fn new(query: &str, mode: SearchMode, k: usize, version: u64) -> Self {
        Self { query: query.to_string(), mode, k, version }
    }
}

/// Bounded, time-limited map from [`QueryKey`] to results. A zero capacity
/// disables it: lookups miss and inserts are dropped.
pub struct QueryCache<V> {
    cache: Option<Cache<QueryKey, V>>,
}

impl<V: Clone + Send + Sync + 'static> QueryCache<V> {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let cache = (capacity > 0).then(|| Cache::builder().max_capacity(capacity).time_to_live(ttl).build());
        Self { cache }
    }

    pub fn from_config(config: &CacheConfig) -> Self { Self::new(config.capacity, Duration::from_secs(config.ttl_secs)) }

    pub fn is_enabled(&self) -> bool { self.cache.is_some() }

    pub fn get(&self, key: &QueryKey) -> Option<V> { self.cache.as_ref().and_then(|c| c.get(key)) }

    pub fn insert(&self, key: QueryKey, value: V) {
        if let Some(c) = &self.cache { c.insert(key, value); }
    }

    /// Approximate; moka applies writes lazily.
    pub fn len(&self) -> u64 { self.cache.as_ref().map_or(0, Cache::entry_count) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn clear(&self) {
        if let Some(c) = &self.cache { c.invalidate_all(); }
    }
}
