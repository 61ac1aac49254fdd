//! Caching wrapper for any [`Embedder`].
//!
//! Keys are the blake3 hash of model id and text, so a cache shared across
//! model versions never returns a stale vector. FIFO eviction at capacity.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use ragdb_core::error::Result;
use ragdb_core::traits::Embedder;

const DEFAULT_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

struct CacheState {
    map: HashMap<blake3::Hash, Vec<f32>>,
    order: VecDeque<blake3::Hash>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn get(&mut self, key: &blake3::Hash) -> Option<Vec<f32>> {
        let hit = self.map.get(key).cloned();
        if hit.is_some() { self.hits += 1; } else { self.misses += 1; }
        hit
    }

    fn insert(&mut self, key: blake3::Hash, value: Vec<f32>) {
        if self.capacity == 0 || self.map.contains_key(&key) { return; }
        while self.map.len() >= self.capacity {
            let Some(old) = self.order.pop_front() else { break };
            self.map.remove(&old);
        }
        self.order.push_back(key);
        self.map.insert(key, value);
    }
}

pub struct CachedEmbedder<E> {
    inner: E,
    state: Mutex<CacheState>,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E, capacity: usize) -> Self {
        Self { inner, state: Mutex::new(CacheState { map: HashMap::new(), order: VecDeque::new(), capacity, hits: 0, misses: 0 }) }
    }

    pub fn with_default_capacity(inner: E) -> Self { Self::new(inner, DEFAULT_CAPACITY) }

    pub fn inner(&self) -> &E { &self.inner }

    fn key(&self, text: &str) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.inner.model_id().as_bytes());
        hasher.update(&[0]);
        hasher.update(text.as_bytes());
        hasher.finalize()
    }

    pub fn stats(&self) -> CacheStats {
        let s = self.state.lock();
        CacheStats { hits: s.hits, misses: s.misses, entries: s.map.len(), capacity: s.capacity }
    }

    pub fn clear(&self) {
        let mut s = self.state.lock();
        s.map.clear();
        s.order.clear();
    }
}

impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn dim(&self) -> usize { self.inner.dim() }
    fn model_id(&self) -> &str { self.inner.model_id() }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = self.key(text);
        if let Some(v) = self.state.lock().get(&key) { return Ok(v); }
        // lock released while the inner model runs
        let v = self.inner.embed(text)?;
        self.state.lock().insert(key, v.clone());
        Ok(v)
    }
}
