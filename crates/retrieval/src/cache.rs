//! Embedding cache
//!
//! Query texts repeat heavily (operators re-run the same fault description
//! with different hints), so the encoder is wrapped in a small LRU keyed by
//! the text hash. The cache lives for the process lifetime and is shared
//! read-mostly across requests.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::embedder::Embedder;
use crate::RetrievalError;

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Entry {
    stamp: u64,
    vector: Vec<f32>,
}

/// LRU map from text hash to embedding. Recency is tracked with a monotonic
/// stamp per entry; eviction scans for the minimum, which is cheap at the
/// capacities used here (thousands of entries).
struct LruMap {
    capacity: usize,
    clock: u64,
    entries: HashMap<u64, Entry>,
}

impl LruMap {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            clock: 0,
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn get(&mut self, key: u64) -> Option<Vec<f32>> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(&key).map(|e| {
            e.stamp = clock;
            e.vector.clone()
        })
    }

    /// Insert a vector; returns true when an older entry was evicted.
    fn insert(&mut self, key: u64, vector: Vec<f32>) -> bool {
        self.clock += 1;
        let mut evicted = false;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.stamp)
                .map(|(k, _)| *k)
            {
                self.entries.remove(&oldest);
                evicted = true;
            }
        }
        self.entries.insert(
            key,
            Entry {
                stamp: self.clock,
                vector,
            },
        );
        evicted
    }
}

/// Encoder wrapper with a process-lifetime LRU cache.
pub struct CachedEmbedder {
    embedder: Arc<Embedder>,
    lru: Mutex<LruMap>,
    pub stats: CacheStats,
}

impl CachedEmbedder {
    pub fn new(embedder: Arc<Embedder>, capacity: usize) -> Self {
        Self {
            embedder,
            lru: Mutex::new(LruMap::new(capacity)),
            stats: CacheStats::default(),
        }
    }

    /// Default capacity fits every query of a busy day comfortably.
    pub fn with_default_capacity(embedder: Arc<Embedder>) -> Self {
        Self::new(embedder, 10_000)
    }

    fn key(text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }

    /// Embed one text, consulting the cache first.
    pub fn encode_one(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let key = Self::key(text);
        if let Some(vector) = self.lru.lock().get(key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(vector);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let vector = self.embedder.encode_one(text)?;
        if self.lru.lock().insert(key, vector.clone()) {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(vector)
    }

    /// Embed a batch; only uncached texts reach the model.
    pub fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut pending: Vec<(usize, &str)> = Vec::new();

        {
            let mut lru = self.lru.lock();
            for (i, text) in texts.iter().enumerate() {
                match lru.get(Self::key(text)) {
                    Some(v) => {
                        self.stats.hits.fetch_add(1, Ordering::Relaxed);
                        results.push(Some(v));
                    }
                    None => {
                        self.stats.misses.fetch_add(1, Ordering::Relaxed);
                        results.push(None);
                        pending.push((i, *text));
                    }
                }
            }
        }

        if !pending.is_empty() {
            let fresh_texts: Vec<&str> = pending.iter().map(|(_, t)| *t).collect();
            let fresh = self.embedder.encode(&fresh_texts)?;
            let mut lru = self.lru.lock();
            for ((i, text), vector) in pending.into_iter().zip(fresh) {
                if lru.insert(Self::key(text), vector.clone()) {
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                }
                results[i] = Some(vector);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    pub fn dim(&self) -> usize {
        self.embedder.dim()
    }

    pub fn inner(&self) -> &Arc<Embedder> {
        &self.embedder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbeddingConfig;

    fn cached(capacity: usize) -> CachedEmbedder {
        let embedder = Embedder::new(EmbeddingConfig {
            embedding_dim: 32,
            ..EmbeddingConfig::default()
        })
        .expect("embedder");
        CachedEmbedder::new(Arc::new(embedder), capacity)
    }

    #[test]
    fn second_lookup_hits_cache() {
        let cache = cached(16);
        let a = cache.encode_one("刹车异响").expect("encode");
        let b = cache.encode_one("刹车异响").expect("encode");
        assert_eq!(a, b);
        assert_eq!(cache.stats.hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats.misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = cached(2);
        cache.encode_one("a").expect("encode");
        cache.encode_one("b").expect("encode");
        // touch "a" so "b" becomes LRU
        cache.encode_one("a").expect("encode");
        cache.encode_one("c").expect("encode");
        assert_eq!(cache.stats.evictions.load(Ordering::Relaxed), 1);

        // "a" survived, "b" did not
        cache.encode_one("a").expect("encode");
        assert_eq!(cache.stats.hits.load(Ordering::Relaxed), 2);
        cache.encode_one("b").expect("encode");
        assert_eq!(cache.stats.hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn batch_mixes_cached_and_fresh() {
        let cache = cached(16);
        cache.encode_one("x").expect("encode");
        let vecs = cache.encode(&["x", "y"]).expect("encode");
        assert_eq!(vecs.len(), 2);
        assert_eq!(cache.stats.hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats.misses.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn hit_rate_reflects_traffic() {
        let cache = cached(16);
        cache.encode_one("q").expect("encode");
        cache.encode_one("q").expect("encode");
        assert!((cache.stats.hit_rate() - 0.5).abs() < 0.01);
    }
}
