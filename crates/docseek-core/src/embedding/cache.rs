//! Embedding caches.
//!
//! - [`EmbeddingCache`]: bounded LRU of full-precision vectors, used by a
//!   single [`EmbeddingProvider`](super::EmbeddingProvider).
//! - [`HybridEmbeddingCache`]: LRU of quantized vectors with an optional
//!   [`ExternalCache`] tier, used by the multi-model
//!   [`EmbeddingSystem`](super::EmbeddingSystem).
//!
//! Both are safe to share across threads; every read-modify-write runs
//! under one mutex.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use lru::LruCache;
use sha2::{Digest, Sha256};

use super::quantize::QuantizedVector;

/// Hex-encoded SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}

/// Thread-safe LRU of embedding vectors keyed by content hash.
pub struct EmbeddingCache {
    entries: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingCache {
    /// Cache holding at most `size` vectors (at least one).
    pub fn new(size: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity(size))),
        }
    }

    /// Cache key for `text` embedded at `dims` dimensions.
    pub fn key(text: &str, dims: usize) -> String {
        format!("{}:{dims}", content_hash(text))
    }

    /// Look up a vector, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        guard.get(key).cloned()
    }

    /// Insert a vector, evicting the least recently used entry when full.
    pub fn put(&self, key: String, vector: Vec<f32>) {
        let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        guard.put(key, vector);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A shared key-value store behind the in-memory cache.
///
/// Payloads are JSON-serialized [`QuantizedVector`]s.
pub trait ExternalCache: Send + Sync {
    /// Fetch a payload. `Ok(None)` on a miss.
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Store a payload, replacing any previous value.
    fn set(&self, key: &str, payload: &str) -> anyhow::Result<()>;
}

/// Two-tier cache of quantized vectors: in-memory LRU in front of an
/// optional [`ExternalCache`].
///
/// Reads go to memory first, then the external tier; external hits are
/// promoted into memory. Writes go to both tiers. External failures are
/// logged and otherwise ignored.
pub struct HybridEmbeddingCache {
    namespace: String,
    memory: Mutex<LruCache<String, QuantizedVector>>,
    external: Option<Box<dyn ExternalCache>>,
}

impl HybridEmbeddingCache {
    pub fn new(max_size: usize, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            memory: Mutex::new(LruCache::new(capacity(max_size))),
            external: None,
        }
    }

    /// Attach an external tier.
    pub fn with_external(mut self, external: Box<dyn ExternalCache>) -> Self {
        self.external = Some(external);
        self
    }

    fn make_key(&self, identifier: &str) -> String {
        format!("{}:{identifier}", self.namespace)
    }

    fn remember(&self, key: String, vector: QuantizedVector) {
        let mut guard = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
        guard.put(key, vector);
    }

    pub fn get(&self, identifier: &str) -> Option<QuantizedVector> {
        let key = self.make_key(identifier);
        {
            let mut guard = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = guard.get(&key) {
                return Some(hit.clone());
            }
        }

        let external = self.external.as_ref()?;
        let raw = match external.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, "external embedding cache read failed: {e:#}");
                return None;
            }
        };
        match serde_json::from_str::<QuantizedVector>(&raw) {
            Ok(vector) => {
                self.remember(key, vector.clone());
                Some(vector)
            }
            Err(e) => {
                tracing::debug!(key = %key, "ignoring malformed cache payload: {e}");
                None
            }
        }
    }

    pub fn set(&self, identifier: &str, vector: QuantizedVector) {
        let key = self.make_key(identifier);
        if let Some(external) = &self.external {
            let written = serde_json::to_string(&vector)
                .map_err(anyhow::Error::from)
                .and_then(|payload| external.set(&key, &payload));
            if let Err(e) = written {
                tracing::warn!(key = %key, "external embedding cache write failed: {e:#}");
            }
        }
        self.remember(key, vector);
    }

    /// Number of vectors held in memory.
    pub fn len(&self) -> usize {
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct MapCache {
        entries: Arc<Mutex<HashMap<String, String>>>,
    }

    impl ExternalCache for MapCache {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        fn set(&self, key: &str, payload: &str) -> anyhow::Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), payload.to_string());
            Ok(())
        }
    }

    struct BrokenCache;

    impl ExternalCache for BrokenCache {
        fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            anyhow::bail!("unreachable store")
        }

        fn set(&self, _key: &str, _payload: &str) -> anyhow::Result<()> {
            anyhow::bail!("unreachable store")
        }
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_key_includes_dims() {
        assert_ne!(EmbeddingCache::key("a", 8), EmbeddingCache::key("a", 16));
    }

    #[test]
    fn test_lru_eviction() {
        let cache = EmbeddingCache::new(2);
        cache.put("a".into(), vec![1.0]);
        cache.put("b".into(), vec![2.0]);
        assert!(cache.get("a").is_some());
        cache.put("c".into(), vec![3.0]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a"), Some(vec![1.0]));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let cache = EmbeddingCache::new(0);
        cache.put("a".into(), vec![1.0]);
        cache.put("b".into(), vec![2.0]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hybrid_memory_only() {
        let cache = HybridEmbeddingCache::new(4, "emb");
        assert!(cache.get("x").is_none());
        cache.set("x", QuantizedVector::Fp32(vec![0.5]));
        assert_eq!(cache.get("x"), Some(QuantizedVector::Fp32(vec![0.5])));
    }

    #[test]
    fn test_hybrid_writes_through_with_namespace() {
        let store = MapCache::default();
        let cache = HybridEmbeddingCache::new(4, "emb").with_external(Box::new(store.clone()));
        cache.set("x", QuantizedVector::Int8(vec![127, -3]));
        let raw = store.entries.lock().unwrap().get("emb:x").cloned();
        assert_eq!(raw.as_deref(), Some(r#"{"precision":"int8","vector":[127,-3]}"#));
    }

    #[test]
    fn test_hybrid_reads_through_and_promotes() {
        let store = MapCache::default();
        store
            .set("emb:y", r#"{"precision":"fp16","vector":[0.25,-0.5]}"#)
            .unwrap();
        let cache = HybridEmbeddingCache::new(4, "emb").with_external(Box::new(store));
        assert!(cache.is_empty());
        assert_eq!(cache.get("y"), Some(QuantizedVector::Fp16(vec![0.25, -0.5])));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hybrid_ignores_malformed_payload() {
        let store = MapCache::default();
        store.set("emb:z", "not json").unwrap();
        let cache = HybridEmbeddingCache::new(4, "emb").with_external(Box::new(store));
        assert!(cache.get("z").is_none());
    }

    #[test]
    fn test_hybrid_tolerates_external_failures() {
        let cache = HybridEmbeddingCache::new(4, "emb").with_external(Box::new(BrokenCache));
        assert!(cache.get("k").is_none());
        cache.set("k", QuantizedVector::Fp32(vec![1.0]));
        assert_eq!(cache.get("k"), Some(QuantizedVector::Fp32(vec![1.0])));
    }
}
