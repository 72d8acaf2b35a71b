//! Embedding layer: traits, the cached provider and vector utilities.
//!
//! Two traits split the concerns:
//!
//! - [`Embedder`] is what the search pipeline consumes. It never fails:
//!   every input text gets an L2-normalized vector.
//! - [`EmbeddingBackend`] is a remote service (Ollama, OpenAI, ...) that
//!   may fail. Implementations live in the `docseek` app crate.
//!
//! [`EmbeddingProvider`] bridges the two. It selects a backend once at
//! construction, caches vectors by content hash and substitutes the
//! deterministic [`hash_embedding`] whenever the backend errors out.
//!
//! The multi-model layer lives in [`ensemble`], with quantized storage in
//! [`quantize`] and the caches in [`cache`].

pub mod cache;
pub mod ensemble;
pub mod quantize;

use sha2::{Digest, Sha256};

use crate::tokenize::word_tokens;

pub use cache::{content_hash, EmbeddingCache, ExternalCache, HybridEmbeddingCache};
pub use ensemble::{
    EmbedderFactory, EmbeddingModelConfig, EmbeddingQuality, EmbeddingRun, EmbeddingRunMetrics,
    EmbeddingSystem, EnsembleStrategy,
};
pub use quantize::{Precision, QuantizedVector};

/// Default model label of the deterministic provider.
pub const DEFAULT_MODEL: &str = "hash";
/// Default vector dimensionality.
pub const DEFAULT_DIMS: usize = 384;
/// Default number of cached vectors.
pub const DEFAULT_CACHE_SIZE: usize = 2048;

/// Turns text into normalized vectors for semantic scoring.
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed `texts`, one vector per input, in input order.
    fn embed(&self, texts: &[String]) -> Vec<Vec<f32>>;

    /// Embed with a named ensemble strategy. Single-model embedders ignore
    /// the strategy.
    fn embed_with_strategy(&self, texts: &[String], strategy: &str) -> Vec<Vec<f32>> {
        let _ = strategy;
        self.embed(texts)
    }

    /// Quality indicators for a batch this embedder produced, if supported.
    fn quality_report(&self, vectors: &[Vec<f32>]) -> Option<EmbeddingQuality> {
        let _ = vectors;
        None
    }
}

/// A remote embedding service.
///
/// Errors are never surfaced to search callers; [`EmbeddingProvider`]
/// logs them and falls back to [`hash_embedding`].
pub trait EmbeddingBackend: Send + Sync {
    /// Short backend label for logs (e.g. `"ollama"`).
    fn name(&self) -> &str;

    /// Check the service is usable. Called once when a provider is built.
    fn probe(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Embed a batch of texts. Must return one vector per input, each of
    /// the provider's configured dimension.
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

enum Backend {
    Remote(Box<dyn EmbeddingBackend>),
    Deterministic,
}

/// Cached single-model embedder with an optional remote backend.
pub struct EmbeddingProvider {
    model: String,
    dims: usize,
    backend: Backend,
    cache: EmbeddingCache,
}

impl EmbeddingProvider {
    /// Provider that only uses the deterministic hash embedding.
    pub fn deterministic(model: impl Into<String>, dims: usize, cache_size: usize) -> Self {
        Self {
            model: model.into(),
            dims,
            backend: Backend::Deterministic,
            cache: EmbeddingCache::new(cache_size),
        }
    }

    /// Provider backed by a remote service.
    ///
    /// The backend is probed once here. If the probe fails the provider
    /// runs deterministically for its whole lifetime.
    pub fn with_backend(
        model: impl Into<String>,
        dims: usize,
        cache_size: usize,
        backend: Box<dyn EmbeddingBackend>,
    ) -> Self {
        let model = model.into();
        let backend = match backend.probe() {
            Ok(()) => Backend::Remote(backend),
            Err(e) => {
                tracing::warn!(
                    backend = backend.name(),
                    model = %model,
                    "embedding backend unavailable, using hash embeddings: {e:#}"
                );
                Backend::Deterministic
            }
        };
        Self {
            model,
            dims,
            backend,
            cache: EmbeddingCache::new(cache_size),
        }
    }

    /// Returns `true` when a remote backend passed its probe.
    pub fn is_remote(&self) -> bool {
        matches!(self.backend, Backend::Remote(_))
    }

    /// The provider's vector cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    fn fetch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let fallback = || texts.iter().map(|t| hash_embedding(t, self.dims)).collect();
        match &self.backend {
            Backend::Deterministic => fallback(),
            Backend::Remote(backend) => match backend.embed_batch(texts) {
                Ok(vectors) if vectors.len() == texts.len() => {
                    match vectors.iter().find(|v| v.len() != self.dims) {
                        Some(wrong) => {
                            tracing::warn!(
                                backend = backend.name(),
                                expected = self.dims,
                                got = wrong.len(),
                                "embedding dimension mismatch, using hash embeddings"
                            );
                            fallback()
                        }
                        None => vectors,
                    }
                }
                Ok(vectors) => {
                    tracing::warn!(
                        backend = backend.name(),
                        expected = texts.len(),
                        got = vectors.len(),
                        "embedding count mismatch, using hash embeddings"
                    );
                    fallback()
                }
                Err(e) => {
                    tracing::warn!(
                        backend = backend.name(),
                        "embedding request failed, using hash embeddings: {e:#}"
                    );
                    fallback()
                }
            },
        }
    }
}

impl Embedder for EmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let texts: Vec<String> = texts.iter().map(|t| t.trim().to_string()).collect();
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut missing: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let cached = self.cache.get(&EmbeddingCache::key(text, self.dims));
            if cached.is_none() {
                missing.push(i);
            }
            results.push(cached);
        }

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.fetch(&batch);
            for (&i, vector) in missing.iter().zip(fresh) {
                let mut vector = l2_normalize(vector);
                if vector.is_empty() {
                    vector = hash_embedding(&texts[i], self.dims);
                }
                self.cache
                    .put(EmbeddingCache::key(&texts[i], self.dims), vector.clone());
                results[i] = Some(vector);
            }
        }

        results
            .into_iter()
            .map(|v| v.unwrap_or_else(|| unit_vector(self.dims)))
            .collect()
    }
}

/// Deterministic bag-of-tokens embedding.
///
/// Each token's SHA-256 digest adds `byte / 255 · 2 − 1` to every
/// dimension (cycling through the 32 digest bytes). The sum is
/// L2-normalized. Text without tokens maps to [`unit_vector`].
pub fn hash_embedding(text: &str, dims: usize) -> Vec<f32> {
    let tokens = word_tokens(text);
    if tokens.is_empty() {
        return unit_vector(dims);
    }
    let mut vector = vec![0.0f64; dims];
    for token in &tokens {
        let digest = Sha256::digest(token.as_bytes());
        for (i, slot) in vector.iter_mut().enumerate() {
            let byte = digest[i % digest.len()] as f64;
            *slot += byte / 255.0 * 2.0 - 1.0;
        }
    }
    l2_normalize(vector.into_iter().map(|x| x as f32).collect())
}

/// `[1, 0, 0, ...]` of length `dims`; empty when `dims` is 0.
pub fn unit_vector(dims: usize) -> Vec<f32> {
    let mut v = vec![0.0; dims];
    if let Some(first) = v.first_mut() {
        *first = 1.0;
    }
    v
}

/// Scale `vector` to unit length. A zero vector stays zero.
pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
    vector
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    struct CountingBackend {
        calls: Arc<AtomicUsize>,
        batch_sizes: Arc<std::sync::Mutex<Vec<usize>>>,
    }

    impl EmbeddingBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(texts.len());
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    struct FailingBackend {
        fail_probe: bool,
    }

    impl EmbeddingBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        fn probe(&self) -> anyhow::Result<()> {
            if self.fail_probe {
                anyhow::bail!("connection refused");
            }
            Ok(())
        }

        fn embed_batch(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("service error")
        }
    }

    /// Succeeds on the first call, then fails every time.
    struct FlakyBackend {
        dims: usize,
        calls: AtomicUsize,
    }

    impl EmbeddingBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                anyhow::bail!("service went away");
            }
            Ok(texts.iter().map(|_| vec![0.5; self.dims]).collect())
        }
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_hash_embedding_deterministic_and_normalized() {
        let a = hash_embedding("Eldertown is the capital", 64);
        let b = hash_embedding("Eldertown is the capital", 64);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!((norm(&a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedding_empty_is_unit_vector() {
        assert_eq!(hash_embedding("  ¿?  ", 4), vec![1.0, 0.0, 0.0, 0.0]);
        assert!(hash_embedding("", 0).is_empty());
    }

    #[test]
    fn test_hash_embedding_case_insensitive() {
        assert_eq!(hash_embedding("Harbour", 16), hash_embedding("harbour", 16));
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
        assert_eq!(l2_normalize(vec![3.0, 4.0]), vec![0.6, 0.8]);
    }

    #[test]
    fn test_deterministic_provider() {
        let provider = EmbeddingProvider::deterministic("hash", 32, 16);
        assert!(!provider.is_remote());
        let vectors = provider.embed(&texts(&["  alpha beta ", "alpha beta", ""]));
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[1]);
        assert_eq!(vectors[2], unit_vector(32));
        assert!(provider.embed(&[]).is_empty());
    }

    #[test]
    fn test_provider_queries_backend_for_misses_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let batch_sizes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let provider = EmbeddingProvider::with_backend(
            "remote",
            2,
            16,
            Box::new(CountingBackend {
                calls: calls.clone(),
                batch_sizes: batch_sizes.clone(),
            }),
        );
        assert!(provider.is_remote());

        let first = provider.embed(&texts(&["one", "three"]));
        let second = provider.embed(&texts(&["three", "fives"]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*batch_sizes.lock().unwrap(), vec![2, 1]);
        assert_eq!(first[1], second[0]);
        assert!((norm(&second[1]) - 1.0).abs() < 1e-6);

        provider.embed(&texts(&["one", "fives"]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_provider_falls_back_on_backend_error() {
        let provider =
            EmbeddingProvider::with_backend("remote", 16, 8, Box::new(FailingBackend { fail_probe: false }));
        assert!(provider.is_remote());
        let vectors = provider.embed(&texts(&["harbour district"]));
        assert_eq!(vectors[0], hash_embedding("harbour district", 16));
    }

    #[test]
    fn test_wrong_dimension_response_falls_back() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = EmbeddingProvider::with_backend(
            "remote",
            16,
            8,
            Box::new(CountingBackend {
                calls: calls.clone(),
                batch_sizes: Arc::new(std::sync::Mutex::new(Vec::new())),
            }),
        );
        let vectors = provider.embed(&texts(&["harbour district", "old walls"]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(vectors[0], hash_embedding("harbour district", 16));
        assert!(vectors.iter().all(|v| v.len() == provider.dims()));
    }

    #[test]
    fn test_dimension_stable_after_backend_failure() {
        let provider = EmbeddingProvider::with_backend(
            "remote",
            16,
            8,
            Box::new(FlakyBackend {
                dims: 16,
                calls: AtomicUsize::new(0),
            }),
        );
        let first = provider.embed(&texts(&["eldertown"]));
        let second = provider.embed(&texts(&["harbour"]));
        assert_eq!(first[0].len(), 16);
        assert_eq!(second[0].len(), 16);
        assert_eq!(second[0], hash_embedding("harbour", 16));
        assert!(cosine_similarity(&first[0], &second[0]) != 0.0);
    }

    #[test]
    fn test_failed_probe_selects_deterministic() {
        let provider =
            EmbeddingProvider::with_backend("remote", 16, 8, Box::new(FailingBackend { fail_probe: true }));
        assert!(!provider.is_remote());
        assert_eq!(provider.model_name(), "remote");
        assert_eq!(provider.dims(), 16);
    }
}
