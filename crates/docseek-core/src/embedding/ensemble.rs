//! Multi-model embedding ensemble.
//!
//! [`EmbeddingSystem`] combines several named models:
//!
//! - `auto`: the first configured model only.
//! - `stack`: concatenate every model's vector.
//! - `average`: running mean across models, `(prev · i + cur) / (i + 1)`.
//!
//! Each model's vectors are cached in a [`HybridEmbeddingCache`] at the
//! model's storage [`Precision`], keyed by
//! `name:dimension:precision:sha256(text)`. Final vectors are
//! L2-normalized after merging.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use super::cache::{content_hash, HybridEmbeddingCache};
use super::quantize::{Precision, QuantizedVector};
use super::{
    cosine_similarity, l2_normalize, Embedder, EmbeddingProvider, DEFAULT_CACHE_SIZE,
    DEFAULT_DIMS, DEFAULT_MODEL,
};

fn default_weight() -> f64 {
    1.0
}

fn default_dimension() -> usize {
    DEFAULT_DIMS
}

/// One model inside an [`EmbeddingSystem`].
///
/// `weight` and `role` are descriptive; merging treats all models equally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingModelConfig {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub role: Option<String>,
}

impl EmbeddingModelConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: default_weight(),
            dimension: default_dimension(),
            precision: Precision::default(),
            role: None,
        }
    }
}

/// How vectors from several models are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsembleStrategy {
    #[default]
    Auto,
    Stack,
    Average,
}

impl EnsembleStrategy {
    /// Parse a strategy tag. Unknown tags mean `auto`.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "stack" => EnsembleStrategy::Stack,
            "average" => EnsembleStrategy::Average,
            _ => EnsembleStrategy::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnsembleStrategy::Auto => "auto",
            EnsembleStrategy::Stack => "stack",
            EnsembleStrategy::Average => "average",
        }
    }
}

/// Per-model statistics of one [`EmbeddingSystem::embed_with_metrics`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRunMetrics {
    pub model: String,
    pub precision: Precision,
    pub latency_ms: f64,
    pub dimension: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

/// Quick coherence indicators for a batch of vectors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmbeddingQuality {
    pub mean_magnitude: f64,
    pub stdev_magnitude: f64,
    /// Mean cosine over all pairs; `1.0` for fewer than two vectors.
    pub pairwise_cosine: f64,
}

impl EmbeddingQuality {
    /// Measure `vectors`. An empty batch reports all zeros.
    pub fn measure(vectors: &[Vec<f32>]) -> Self {
        if vectors.is_empty() {
            return Self {
                mean_magnitude: 0.0,
                stdev_magnitude: 0.0,
                pairwise_cosine: 0.0,
            };
        }
        let magnitudes: Vec<f64> = vectors
            .iter()
            .map(|v| v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt())
            .collect();
        let n = magnitudes.len() as f64;
        let mean = magnitudes.iter().sum::<f64>() / n;
        let variance = magnitudes.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;

        let pairwise_cosine = if vectors.len() < 2 {
            1.0
        } else {
            let mut total = 0.0;
            let mut count = 0usize;
            for i in 0..vectors.len() {
                for j in (i + 1)..vectors.len() {
                    total += cosine_similarity(&vectors[i], &vectors[j]) as f64;
                    count += 1;
                }
            }
            total / count as f64
        };

        Self {
            mean_magnitude: mean,
            stdev_magnitude: variance.sqrt(),
            pairwise_cosine,
        }
    }
}

/// Builds the embedder for a named model.
pub type EmbedderFactory = Box<dyn Fn(&EmbeddingModelConfig) -> Arc<dyn Embedder> + Send + Sync>;

/// Vectors plus per-model metrics.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingRun {
    pub vectors: Vec<Vec<f32>>,
    pub metrics: Vec<EmbeddingRunMetrics>,
}

/// Multi-model embedder with quantized caching and run metrics.
///
/// Models without a registered factory get a deterministic
/// [`EmbeddingProvider`] of their configured dimension.
pub struct EmbeddingSystem {
    configs: Vec<EmbeddingModelConfig>,
    label: String,
    cache: HybridEmbeddingCache,
    factories: HashMap<String, EmbedderFactory>,
    default_strategy: EnsembleStrategy,
    embedders: Mutex<HashMap<String, Arc<dyn Embedder>>>,
    last_metrics: Mutex<Vec<EmbeddingRunMetrics>>,
}

impl EmbeddingSystem {
    /// Build a system over `configs` (a single deterministic model when empty).
    ///
    /// Fails when `default_strategy` is `average` and the models disagree
    /// on dimension.
    pub fn new(
        configs: Vec<EmbeddingModelConfig>,
        cache: HybridEmbeddingCache,
        default_strategy: EnsembleStrategy,
    ) -> Result<Self> {
        let configs = if configs.is_empty() {
            vec![EmbeddingModelConfig::new(DEFAULT_MODEL)]
        } else {
            configs
        };
        if default_strategy == EnsembleStrategy::Average && !same_dimension(&configs) {
            let dims: Vec<String> = configs
                .iter()
                .map(|c| format!("{}={}", c.name, c.dimension))
                .collect();
            bail!(
                "average strategy requires equal model dimensions, got {}",
                dims.join(", ")
            );
        }
        let label = configs
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join("+");
        Ok(Self {
            configs,
            label,
            cache,
            factories: HashMap::new(),
            default_strategy,
            embedders: Mutex::new(HashMap::new()),
            last_metrics: Mutex::new(Vec::new()),
        })
    }

    /// Register the embedder constructor for model `name`.
    pub fn register_factory(&mut self, name: impl Into<String>, factory: EmbedderFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn configs(&self) -> &[EmbeddingModelConfig] {
        &self.configs
    }

    pub fn default_strategy(&self) -> EnsembleStrategy {
        self.default_strategy
    }

    /// Metrics of the most recent embedding call.
    pub fn last_metrics(&self) -> Vec<EmbeddingRunMetrics> {
        self.last_metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Embed `texts`, optionally overriding the strategy and every model's
    /// storage precision.
    ///
    /// `average` over models of different configured dimensions, or whose
    /// embedders return vectors of different lengths, degrades to `auto`.
    pub fn embed_with_metrics(
        &self,
        texts: &[String],
        strategy: Option<EnsembleStrategy>,
        precision: Option<Precision>,
    ) -> EmbeddingRun {
        let texts: Vec<String> = texts.iter().map(|t| t.trim().to_string()).collect();
        if texts.is_empty() {
            return EmbeddingRun::default();
        }

        let mut strategy = strategy.unwrap_or(self.default_strategy);
        if strategy == EnsembleStrategy::Average && !same_dimension(&self.configs) {
            tracing::warn!("models differ in dimension, averaging disabled for this call");
            strategy = EnsembleStrategy::Auto;
        }
        let selected = match strategy {
            EnsembleStrategy::Auto => &self.configs[..1],
            EnsembleStrategy::Stack | EnsembleStrategy::Average => &self.configs[..],
        };

        let mut runs: Vec<Vec<Vec<f32>>> = Vec::with_capacity(selected.len());
        let mut metrics = Vec::with_capacity(selected.len());

        for config in selected {
            let embedder = self.embedder_for(config);
            let run_precision = precision.unwrap_or(config.precision);
            let started = Instant::now();
            let (vectors, hits, misses) =
                self.embed_cached(&texts, embedder.as_ref(), config, run_precision);
            metrics.push(EmbeddingRunMetrics {
                model: config.name.clone(),
                precision: run_precision,
                latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                dimension: vectors.first().map_or(config.dimension, Vec::len),
                cache_hits: hits,
                cache_misses: misses,
            });
            runs.push(vectors);
        }

        if strategy == EnsembleStrategy::Average && !same_length(&runs) {
            tracing::warn!("model outputs differ in length, averaging disabled for this call");
            strategy = EnsembleStrategy::Auto;
            runs.truncate(1);
            metrics.truncate(1);
        }

        let mut aggregate: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
        for (iteration, vectors) in runs.into_iter().enumerate() {
            merge(&mut aggregate, vectors, strategy, iteration);
        }

        tracing::debug!(
            strategy = strategy.as_str(),
            texts = texts.len(),
            models = metrics.len(),
            "ensemble embedding complete"
        );
        *self
            .last_metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = metrics.clone();

        EmbeddingRun {
            vectors: aggregate.into_iter().map(l2_normalize).collect(),
            metrics,
        }
    }

    fn embedder_for(&self, config: &EmbeddingModelConfig) -> Arc<dyn Embedder> {
        let mut embedders = self.embedders.lock().unwrap_or_else(PoisonError::into_inner);
        embedders
            .entry(config.name.clone())
            .or_insert_with(|| match self.factories.get(&config.name) {
                Some(factory) => factory(config),
                None => Arc::new(EmbeddingProvider::deterministic(
                    config.name.clone(),
                    config.dimension,
                    DEFAULT_CACHE_SIZE,
                )),
            })
            .clone()
    }

    fn embed_cached(
        &self,
        texts: &[String],
        embedder: &dyn Embedder,
        config: &EmbeddingModelConfig,
        precision: Precision,
    ) -> (Vec<Vec<f32>>, usize, usize) {
        let keys: Vec<String> = texts
            .iter()
            .map(|text| {
                format!(
                    "{}:{}:{}:{}",
                    config.name,
                    config.dimension,
                    precision,
                    content_hash(text)
                )
            })
            .collect();

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        let mut missing: Vec<usize> = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            match self.cache.get(key) {
                Some(cached) => vectors.push(cached.dequantize()),
                None => {
                    vectors.push(Vec::new());
                    missing.push(i);
                }
            }
        }
        let hits = texts.len() - missing.len();

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = embedder.embed(&batch);
            for (&i, vector) in missing.iter().zip(fresh) {
                self.cache
                    .set(&keys[i], QuantizedVector::quantize(&vector, precision));
                vectors[i] = vector;
            }
        }
        (vectors, hits, missing.len())
    }
}

fn same_dimension(configs: &[EmbeddingModelConfig]) -> bool {
    configs.windows(2).all(|w| w[0].dimension == w[1].dimension)
}

/// Whether every vector of every run has the same length.
fn same_length(runs: &[Vec<Vec<f32>>]) -> bool {
    let mut lengths = runs.iter().flatten().map(Vec::len);
    match lengths.next() {
        Some(first) => lengths.all(|len| len == first),
        None => true,
    }
}

fn merge(
    aggregate: &mut [Vec<f32>],
    vectors: Vec<Vec<f32>>,
    strategy: EnsembleStrategy,
    iteration: usize,
) {
    for (slot, vector) in aggregate.iter_mut().zip(vectors) {
        match strategy {
            EnsembleStrategy::Stack => slot.extend(vector),
            EnsembleStrategy::Average if iteration > 0 && !slot.is_empty() => {
                let i = iteration as f32;
                for (prev, cur) in slot.iter_mut().zip(&vector) {
                    *prev = (*prev * i + cur) / (i + 1.0);
                }
            }
            _ => {
                if slot.is_empty() {
                    *slot = vector;
                }
            }
        }
    }
}

impl Embedder for EmbeddingSystem {
    fn model_name(&self) -> &str {
        &self.label
    }

    fn dims(&self) -> usize {
        match self.default_strategy {
            EnsembleStrategy::Stack => self.configs.iter().map(|c| c.dimension).sum(),
            _ => self.configs[0].dimension,
        }
    }

    fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        self.embed_with_metrics(texts, None, None).vectors
    }

    fn embed_with_strategy(&self, texts: &[String], strategy: &str) -> Vec<Vec<f32>> {
        self.embed_with_metrics(texts, Some(EnsembleStrategy::parse(strategy)), None)
            .vectors
    }

    fn quality_report(&self, vectors: &[Vec<f32>]) -> Option<EmbeddingQuality> {
        Some(EmbeddingQuality::measure(vectors))
    }
}
