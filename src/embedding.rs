//! Embedding backends and embedder construction.
//!
//! The core crate owns the embedding logic; this module supplies the parts
//! that touch the outside world:
//!
//! - **[`OllamaBackend`]** calls `POST {url}/api/embed` on a local Ollama
//!   instance (default `http://localhost:11434`).
//! - **[`OpenAiBackend`]** calls the OpenAI embeddings API with the key
//!   from `OPENAI_API_KEY`.
//! - **[`DirCache`]** is an [`ExternalCache`] storing one JSON payload per
//!   key in a directory, shared between runs.
//!
//! Use [`create_embedder`] to build the configured [`Embedder`].
//!
//! Requests are made once with the configured timeout. There is no retry
//! loop: a failed request falls back to the deterministic hash embedding
//! for that batch.

use anyhow::{anyhow, bail, Context, Result};
use docseek_core::embedding::{
    Embedder, EmbeddingBackend, EmbeddingModelConfig, EmbeddingProvider, EmbeddingSystem,
    EnsembleStrategy, ExternalCache, HybridEmbeddingCache, DEFAULT_MODEL,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Namespace prefix for keys in the ensemble cache.
pub const CACHE_NAMESPACE: &str = "docseek";

fn http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

fn required_model(config: &EmbeddingConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for {} provider", config.provider))
}

// ============ Ollama Backend ============

/// Embedding backend using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaBackend {
    model: String,
    url: String,
    client: reqwest::blocking::Client,
}

impl OllamaBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());
        Ok(Self {
            model: required_model(config)?,
            url: url.trim_end_matches('/').to_string(),
            client: http_client(config.timeout_secs)?,
        })
    }
}

impl EmbeddingBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn probe(&self) -> Result<()> {
        self.client
            .get(format!("{}/api/tags", self.url))
            .send()
            .with_context(|| format!("Ollama not reachable at {}", self.url))?
            .error_for_status()?;
        Ok(())
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json()?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| float_vector(values))
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

// ============ OpenAI Backend ============

/// Embedding backend for the OpenAI embeddings API.
pub struct OpenAiBackend {
    model: String,
    url: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl OpenAiBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: required_model(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_EMBEDDINGS_URL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            client: http_client(config.timeout_secs)?,
        })
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("OPENAI_API_KEY not set"))
    }
}

impl EmbeddingBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn probe(&self) -> Result<()> {
        self.api_key().map(|_| ())
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key()?))
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json()?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);
        indexed.push((index, float_vector(embedding)));
    }
    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn float_vector(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Directory cache ============

/// External cache tier backed by a directory, one file per key.
pub struct DirCache {
    dir: PathBuf,
}

impl DirCache {
    /// Open (creating if needed) a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache dir: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl ExternalCache for DirCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, payload: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// ============ Construction ============

/// Build a single-model provider for `config.provider`.
///
/// Remote providers are probed once here; an unreachable service yields a
/// provider that stays on hash embeddings.
pub fn create_provider(config: &EmbeddingConfig, dims: usize) -> Result<EmbeddingProvider> {
    let provider = match config.provider.as_str() {
        "hash" => EmbeddingProvider::deterministic(
            config.model.as_deref().unwrap_or(DEFAULT_MODEL),
            dims,
            config.cache_size,
        ),
        "ollama" => EmbeddingProvider::with_backend(
            required_model(config)?,
            dims,
            config.cache_size,
            Box::new(OllamaBackend::new(config)?),
        ),
        "openai" => EmbeddingProvider::with_backend(
            required_model(config)?,
            dims,
            config.cache_size,
            Box::new(OpenAiBackend::new(config)?),
        ),
        other => bail!("Unknown embedding provider: {}", other),
    };
    Ok(provider)
}

/// Build the configured embedder.
///
/// Without `[[embedding.models]]` this is one [`EmbeddingProvider`]. With
/// models it is an [`EmbeddingSystem`] whose default strategy is
/// `strategy`; the model named by `embedding.model` uses the remote
/// provider, every other model the hash embedding. `embedding.cache_dir`
/// adds a [`DirCache`] tier to the ensemble cache.
///
/// # Errors
///
/// Unknown providers, a missing remote model name, an unusable cache
/// directory, or an `average` ensemble over models of different
/// dimensions.
pub fn create_embedder(config: &EmbeddingConfig, strategy: &str) -> Result<Arc<dyn Embedder>> {
    if config.models.is_empty() {
        return Ok(Arc::new(create_provider(config, config.dims)?));
    }

    let mut cache = HybridEmbeddingCache::new(config.cache_size, CACHE_NAMESPACE);
    if let Some(dir) = &config.cache_dir {
        cache = cache.with_external(Box::new(DirCache::open(dir)?));
    }

    let mut system = EmbeddingSystem::new(
        config.models.clone(),
        cache,
        EnsembleStrategy::parse(strategy),
    )?;

    if let (true, Some(model)) = (config.is_remote(), config.model.clone()) {
        let remote = config.clone();
        system.register_factory(
            model,
            Box::new(move |model_config: &EmbeddingModelConfig| -> Arc<dyn Embedder> {
                match create_provider(&remote, model_config.dimension) {
                    Ok(provider) => Arc::new(provider),
                    Err(e) => {
                        tracing::warn!(
                            model = %model_config.name,
                            "remote embedder unavailable, using hash embeddings: {e:#}"
                        );
                        Arc::new(EmbeddingProvider::deterministic(
                            model_config.name.clone(),
                            model_config.dimension,
                            remote.cache_size,
                        ))
                    }
                }
            }),
        );
    }

    tracing::debug!(
        models = system.configs().len(),
        strategy = system.default_strategy().as_str(),
        "embedding ensemble ready"
    );
    Ok(Arc::new(system))
}
