//! Configuration parsing and validation.
//!
//! docseek is configured via a TOML file (default: `config/docseek.toml`).
//! Only `[docs].root` is required; every other table falls back to
//! defaults.
//!
//! # Example Configuration
//!
//! ```toml
//! [docs]
//! root = "./docs"
//! include_globs = ["**/*.md"]
//! exclude_globs = ["drafts/**"]
//!
//! [tokenizer]
//! strip_diacritics = true
//! min_token_len = 3
//! extra_stopwords = ["dungeon"]
//!
//! [retrieval]
//! alpha = 0.6
//! fusion_top_n = 50
//! mmr_limit = 20
//! mmr_lambda = 0.8
//! role_bias = 0.05
//! final_context_size = 5
//!
//! [embedding]
//! provider = "ollama"            # "hash" | "ollama" | "openai"
//! model = "nomic-embed-text"
//! dims = 768
//! cache_dir = "./.docseek/cache"
//! ```
//!
//! Adding `[[embedding.models]]` entries switches to the multi-model
//! ensemble; `retrieval.embedding_strategy` then chooses how their vectors
//! are combined.

use anyhow::{bail, Context, Result};
use docseek_core::embedding::{EmbeddingModelConfig, DEFAULT_CACHE_SIZE, DEFAULT_DIMS};
use docseek_core::pipeline::SearchPipelineConfig;
use docseek_core::tokenize::Tokenizer;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Providers accepted by `embedding.provider`.
pub const PROVIDERS: &[&str] = &["hash", "ollama", "openai"];

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub docs: DocsConfig,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
    #[serde(default)]
    pub retrieval: SearchPipelineConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl Config {
    /// Defaults everywhere, indexing `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            docs: DocsConfig::new(root),
            tokenizer: TokenizerConfig::default(),
            retrieval: SearchPipelineConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

/// Where the markdown corpus lives and which files belong to it.
#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl DocsConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenizerConfig {
    #[serde(default = "default_strip_diacritics")]
    pub strip_diacritics: bool,
    #[serde(default = "default_min_token_len")]
    pub min_token_len: usize,
    #[serde(default)]
    pub extra_stopwords: Vec<String>,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            strip_diacritics: default_strip_diacritics(),
            min_token_len: default_min_token_len(),
            extra_stopwords: Vec::new(),
        }
    }
}

impl TokenizerConfig {
    pub fn build(&self) -> Tokenizer {
        Tokenizer::new(
            self.strip_diacritics,
            self.min_token_len,
            &self.extra_stopwords,
        )
    }
}

fn default_strip_diacritics() -> bool {
    true
}
fn default_min_token_len() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub models: Vec<EmbeddingModelConfig>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            url: None,
            timeout_secs: default_timeout_secs(),
            cache_size: default_cache_size(),
            cache_dir: None,
            models: Vec::new(),
        }
    }
}

impl EmbeddingConfig {
    /// Whether a network backend is configured.
    pub fn is_remote(&self) -> bool {
        self.provider != "hash"
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    DEFAULT_DIMS
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

/// Load and validate a configuration file.
///
/// Relative `docs.root` and `embedding.cache_dir` paths are kept as
/// written and resolved against the working directory at use time.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, or
/// fails validation:
/// - `retrieval.alpha` / `retrieval.mmr_lambda` outside `[0.0, 1.0]`
/// - negative `retrieval.role_bias`
/// - `retrieval.final_context_size` or `retrieval.fusion_top_n` of zero
/// - unknown `embedding.provider`
/// - `embedding.dims` of zero, or a remote provider without `embedding.model`
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = parse_config(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    config.retrieval.validate()?;

    let embedding = &config.embedding;
    if !PROVIDERS.contains(&embedding.provider.as_str()) {
        bail!(
            "Unknown embedding provider: '{}'. Must be hash, ollama, or openai.",
            embedding.provider
        );
    }
    if embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if embedding.is_remote() && embedding.model.is_none() {
        bail!(
            "embedding.model must be specified when provider is '{}'",
            embedding.provider
        );
    }
    if let Some(model) = embedding.models.iter().find(|m| m.dimension == 0) {
        bail!("embedding.models: '{}' has dimension 0", model.name);
    }
    Ok(())
}
