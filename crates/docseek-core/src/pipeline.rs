//! Hybrid search pipeline.
//!
//! Takes a BM25 candidate pool and turns it into a short, scored list of
//! chunks with full provenance:
//!
//! 1. **Lexical retrieval**: the candidate pool as handed in.
//! 2. **Reciprocal rank fusion**: `1 / (rrf_k + rank + 1)` per candidate.
//! 3. **MMR diversification**: embed the top `fusion_top_n` sections and
//!    keep `mmr_limit` of them, trading relevance for diversity by
//!    `mmr_lambda`.
//! 4. **Chunking**: split each kept section into sentence-aligned windows.
//! 5. **Semantic scoring**: embed chunks, cosine against the query,
//!    remapped from `[-1, 1]` to `[0, 1]`.
//! 6. **Final selection**: hybrid score, sort, truncate.
//!
//! ```text
//! score = α · lexical_norm + (1 − α) · semantic + β · role_bias
//! ```
//!
//! `lexical_norm` is the parent section's fused score divided by the
//! largest fused score among the chunk candidates. α (and λ) are clamped
//! to `[0, 1]` when used; the stored configuration is never modified.
//!
//! Every call yields a [`PipelineTrace`], including calls that end early
//! on an empty stage.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::chunk::chunk_section;
use crate::embedding::{cosine_similarity, unit_vector, Embedder};
use crate::fusion::{maximal_marginal_relevance, reciprocal_rank_fusion};
use crate::models::{ChunkCandidate, DocumentSection, PipelineSelection, SearchResult};
use crate::tokenize::count_tokens;
use crate::trace::{PipelineTrace, StageHighlight, StageReport};

/// Highlights recorded per stage in the trace.
const TRACE_HIGHLIGHTS: usize = 5;

pub const STAGE_LEXICAL: &str = "Lexical retrieval";
pub const STAGE_FUSION: &str = "Reciprocal rank fusion";
pub const STAGE_MMR: &str = "MMR diversification";
pub const STAGE_CHUNKING: &str = "Chunking";
pub const STAGE_SEMANTIC: &str = "Semantic scoring";
pub const STAGE_FINAL: &str = "Final selection";

/// Configuration of every pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPipelineConfig {
    /// Hybrid blend weight of the lexical score.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// BM25 candidate pool size.
    #[serde(default = "default_lexical_top_k")]
    pub lexical_top_k: usize,
    /// Fused sections considered by MMR (N).
    #[serde(default = "default_fusion_top_n")]
    pub fusion_top_n: usize,
    /// Relevance/diversity trade-off (λ).
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f64,
    /// Sections kept by MMR (M).
    #[serde(default = "default_mmr_limit")]
    pub mmr_limit: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
    #[serde(default = "default_chunk_size_tokens")]
    pub chunk_size_tokens: usize,
    #[serde(default = "default_chunk_overlap_tokens")]
    pub chunk_overlap_tokens: usize,
    /// Role bias weight (β).
    #[serde(default = "default_role_bias")]
    pub role_bias: f64,
    #[serde(default = "default_final_context_size")]
    pub final_context_size: usize,
    /// `auto`, `stack` or `average`; only ensemble embedders use it.
    #[serde(default = "default_embedding_strategy")]
    pub embedding_strategy: String,
}

fn default_alpha() -> f64 {
    0.6
}
fn default_lexical_top_k() -> usize {
    200
}
fn default_fusion_top_n() -> usize {
    50
}
fn default_mmr_lambda() -> f64 {
    0.8
}
fn default_mmr_limit() -> usize {
    20
}
fn default_rrf_k() -> usize {
    60
}
fn default_chunk_size_tokens() -> usize {
    400
}
fn default_chunk_overlap_tokens() -> usize {
    40
}
fn default_role_bias() -> f64 {
    0.05
}
fn default_final_context_size() -> usize {
    5
}
fn default_embedding_strategy() -> String {
    "auto".to_string()
}

impl Default for SearchPipelineConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            lexical_top_k: default_lexical_top_k(),
            fusion_top_n: default_fusion_top_n(),
            mmr_lambda: default_mmr_lambda(),
            mmr_limit: default_mmr_limit(),
            rrf_k: default_rrf_k(),
            chunk_size_tokens: default_chunk_size_tokens(),
            chunk_overlap_tokens: default_chunk_overlap_tokens(),
            role_bias: default_role_bias(),
            final_context_size: default_final_context_size(),
            embedding_strategy: default_embedding_strategy(),
        }
    }
}

impl SearchPipelineConfig {
    /// Reject values no search could use.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            bail!("retrieval.alpha must be in [0.0, 1.0], got {}", self.alpha);
        }
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            bail!("retrieval.mmr_lambda must be in [0.0, 1.0], got {}", self.mmr_lambda);
        }
        if self.role_bias.is_nan() || self.role_bias < 0.0 {
            bail!("retrieval.role_bias must be >= 0, got {}", self.role_bias);
        }
        if self.final_context_size < 1 {
            bail!("retrieval.final_context_size must be >= 1");
        }
        if self.fusion_top_n < 1 {
            bail!("retrieval.fusion_top_n must be >= 1");
        }
        Ok(())
    }
}

/// Per-call search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Requested result count; capped by `final_context_size`.
    pub limit: usize,
    /// Requester role matched against section `role`/`rol` metadata.
    pub role: Option<String>,
    /// Overrides the configured α for this call.
    pub alpha: Option<f64>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::new(default_final_context_size())
    }
}

impl SearchOptions {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            role: None,
            alpha: None,
        }
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = Some(alpha);
        self
    }
}

/// Selections of one run plus its trace.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub selections: Vec<PipelineSelection>,
    pub trace: PipelineTrace,
}

/// Clamp α into `[0, 1]`.
pub fn clamp_alpha(alpha: f64) -> f64 {
    if alpha.is_nan() {
        return 0.0;
    }
    alpha.clamp(0.0, 1.0)
}

/// `1.0` when a `role` or `rol` metadata key (case-insensitive) carries
/// `role`, compared case-insensitively after trimming; otherwise `0.0`.
pub fn role_bias(metadata: &BTreeMap<String, String>, role: Option<&str>) -> f64 {
    let Some(role) = role.map(|r| r.trim().to_lowercase()).filter(|r| !r.is_empty()) else {
        return 0.0;
    };
    let matched = metadata.iter().any(|(key, value)| {
        let key = key.trim().to_lowercase();
        (key == "role" || key == "rol") && value.trim().to_lowercase() == role
    });
    if matched {
        1.0
    } else {
        0.0
    }
}

/// Text embedded for a section during MMR: title line plus content.
fn section_text(section: &DocumentSection) -> String {
    format!("{}\n{}", section.title, section.content)
        .trim()
        .to_string()
}

/// The hybrid retrieval pipeline. Holds the embedder, the default
/// configuration and the trace of the most recent [`search`](Self::search).
pub struct HybridSearchPipeline {
    embedder: Arc<dyn Embedder>,
    config: SearchPipelineConfig,
    last_trace: Option<PipelineTrace>,
}

impl HybridSearchPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, config: SearchPipelineConfig) -> Self {
        Self {
            embedder,
            config,
            last_trace: None,
        }
    }

    pub fn config(&self) -> &SearchPipelineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SearchPipelineConfig {
        &mut self.config
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Trace of the most recent `search` call.
    pub fn last_trace(&self) -> Option<&PipelineTrace> {
        self.last_trace.as_ref()
    }

    /// Run with the stored configuration and remember the trace.
    pub fn search(
        &mut self,
        query: &str,
        candidates: &[SearchResult],
        options: &SearchOptions,
    ) -> Vec<PipelineSelection> {
        let config = self.config.clone();
        self.search_with_config(query, candidates, options, &config)
    }

    /// Run with an explicit configuration and remember the trace.
    pub fn search_with_config(
        &mut self,
        query: &str,
        candidates: &[SearchResult],
        options: &SearchOptions,
        config: &SearchPipelineConfig,
    ) -> Vec<PipelineSelection> {
        let outcome = self.run(query, candidates, options, config);
        self.last_trace = Some(outcome.trace);
        outcome.selections
    }

    /// Run every stage against `config` without touching pipeline state.
    pub fn run(
        &self,
        query: &str,
        candidates: &[SearchResult],
        options: &SearchOptions,
        config: &SearchPipelineConfig,
    ) -> PipelineOutcome {
        let alpha = clamp_alpha(options.alpha.unwrap_or(config.alpha));
        let finish = |stages: Vec<StageReport>,
                      selections: Vec<PipelineSelection>,
                      embedding_quality| PipelineOutcome {
            trace: PipelineTrace {
                query: query.to_string(),
                alpha_used: alpha,
                config_snapshot: config.clone(),
                stages,
                selections: selections.clone(),
                embedding_quality,
            },
            selections,
        };
        let mut stages = Vec::new();

        // Lexical retrieval
        stages.push(
            StageReport::new(STAGE_LEXICAL, "BM25 candidate pool", candidates.len(), candidates.len())
                .param("top_k", config.lexical_top_k)
                .highlights(
                    candidates
                        .iter()
                        .take(TRACE_HIGHLIGHTS)
                        .map(|r| {
                            StageHighlight::new(&r.section, r.score)
                                .with("document", r.section.document_name())
                                .with("level", r.section.heading_level)
                        })
                        .collect(),
                ),
        );
        tracing::debug!(candidates = candidates.len(), "lexical stage");
        if candidates.is_empty() {
            return finish(stages, Vec::new(), None);
        }

        // Reciprocal rank fusion
        let fused = reciprocal_rank_fusion(candidates, config.rrf_k);
        stages.push(
            StageReport::new(
                STAGE_FUSION,
                "Rank-based re-scoring of the lexical pool",
                candidates.len(),
                fused.len(),
            )
            .param("k", config.rrf_k)
            .highlights(
                fused
                    .iter()
                    .take(TRACE_HIGHLIGHTS)
                    .map(|f| StageHighlight::new(&f.section, f.fused_score).with("bm25", f.lexical_score))
                    .collect(),
            ),
        );
        tracing::debug!(fused = fused.len(), k = config.rrf_k, "fusion stage");

        // MMR diversification
        let strategy = config.embedding_strategy.as_str();
        let query_vector = self
            .embedder
            .embed_with_strategy(&[query.to_string()], strategy)
            .into_iter()
            .next()
            .unwrap_or_else(|| unit_vector(self.embedder.dims()));

        let pool = &fused[..fused.len().min(config.fusion_top_n)];
        let section_texts: Vec<String> = pool.iter().map(|f| section_text(&f.section)).collect();
        let section_vectors = if section_texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_with_strategy(&section_texts, strategy)
        };
        let relevance: Vec<f64> = section_vectors
            .iter()
            .map(|v| cosine_similarity(&query_vector, v) as f64)
            .collect();
        let picked = maximal_marginal_relevance(
            &section_vectors,
            &relevance,
            config.mmr_limit,
            config.mmr_lambda,
        );
        stages.push(
            StageReport::new(
                STAGE_MMR,
                "Diverse sections by maximal marginal relevance",
                pool.len(),
                picked.len(),
            )
            .param("N", config.fusion_top_n)
            .param("M", config.mmr_limit)
            .param("λ", config.mmr_lambda.clamp(0.0, 1.0))
            .highlights(
                picked
                    .iter()
                    .take(TRACE_HIGHLIGHTS)
                    .enumerate()
                    .map(|(position, &i)| {
                        StageHighlight::new(&pool[i].section, relevance[i])
                            .with("rank", position + 1)
                            .with("fused", round4(pool[i].fused_score))
                    })
                    .collect(),
            ),
        );
        tracing::debug!(pool = pool.len(), kept = picked.len(), "mmr stage");

        // Chunking
        let chunk_candidates: Vec<ChunkCandidate> = picked
            .iter()
            .flat_map(|&i| {
                let parent = &pool[i];
                chunk_section(&parent.section, config.chunk_size_tokens, config.chunk_overlap_tokens)
                    .into_iter()
                    .map(move |chunk_text| ChunkCandidate {
                        section: Arc::clone(&parent.section),
                        chunk_text,
                        lexical_score: parent.fused_score,
                        bm25_score: parent.lexical_score,
                    })
            })
            .collect();
        stages.push(
            StageReport::new(
                STAGE_CHUNKING,
                "Sentence-aligned chunks ready for embedding",
                picked.len(),
                chunk_candidates.len(),
            )
            .param("chunk_tokens", config.chunk_size_tokens)
            .param("overlap", config.chunk_overlap_tokens)
            .highlights(
                chunk_candidates
                    .iter()
                    .take(TRACE_HIGHLIGHTS)
                    .map(|c| {
                        StageHighlight::new(&c.section, c.chunk_text.chars().count() as f64)
                            .with("tokens", count_tokens(&c.chunk_text))
                    })
                    .collect(),
            ),
        );
        tracing::debug!(chunks = chunk_candidates.len(), "chunking stage");
        if chunk_candidates.is_empty() {
            return finish(stages, Vec::new(), None);
        }

        // Semantic scoring
        let chunk_texts: Vec<String> = chunk_candidates.iter().map(|c| c.chunk_text.clone()).collect();
        let chunk_vectors = self.embedder.embed_with_strategy(&chunk_texts, strategy);
        let quality = self.embedder.quality_report(&chunk_vectors);
        let semantic: Vec<f64> = chunk_candidates
            .iter()
            .enumerate()
            .map(|(i, _)| {
                chunk_vectors.get(i).map_or(0.5, |v| {
                    ((cosine_similarity(&query_vector, v) as f64 + 1.0) / 2.0).clamp(0.0, 1.0)
                })
            })
            .collect();
        stages.push(
            StageReport::new(
                STAGE_SEMANTIC,
                "Chunk embeddings against the query",
                chunk_candidates.len(),
                chunk_candidates.len(),
            )
            .param("α", alpha)
            .param("β", config.role_bias)
            .highlights(
                chunk_candidates
                    .iter()
                    .zip(&semantic)
                    .take(TRACE_HIGHLIGHTS)
                    .map(|(c, &sem)| {
                        StageHighlight::new(&c.section, sem)
                            .with("lexical", round4(c.lexical_score))
                            .with("bm25", round4(c.bm25_score))
                    })
                    .collect(),
            ),
        );
        tracing::debug!(chunks = chunk_candidates.len(), alpha, "semantic stage");

        // Final selection
        let max_lexical = chunk_candidates
            .iter()
            .map(|c| c.lexical_score)
            .fold(0.0f64, f64::max);
        let role = options.role.as_deref();
        let mut selections: Vec<PipelineSelection> = chunk_candidates
            .into_iter()
            .zip(semantic)
            .map(|(candidate, semantic_score)| {
                let lexical_score = if max_lexical > 0.0 {
                    candidate.lexical_score / max_lexical
                } else {
                    0.0
                };
                let bias_applied = role_bias(&candidate.section.metadata, role);
                let score = alpha * lexical_score
                    + (1.0 - alpha) * semantic_score
                    + config.role_bias * bias_applied;
                PipelineSelection {
                    section: candidate.section,
                    chunk_text: candidate.chunk_text,
                    score,
                    lexical_score,
                    semantic_score,
                    bias_applied,
                }
            })
            .collect();
        let scored = selections.len();
        selections.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        selections.truncate(options.limit.min(config.final_context_size));

        stages.push(
            StageReport::new(STAGE_FINAL, "Context handed to the consumer", scored, selections.len())
                .param("final_context_size", config.final_context_size)
                .param("limit", options.limit)
                .highlights(
                    selections
                        .iter()
                        .map(|s| {
                            StageHighlight::new(&s.section, s.score)
                                .with("lex", round4(s.lexical_score))
                                .with("sem", round4(s.semantic_score))
                                .with("bias", round4(s.bias_applied))
                        })
                        .collect(),
                ),
        );
        tracing::debug!(scored, selected = selections.len(), "final stage");

        finish(stages, selections, quality)
    }
}

fn round4(value: f64) -> f64 {
    (value * 1e4).round() / 1e4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bm25::Bm25Index;
    use crate::embedding::{EmbeddingProvider, EmbeddingQuality};
    use crate::sections::parse_markdown;
    use crate::tokenize::Tokenizer;
    use std::path::Path;

    fn provider() -> Arc<dyn Embedder> {
        Arc::new(EmbeddingProvider::deterministic("hash", 64, 256))
    }

    fn pipeline(config: SearchPipelineConfig) -> HybridSearchPipeline {
        HybridSearchPipeline::new(provider(), config)
    }

    fn corpus(docs: &[(&str, &str)]) -> Bm25Index {
        let tokenizer = Tokenizer::default();
        let sections: Vec<Arc<DocumentSection>> = docs
            .iter()
            .flat_map(|(path, text)| parse_markdown(Path::new(path), text, &tokenizer))
            .map(Arc::new)
            .collect();
        Bm25Index::build(&sections)
    }

    fn candidates(index: &Bm25Index, query: &str) -> Vec<SearchResult> {
        index.search(&Tokenizer::default().tokenize(query), 200)
    }

    fn role_corpus() -> Bm25Index {
        corpus(&[
            ("guion.md", "---\nrole: guionista\n---\n# Capital\nEldertown is the capital."),
            ("tecnica.md", "---\nrole: tecnico\n---\n# Capital\nEldertown is the capital."),
        ])
    }

    fn lore_corpus() -> Bm25Index {
        corpus(&[
            (
                "atlas.md",
                "# Eldertown\nEldertown is the capital of the northern realm. Its harbour is busy.\n\
                 # Harbour\nShips from Eldertown trade spices and iron.",
            ),
            ("history.md", "# Founding\nEldertown was founded by river traders. The walls came later."),
            ("bestiary.md", "# Wolves\nGrey wolves roam the forests north of Eldertown."),
            ("cooking.md", "# Bread\nBakers knead dough at dawn."),
        ])
    }

    #[test]
    fn test_clamp_alpha() {
        assert_eq!(clamp_alpha(-0.5), 0.0);
        assert_eq!(clamp_alpha(0.0), 0.0);
        assert_eq!(clamp_alpha(0.3), 0.3);
        assert_eq!(clamp_alpha(1.0), 1.0);
        assert_eq!(clamp_alpha(3.0), 1.0);
        assert_eq!(clamp_alpha(f64::NAN), 0.0);
    }

    #[test]
    fn test_role_bias_matching() {
        let mut meta = BTreeMap::new();
        meta.insert("Role".to_string(), " Guionista ".to_string());
        assert_eq!(role_bias(&meta, Some("guionista")), 1.0);
        assert_eq!(role_bias(&meta, Some("GUIONISTA ")), 1.0);
        assert_eq!(role_bias(&meta, Some("tecnico")), 0.0);
        assert_eq!(role_bias(&meta, Some("guion")), 0.0);
        assert_eq!(role_bias(&meta, None), 0.0);
        assert_eq!(role_bias(&meta, Some("  ")), 0.0);

        let mut rol = BTreeMap::new();
        rol.insert("rol".to_string(), "tecnico".to_string());
        assert_eq!(role_bias(&rol, Some("tecnico")), 1.0);
        assert_eq!(role_bias(&BTreeMap::new(), Some("tecnico")), 0.0);
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let cfg = SearchPipelineConfig::default();
        assert_eq!(cfg.alpha, 0.6);
        assert_eq!(cfg.lexical_top_k, 200);
        assert_eq!(cfg.fusion_top_n, 50);
        assert_eq!(cfg.mmr_limit, 20);
        assert_eq!(cfg.rrf_k, 60);
        assert_eq!(cfg.final_context_size, 5);
        assert_eq!(cfg.embedding_strategy, "auto");
        assert!(cfg.validate().is_ok());

        for bad in [
            SearchPipelineConfig { alpha: 1.5, ..Default::default() },
            SearchPipelineConfig { mmr_lambda: -0.1, ..Default::default() },
            SearchPipelineConfig { role_bias: -1.0, ..Default::default() },
            SearchPipelineConfig { final_context_size: 0, ..Default::default() },
            SearchPipelineConfig { fusion_top_n: 0, ..Default::default() },
        ] {
            assert!(bad.validate().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_empty_candidates_yield_empty_result_and_trace() {
        let mut p = pipeline(SearchPipelineConfig::default());
        assert!(p.search("anything", &[], &SearchOptions::new(5)).is_empty());
        let trace = p.last_trace().unwrap();
        assert_eq!(trace.stages.len(), 1);
        assert_eq!(trace.stages[0].name, STAGE_LEXICAL);
        assert!(trace.selections.is_empty());
    }

    #[test]
    fn test_role_bias_scenario() {
        let index = role_corpus();
        let config = SearchPipelineConfig {
            role_bias: 1.0,
            mmr_limit: 2,
            final_context_size: 1,
            ..Default::default()
        };
        let mut p = pipeline(config);
        let results = p.search(
            "eldertown",
            &candidates(&index, "eldertown"),
            &SearchOptions::new(5).role("guionista"),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].section.identifier(), "guion.md::Capital");
        assert_eq!(results[0].bias_applied, 1.0);

        let results = p.search(
            "eldertown",
            &candidates(&index, "eldertown"),
            &SearchOptions::new(5).role("tecnico"),
        );
        assert_eq!(results[0].section.identifier(), "tecnica.md::Capital");
    }

    #[test]
    fn test_score_composition_and_bounds() {
        let index = lore_corpus();
        let config = SearchPipelineConfig {
            role_bias: 0.1,
            ..Default::default()
        };
        let p = pipeline(config.clone());
        let outcome = p.run(
            "eldertown harbour",
            &candidates(&index, "eldertown harbour"),
            &SearchOptions::new(10),
            &config,
        );
        assert!(!outcome.selections.is_empty());
        let alpha = outcome.trace.alpha_used;
        for s in &outcome.selections {
            assert!((0.0..=1.0).contains(&s.lexical_score));
            assert!((0.0..=1.0).contains(&s.semantic_score));
            let expected = alpha * s.lexical_score
                + (1.0 - alpha) * s.semantic_score
                + config.role_bias * s.bias_applied;
            assert!((s.score - expected).abs() < 1e-12);
            assert!(s.score <= 1.0 + config.role_bias);
        }
        assert!(outcome
            .selections
            .windows(2)
            .all(|w| w[0].score >= w[1].score));
        assert!(outcome.selections.iter().any(|s| s.lexical_score == 1.0));
    }

    #[test]
    fn test_cardinality_respects_limit_and_context_size() {
        let index = lore_corpus();
        let pool = candidates(&index, "eldertown");
        let config = SearchPipelineConfig {
            final_context_size: 2,
            ..Default::default()
        };
        let p = pipeline(config.clone());
        assert_eq!(p.run("eldertown", &pool, &SearchOptions::new(10), &config).selections.len(), 2);
        assert_eq!(p.run("eldertown", &pool, &SearchOptions::new(1), &config).selections.len(), 1);

        let wide = SearchPipelineConfig {
            final_context_size: 50,
            ..Default::default()
        };
        // Four matching sections, one chunk each.
        assert_eq!(p.run("eldertown", &pool, &SearchOptions::new(50), &wide).selections.len(), 4);
    }

    #[test]
    fn test_alpha_override_is_clamped() {
        let index = lore_corpus();
        let pool = candidates(&index, "eldertown");
        let mut p = pipeline(SearchPipelineConfig::default());
        let results = p.search("eldertown", &pool, &SearchOptions::new(5).alpha(4.0));
        let trace = p.last_trace().unwrap();
        assert_eq!(trace.alpha_used, 1.0);
        assert_eq!(trace.config_snapshot.alpha, 0.6);
        for s in &results {
            assert!((s.score - (s.lexical_score + 0.05 * s.bias_applied)).abs() < 1e-12);
        }

        p.search("eldertown", &pool, &SearchOptions::new(5).alpha(-2.0));
        assert_eq!(p.last_trace().unwrap().alpha_used, 0.0);
    }

    #[test]
    fn test_deterministic_results() {
        let index = lore_corpus();
        let pool = candidates(&index, "eldertown traders");
        let mut a = pipeline(SearchPipelineConfig::default());
        let mut b = pipeline(SearchPipelineConfig::default());
        let opts = SearchOptions::new(5);
        let first = a.search("eldertown traders", &pool, &opts);
        assert_eq!(first, a.search("eldertown traders", &pool, &opts));
        assert_eq!(first, b.search("eldertown traders", &pool, &opts));
    }

    #[test]
    fn test_trace_records_every_stage() {
        let index = lore_corpus();
        let mut p = pipeline(SearchPipelineConfig::default());
        let results = p.search("eldertown", &candidates(&index, "eldertown"), &SearchOptions::new(3));
        let trace = p.last_trace().unwrap();
        let names: Vec<&str> = trace.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![STAGE_LEXICAL, STAGE_FUSION, STAGE_MMR, STAGE_CHUNKING, STAGE_SEMANTIC, STAGE_FINAL]
        );
        assert_eq!(trace.selections, results);
        assert_eq!(trace.query, "eldertown");
        let fusion = trace.stage(STAGE_FUSION).unwrap();
        assert_eq!(fusion.input_size, 4);
        assert_eq!(fusion.parameters["k"], 60);
        assert!(trace.stages.iter().all(|s| s.highlights.len() <= TRACE_HIGHLIGHTS));
        // Single-model providers report no quality metrics.
        assert!(trace.embedding_quality.is_none());
    }

    #[test]
    fn test_mmr_limit_bounds_sections() {
        let index = lore_corpus();
        let config = SearchPipelineConfig {
            mmr_limit: 2,
            final_context_size: 10,
            ..Default::default()
        };
        let p = pipeline(config.clone());
        let outcome = p.run("eldertown", &candidates(&index, "eldertown"), &SearchOptions::new(10), &config);
        assert_eq!(outcome.trace.stage(STAGE_MMR).unwrap().output_size, 2);
        assert_eq!(outcome.selections.len(), 2);
    }

    #[test]
    fn test_run_leaves_state_untouched() {
        let index = lore_corpus();
        let p = pipeline(SearchPipelineConfig::default());
        let trial = SearchPipelineConfig {
            alpha: 0.1,
            ..Default::default()
        };
        let outcome = p.run("eldertown", &candidates(&index, "eldertown"), &SearchOptions::new(5), &trial);
        assert_eq!(outcome.trace.config_snapshot.alpha, 0.1);
        assert_eq!(p.config().alpha, 0.6);
        assert!(p.last_trace().is_none());
    }

    struct Reporting(EmbeddingProvider);

    impl Embedder for Reporting {
        fn model_name(&self) -> &str {
            self.0.model_name()
        }
        fn dims(&self) -> usize {
            self.0.dims()
        }
        fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
            self.0.embed(texts)
        }
        fn quality_report(&self, vectors: &[Vec<f32>]) -> Option<EmbeddingQuality> {
            Some(EmbeddingQuality::measure(vectors))
        }
    }

    #[test]
    fn test_trace_carries_quality_report() {
        let index = lore_corpus();
        let mut p = HybridSearchPipeline::new(
            Arc::new(Reporting(EmbeddingProvider::deterministic("hash", 32, 64))),
            SearchPipelineConfig::default(),
        );
        p.search("eldertown", &candidates(&index, "eldertown"), &SearchOptions::new(5));
        let quality = p.last_trace().unwrap().embedding_quality.unwrap();
        assert!((quality.mean_magnitude - 1.0).abs() < 1e-5);
    }
}
