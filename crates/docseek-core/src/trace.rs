//! Per-call execution trace of the hybrid search pipeline.
//!
//! A [`PipelineTrace`] records the query, the α actually used, a snapshot
//! of the configuration, one [`StageReport`] per stage that ran and the
//! final selections. It serializes to JSON and renders to a line-oriented
//! digest:
//!
//! ```text
//! ### Query
//! - Text: eldertown
//! - Parameters: α=0.60, N=50, M=20, λ=0.80, β=0.05
//! - Embedding strategy: auto
//!
//! ### Stages
//! 1. Lexical retrieval (2→2)
//!    BM25 candidate pool
//!    Parameters: top_k=200
//!    - Eldertown (score=0.288)
//!        · document: atlas.md
//! ...
//!
//! ### Final selection
//! - Eldertown (score=1.412, lex=1.000, sem=0.867, bias=1.000)
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::embedding::EmbeddingQuality;
use crate::models::{DocumentSection, PipelineSelection};
use crate::pipeline::SearchPipelineConfig;

/// Highlights shown per stage by `Display`.
pub const DEFAULT_ITEMS_PER_STAGE: usize = 3;

/// One representative item produced by a stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageHighlight {
    pub identifier: String,
    pub title: String,
    pub score: f64,
    pub extra: BTreeMap<String, Value>,
}

impl StageHighlight {
    pub fn new(section: &DocumentSection, score: f64) -> Self {
        Self {
            identifier: section.identifier(),
            title: section.display_title(),
            score,
            extra: BTreeMap::new(),
        }
    }

    /// Attach an extra labelled value.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// What one pipeline stage consumed, produced and was configured with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub name: String,
    pub description: String,
    pub input_size: usize,
    pub output_size: usize,
    pub parameters: BTreeMap<String, Value>,
    pub highlights: Vec<StageHighlight>,
}

impl StageReport {
    pub fn new(name: &str, description: &str, input_size: usize, output_size: usize) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_size,
            output_size,
            parameters: BTreeMap::new(),
            highlights: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn highlights(mut self, highlights: Vec<StageHighlight>) -> Self {
        self.highlights = highlights;
        self
    }
}

/// Full diagnostic record of one search call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineTrace {
    pub query: String,
    pub alpha_used: f64,
    pub config_snapshot: SearchPipelineConfig,
    pub stages: Vec<StageReport>,
    pub selections: Vec<PipelineSelection>,
    pub embedding_quality: Option<EmbeddingQuality>,
}

impl PipelineTrace {
    /// Look up a stage report by name.
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Human-readable digest with at most `max_items_per_stage` highlights
    /// per stage.
    pub fn render(&self, max_items_per_stage: usize) -> String {
        let cfg = &self.config_snapshot;
        let mut lines: Vec<String> = vec![
            "### Query".to_string(),
            format!("- Text: {}", self.query),
            format!(
                "- Parameters: α={:.2}, N={}, M={}, λ={:.2}, β={:.2}",
                self.alpha_used, cfg.fusion_top_n, cfg.mmr_limit, cfg.mmr_lambda, cfg.role_bias
            ),
            format!("- Embedding strategy: {}", cfg.embedding_strategy),
        ];
        if let Some(q) = &self.embedding_quality {
            lines.push(format!(
                "- Embedding quality: mean|v|={:.3}, σ={:.3}, mean cos={:.3}",
                q.mean_magnitude, q.stdev_magnitude, q.pairwise_cosine
            ));
        }

        lines.push(String::new());
        lines.push("### Stages".to_string());
        for (position, stage) in self.stages.iter().enumerate() {
            lines.push(format!(
                "{}. {} ({}→{})",
                position + 1,
                stage.name,
                stage.input_size,
                stage.output_size
            ));
            if !stage.description.is_empty() {
                lines.push(format!("   {}", stage.description));
            }
            if !stage.parameters.is_empty() {
                let params: Vec<String> = stage
                    .parameters
                    .iter()
                    .map(|(k, v)| format!("{k}={}", plain(v)))
                    .collect();
                lines.push(format!("   Parameters: {}", params.join(", ")));
            }
            for highlight in stage.highlights.iter().take(max_items_per_stage) {
                let label = if highlight.title.is_empty() {
                    &highlight.identifier
                } else {
                    &highlight.title
                };
                lines.push(format!("   - {label} (score={:.3})", highlight.score));
                for (key, value) in &highlight.extra {
                    lines.push(format!("       · {key}: {}", plain(value)));
                }
            }
        }

        lines.push(String::new());
        lines.push("### Final selection".to_string());
        for s in &self.selections {
            lines.push(format!(
                "- {} (score={:.3}, lex={:.3}, sem={:.3}, bias={:.3})",
                s.section.display_title(),
                s.score,
                s.lexical_score,
                s.semantic_score,
                s.bias_applied
            ));
        }
        lines.join("\n")
    }
}

impl fmt::Display for PipelineTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(DEFAULT_ITEMS_PER_STAGE))
    }
}

/// JSON value without quotes around strings.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
