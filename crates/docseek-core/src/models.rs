//! Core data types that flow through the retrieval pipeline.
//!
//! Sections are parsed once and shared behind [`Arc`] by every later stage,
//! so a search never copies section content.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One heading-delimited unit of a markdown document.
///
/// Immutable after parsing. A refreshed document gets brand new sections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSection {
    /// Path of the source document, relative to the corpus root.
    pub document_path: PathBuf,
    /// Heading text. Empty for content preceding the first heading.
    pub title: String,
    /// Raw section body (heading line excluded).
    pub content: String,
    /// Front-matter `key: value` pairs of the owning document.
    pub metadata: BTreeMap<String, String>,
    /// Heading depth, 1 for `#`.
    pub heading_level: usize,
    /// Normalized lexical tokens of `content`.
    pub tokens: Vec<String>,
}

impl DocumentSection {
    /// Stable identifier: `path::title`.
    pub fn identifier(&self) -> String {
        format!("{}::{}", path_label(&self.document_path), self.title)
    }

    /// File name of the owning document.
    pub fn document_name(&self) -> String {
        self.document_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// The title, or the document file name for untitled sections.
    pub fn display_title(&self) -> String {
        if self.title.is_empty() {
            self.document_name()
        } else {
            self.title.clone()
        }
    }

    /// Whitespace-collapsed content, truncated to `max_chars` characters.
    pub fn snippet(&self, max_chars: usize) -> String {
        let clean = self.content.split_whitespace().collect::<Vec<_>>().join(" ");
        if clean.chars().count() <= max_chars {
            return clean;
        }
        let keep = max_chars.saturating_sub(3);
        let mut out: String = clean.chars().take(keep).collect();
        out.push_str("...");
        out
    }
}

/// Render a path with forward slashes so identifiers match across platforms.
pub fn path_label(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// A section with its BM25 relevance.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub section: Arc<DocumentSection>,
    pub score: f64,
}

/// A lexical result re-ranked by reciprocal rank fusion.
///
/// Keeps the BM25 score alongside the fused score instead of overwriting it.
#[derive(Debug, Clone, Serialize)]
pub struct FusedResult {
    pub section: Arc<DocumentSection>,
    /// BM25 score from the lexical stage.
    pub lexical_score: f64,
    /// Reciprocal rank fusion score.
    pub fused_score: f64,
}

/// A section paired with one of its chunks. Lives for a single search call.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub section: Arc<DocumentSection>,
    pub chunk_text: String,
    /// Fused score of the parent section; this is what hybrid scoring normalizes.
    pub lexical_score: f64,
    /// BM25 score of the parent section, kept for diagnostics.
    pub bm25_score: f64,
}

/// A scored chunk handed to downstream consumers.
///
/// `score` is `α·lexical_score + (1-α)·semantic_score + β·bias_applied`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSelection {
    pub section: Arc<DocumentSection>,
    pub chunk_text: String,
    pub score: f64,
    /// Lexical score normalized to `[0, 1]`.
    pub lexical_score: f64,
    /// Cosine similarity remapped to `[0, 1]`.
    pub semantic_score: f64,
    /// 1.0 when the section's role matched the requested role, else 0.0.
    pub bias_applied: f64,
}
