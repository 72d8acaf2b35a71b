//! In-memory BM25 index over document sections.
//!
//! Statistics are computed once per build over the full section set; there
//! is no incremental maintenance. Rebuilding is cheap at documentation
//! scale (hundreds to low thousands of sections).
//!
//! ```text
//! idf(t)      = ln((N - df + 0.5) / (df + 0.5) + 1)
//! score(q, s) = Σ idf(t) · tf·(k1+1) / (tf + k1·(1 - b + b·|s|/avgdl))
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{DocumentSection, SearchResult};

/// Term frequency saturation.
pub const BM25_K1: f64 = 1.5;
/// Length normalization strength.
pub const BM25_B: f64 = 0.75;

/// BM25 statistics plus per-section term frequencies.
#[derive(Debug, Default)]
pub struct Bm25Index {
    sections: Vec<Arc<DocumentSection>>,
    term_freqs: Vec<HashMap<String, usize>>,
    idf: HashMap<String, f64>,
    avg_len: f64,
}

impl Bm25Index {
    /// Build the index over `sections`, keeping their order for tie-breaks.
    pub fn build(sections: &[Arc<DocumentSection>]) -> Self {
        let total = sections.len();
        if total == 0 {
            return Self::default();
        }

        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        let mut term_freqs = Vec::with_capacity(total);
        let mut total_len = 0usize;

        for section in sections {
            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in &section.tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }
            for token in tf.keys() {
                *doc_freqs.entry(token.clone()).or_insert(0) += 1;
            }
            total_len += section.tokens.len();
            term_freqs.push(tf);
        }

        let n = total as f64;
        let idf = doc_freqs
            .into_iter()
            .map(|(token, df)| {
                let df = df as f64;
                (token, ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
            })
            .collect();

        Self {
            sections: sections.to_vec(),
            term_freqs,
            idf,
            avg_len: total_len as f64 / n,
        }
    }

    /// Number of indexed sections.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Returns `true` when no sections are indexed.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Inverse document frequency of `token`, if it occurs in the corpus.
    pub fn idf(&self, token: &str) -> Option<f64> {
        self.idf.get(token).copied()
    }

    /// Average section length in tokens.
    pub fn average_length(&self) -> f64 {
        self.avg_len
    }

    /// Score every section against `query_tokens` and return the best
    /// `pool_size`, highest first. Ties keep corpus order.
    pub fn search(&self, query_tokens: &[String], pool_size: usize) -> Vec<SearchResult> {
        if query_tokens.is_empty() || self.sections.is_empty() || pool_size == 0 {
            return Vec::new();
        }

        let avg_len = if self.avg_len > 0.0 { self.avg_len } else { 1.0 };
        let mut results: Vec<SearchResult> = self
            .sections
            .iter()
            .zip(&self.term_freqs)
            .filter_map(|(section, tf)| {
                let len = section.tokens.len() as f64;
                let score: f64 = query_tokens
                    .iter()
                    .filter_map(|token| {
                        let freq = *tf.get(token)? as f64;
                        let idf = self.idf.get(token)?;
                        let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len);
                        Some(idf * freq * (BM25_K1 + 1.0) / (freq + norm))
                    })
                    .sum();
                (score > 0.0).then(|| SearchResult {
                    section: Arc::clone(section),
                    score,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(pool_size);
        results
    }
}
