//! Rank fusion and diversification.
//!
//! - [`reciprocal_rank_fusion`] re-scores a ranking by position:
//!   `score(id) = Σ 1 / (k + rank + 1)`.
//! - [`maximal_marginal_relevance`] greedily picks candidates maximizing
//!   `λ · relevance − (1 − λ) · max_sim(selected)`.

use std::collections::HashMap;

use crate::embedding::cosine_similarity;
use crate::models::{FusedResult, SearchResult};

/// Fuse a ranked list with reciprocal rank fusion.
///
/// Repeated identifiers accumulate their contributions; the first
/// occurrence supplies the section and lexical score. Output is sorted by
/// fused score, highest first, ties in first-seen order.
pub fn reciprocal_rank_fusion(ranking: &[SearchResult], k: usize) -> Vec<FusedResult> {
    let mut order: Vec<FusedResult> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (rank, result) in ranking.iter().enumerate() {
        let contribution = 1.0 / (k as f64 + rank as f64 + 1.0);
        let id = result.section.identifier();
        match positions.get(&id) {
            Some(&pos) => order[pos].fused_score += contribution,
            None => {
                positions.insert(id, order.len());
                order.push(FusedResult {
                    section: result.section.clone(),
                    lexical_score: result.score,
                    fused_score: contribution,
                });
            }
        }
    }

    order.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

/// Select up to `limit` diverse candidates with maximal marginal relevance.
///
/// `relevance[i]` is the similarity of `vectors[i]` to the query. The first
/// pick is always the most relevant candidate. Ties go to the earliest
/// index. `lambda` is clamped to `[0, 1]`.
pub fn maximal_marginal_relevance(
    vectors: &[Vec<f32>],
    relevance: &[f64],
    limit: usize,
    lambda: f64,
) -> Vec<usize> {
    let n = vectors.len().min(relevance.len());
    let lambda = lambda.clamp(0.0, 1.0);
    let limit = limit.min(n);
    let mut available: Vec<usize> = (0..n).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(limit);

    while !available.is_empty() && selected.len() < limit {
        let mut best: Option<(usize, f64)> = None;
        for (slot, &idx) in available.iter().enumerate() {
            let score = if selected.is_empty() {
                relevance[idx]
            } else {
                let penalty = selected
                    .iter()
                    .map(|&chosen| cosine_similarity(&vectors[idx], &vectors[chosen]) as f64)
                    .fold(f64::NEG_INFINITY, f64::max);
                lambda * relevance[idx] - (1.0 - lambda) * penalty
            };
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((slot, score));
            }
        }
        let Some((slot, _)) = best else { break };
        selected.push(available.remove(slot));
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentSection;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn result(name: &str, score: f64) -> SearchResult {
        SearchResult {
            section: Arc::new(DocumentSection {
                document_path: PathBuf::from(format!("{name}.md")),
                title: name.to_string(),
                content: String::new(),
                metadata: BTreeMap::new(),
                heading_level: 1,
                tokens: Vec::new(),
            }),
            score,
        }
    }

    #[test]
    fn test_rrf_empty() {
        assert!(reciprocal_rank_fusion(&[], 60).is_empty());
    }

    #[test]
    fn test_rrf_scores_by_rank_and_keeps_bm25() {
        let fused = reciprocal_rank_fusion(&[result("a", 9.0), result("b", 4.0)], 60);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].section.title, "a");
        assert!((fused[0].fused_score - 1.0 / 61.0).abs() < 1e-12);
        assert!((fused[1].fused_score - 1.0 / 62.0).abs() < 1e-12);
        assert!((fused[0].lexical_score - 9.0).abs() < 1e-12);
        assert!((fused[1].lexical_score - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_accumulates_duplicates() {
        let fused = reciprocal_rank_fusion(
            &[result("a", 3.0), result("b", 2.0), result("a", 1.0)],
            0,
        );
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].section.title, "a");
        assert!((fused[0].fused_score - (1.0 + 1.0 / 3.0)).abs() < 1e-12);
        assert!((fused[0].lexical_score - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_mmr_empty() {
        assert!(maximal_marginal_relevance(&[], &[], 5, 0.5).is_empty());
    }

    #[test]
    fn test_mmr_lambda_one_is_relevance_order() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]];
        let relevance = vec![0.2, 0.9, 0.5];
        assert_eq!(maximal_marginal_relevance(&vectors, &relevance, 3, 1.0), vec![1, 2, 0]);
    }

    #[test]
    fn test_mmr_lambda_zero_skips_near_duplicate() {
        // 0 and 1 are near duplicates; 1 is the second most relevant.
        let vectors = vec![vec![1.0, 0.0], vec![0.99, 0.14], vec![0.0, 1.0]];
        let relevance = vec![0.95, 0.9, 0.1];
        let picked = maximal_marginal_relevance(&vectors, &relevance, 2, 0.0);
        assert_eq!(picked, vec![0, 2]);
    }

    #[test]
    fn test_mmr_respects_limit() {
        let vectors = vec![vec![1.0, 0.0]; 5];
        let relevance = vec![0.5; 5];
        let picked = maximal_marginal_relevance(&vectors, &relevance, 2, 0.8);
        assert_eq!(picked, vec![0, 1]);
    }

    #[test]
    fn test_mmr_clamps_lambda() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let relevance = vec![0.1, 0.9];
        assert_eq!(maximal_marginal_relevance(&vectors, &relevance, 2, 7.0), vec![1, 0]);
    }
}
