//! Offline retrieval evaluation and hyperparameter grid search.
//!
//! Metrics per labeled query, over the identifiers a [`Retriever`]
//! returns (duplicates keep their first position only):
//!
//! - **Recall@K**: relevant hits in the top K ÷ labeled relevant count.
//! - **MRR@10**: `1 / rank` of the first hit in the top 10.
//! - **nDCG@10**: binary-gain DCG over the top 10, normalized by the DCG of
//!   the same gains sorted best first. Relevant items that were never
//!   retrieved do not lower it; Recall@K covers those.
//!
//! Aggregates are macro averages: every query weighs the same.
//!
//! [`grid_search`] evaluates the Cartesian product of a
//! [`GridSearchSpace`], giving each trial its own copy of the base
//! configuration, and ranks trials by macro nDCG@10.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::pipeline::SearchPipelineConfig;

/// Cut-off used by MRR and nDCG.
pub const RANK_CUTOFF: usize = 10;

/// A labeled query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineQuery {
    pub query: String,
    /// Relevant section identifiers (`path::title`).
    #[serde(rename = "relevant", default)]
    pub relevant_ids: Vec<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub alpha: Option<f64>,
}

impl OfflineQuery {
    pub fn new(query: impl Into<String>, relevant: &[&str]) -> Self {
        Self {
            query: query.into(),
            relevant_ids: relevant.iter().map(|s| s.to_string()).collect(),
            role: None,
            alpha: None,
        }
    }
}

/// Something that answers a labeled query with ranked section identifiers.
pub trait Retriever {
    /// Run `query` with `config` and return up to `limit` identifiers,
    /// best first.
    fn retrieve(
        &mut self,
        query: &OfflineQuery,
        limit: usize,
        config: &SearchPipelineConfig,
    ) -> Vec<String>;
}

/// Evaluation knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOptions {
    /// Results requested per query.
    pub limit: usize,
    /// Recall cut-offs; zeros are dropped, duplicates merged.
    pub ks: Vec<usize>,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            ks: vec![5, 10],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEvaluation {
    pub query: OfflineQuery,
    pub retrieved: Vec<String>,
    pub recall_at_k: BTreeMap<usize, f64>,
    pub mrr_at_10: f64,
    pub ndcg_at_10: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub per_query: Vec<QueryEvaluation>,
    pub macro_recall_at_k: BTreeMap<usize, f64>,
    pub macro_mrr_at_10: f64,
    pub macro_ndcg_at_10: f64,
}

/// Evaluate `queries` against `retriever` using `config`.
///
/// Retrieved identifiers are deduplicated before scoring, keeping the first
/// position of each. Several chunks of one section share an identifier, and
/// counting each of them would let a single section fill the top ranks.
pub fn evaluate_offline<R: Retriever + ?Sized>(
    retriever: &mut R,
    queries: &[OfflineQuery],
    config: &SearchPipelineConfig,
    options: &EvalOptions,
) -> EvaluationReport {
    let ks: Vec<usize> = options
        .ks
        .iter()
        .copied()
        .filter(|&k| k > 0)
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let per_query: Vec<QueryEvaluation> = queries
        .iter()
        .map(|query| {
            let retrieved = dedupe(retriever.retrieve(query, options.limit, config));
            let relevant: HashSet<&str> = query.relevant_ids.iter().map(String::as_str).collect();
            let gains: Vec<bool> = retrieved.iter().map(|id| relevant.contains(id.as_str())).collect();
            QueryEvaluation {
                recall_at_k: ks
                    .iter()
                    .map(|&k| (k, recall_at_k(&gains, k, relevant.len())))
                    .collect(),
                mrr_at_10: mrr_at_k(&gains, RANK_CUTOFF),
                ndcg_at_10: ndcg_at_k(&gains, RANK_CUTOFF),
                query: query.clone(),
                retrieved,
            }
        })
        .collect();

    let macro_recall_at_k = ks
        .iter()
        .map(|&k| {
            let values: Vec<f64> = per_query
                .iter()
                .map(|q| q.recall_at_k.get(&k).copied().unwrap_or(0.0))
                .collect();
            (k, mean(&values))
        })
        .collect();
    let mrr: Vec<f64> = per_query.iter().map(|q| q.mrr_at_10).collect();
    let ndcg: Vec<f64> = per_query.iter().map(|q| q.ndcg_at_10).collect();

    EvaluationReport {
        macro_recall_at_k,
        macro_mrr_at_10: mean(&mrr),
        macro_ndcg_at_10: mean(&ndcg),
        per_query,
    }
}

fn dedupe(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn recall_at_k(gains: &[bool], k: usize, total_relevant: usize) -> f64 {
    if total_relevant == 0 {
        return 0.0;
    }
    let hits = gains.iter().take(k).filter(|&&g| g).count();
    hits as f64 / total_relevant as f64
}

fn mrr_at_k(gains: &[bool], k: usize) -> f64 {
    gains
        .iter()
        .take(k)
        .position(|&g| g)
        .map_or(0.0, |i| 1.0 / (i as f64 + 1.0))
}

fn dcg(gains: impl Iterator<Item = bool>) -> f64 {
    gains
        .enumerate()
        .filter(|(_, g)| *g)
        .map(|(i, _)| 1.0 / (i as f64 + 2.0).log2())
        .sum()
}

fn ndcg_at_k(gains: &[bool], k: usize) -> f64 {
    let top: Vec<bool> = gains.iter().copied().take(k).collect();
    let mut ideal = top.clone();
    ideal.sort_unstable_by(|a, b| b.cmp(a));
    let ideal_dcg = dcg(ideal.into_iter());
    if ideal_dcg == 0.0 {
        return 0.0;
    }
    dcg(top.into_iter()) / ideal_dcg
}

fn default_alpha_values() -> Vec<f64> {
    vec![0.4, 0.5, 0.6, 0.7, 0.8]
}
fn default_fusion_top_n_values() -> Vec<usize> {
    vec![30, 50, 80]
}
fn default_mmr_limit_values() -> Vec<usize> {
    vec![10, 20, 30]
}
fn default_mmr_lambda_values() -> Vec<f64> {
    vec![0.7, 0.8, 0.9]
}
fn default_role_bias_values() -> Vec<f64> {
    vec![0.0, 0.03, 0.05, 0.1]
}

/// Candidate values per tuned parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSearchSpace {
    #[serde(default = "default_alpha_values")]
    pub alpha: Vec<f64>,
    #[serde(default = "default_fusion_top_n_values")]
    pub fusion_top_n: Vec<usize>,
    #[serde(default = "default_mmr_limit_values")]
    pub mmr_limit: Vec<usize>,
    #[serde(default = "default_mmr_lambda_values")]
    pub mmr_lambda: Vec<f64>,
    #[serde(default = "default_role_bias_values")]
    pub role_bias: Vec<f64>,
}

impl Default for GridSearchSpace {
    fn default() -> Self {
        Self {
            alpha: default_alpha_values(),
            fusion_top_n: default_fusion_top_n_values(),
            mmr_limit: default_mmr_limit_values(),
            mmr_lambda: default_mmr_lambda_values(),
            role_bias: default_role_bias_values(),
        }
    }
}

impl GridSearchSpace {
    /// Number of trials the space expands to.
    pub fn len(&self) -> usize {
        self.alpha.len()
            * self.fusion_top_n.len()
            * self.mmr_limit.len()
            * self.mmr_lambda.len()
            * self.role_bias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every combination applied to a copy of `base`, in nested order
    /// alpha, fusion_top_n, mmr_limit, mmr_lambda, role_bias.
    pub fn configs(&self, base: &SearchPipelineConfig) -> Vec<SearchPipelineConfig> {
        let mut out = Vec::with_capacity(self.len());
        for &alpha in &self.alpha {
            for &fusion_top_n in &self.fusion_top_n {
                for &mmr_limit in &self.mmr_limit {
                    for &mmr_lambda in &self.mmr_lambda {
                        for &role_bias in &self.role_bias {
                            out.push(SearchPipelineConfig {
                                alpha,
                                fusion_top_n,
                                mmr_limit,
                                mmr_lambda,
                                role_bias,
                                ..base.clone()
                            });
                        }
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridSearchEntry {
    pub alpha: f64,
    pub fusion_top_n: usize,
    pub mmr_limit: usize,
    pub mmr_lambda: f64,
    pub role_bias: f64,
    pub report: EvaluationReport,
}

/// Trials ranked by macro nDCG@10, best first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridSearchReport {
    pub entries: Vec<GridSearchEntry>,
}

impl GridSearchReport {
    /// The best `n` entries (at least one when any exist).
    pub fn top(&self, n: usize) -> &[GridSearchEntry] {
        &self.entries[..n.max(1).min(self.entries.len())]
    }

    pub fn best(&self) -> Option<&GridSearchEntry> {
        self.entries.first()
    }
}

/// Evaluate every combination in `space`. `base` supplies the parameters
/// the space does not tune and is never modified.
pub fn grid_search<R: Retriever + ?Sized>(
    retriever: &mut R,
    queries: &[OfflineQuery],
    base: &SearchPipelineConfig,
    space: &GridSearchSpace,
    options: &EvalOptions,
) -> GridSearchReport {
    let trials = space.configs(base);
    tracing::info!(trials = trials.len(), queries = queries.len(), "grid search");

    let mut entries: Vec<GridSearchEntry> = trials
        .into_iter()
        .map(|config| {
            let report = evaluate_offline(retriever, queries, &config, options);
            tracing::debug!(
                alpha = config.alpha,
                fusion_top_n = config.fusion_top_n,
                mmr_limit = config.mmr_limit,
                mmr_lambda = config.mmr_lambda,
                role_bias = config.role_bias,
                ndcg = report.macro_ndcg_at_10,
                "trial"
            );
            GridSearchEntry {
                alpha: config.alpha,
                fusion_top_n: config.fusion_top_n,
                mmr_limit: config.mmr_limit,
                mmr_lambda: config.mmr_lambda,
                role_bias: config.role_bias,
                report,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.report
            .macro_ndcg_at_10
            .partial_cmp(&a.report.macro_ndcg_at_10)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    GridSearchReport { entries }
}
