//! Query sets and CLI rendering for `eval` and `tune`.
//!
//! A query set is a TOML file:
//!
//! ```toml
//! [[queries]]
//! query = "capital of the realm"
//! relevant = ["lore/atlas.md::Eldertown"]
//! role = "guionista"            # optional
//! alpha = 0.7                   # optional
//!
//! # optional: overrides the candidate values swept by `tune`
//! [grid]
//! alpha = [0.5, 0.7]
//! role_bias = [0.0, 0.05]
//! ```

use anyhow::{bail, Context, Result};
use docseek_core::evaluation::{
    evaluate_offline, grid_search, EvalOptions, EvaluationReport, GridSearchReport,
    GridSearchSpace, OfflineQuery,
};
use serde::Deserialize;
use std::path::Path;

use crate::index::DocumentationIndex;

/// Labeled queries plus an optional tuning grid.
#[derive(Debug, Clone, Deserialize)]
pub struct QuerySet {
    #[serde(default)]
    pub queries: Vec<OfflineQuery>,
    #[serde(default)]
    pub grid: Option<GridSearchSpace>,
}

pub fn load_query_set(path: &Path) -> Result<QuerySet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read query set: {}", path.display()))?;
    parse_query_set(&content).with_context(|| format!("Invalid query set: {}", path.display()))
}

pub fn parse_query_set(content: &str) -> Result<QuerySet> {
    let set: QuerySet = toml::from_str(content).with_context(|| "Failed to parse query set")?;
    if set.queries.is_empty() {
        bail!("query set has no [[queries]] entries");
    }
    if set.grid.as_ref().is_some_and(GridSearchSpace::is_empty) {
        bail!("[grid] has an empty value list");
    }
    Ok(set)
}

pub fn run_eval(
    index: &mut DocumentationIndex,
    set: &QuerySet,
    options: &EvalOptions,
    json: bool,
) -> Result<()> {
    let config = index.pipeline_config().clone();
    let report = evaluate_offline(index, &set.queries, &config, options);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_report(&report));
    }
    Ok(())
}

pub fn run_tune(
    index: &mut DocumentationIndex,
    set: &QuerySet,
    options: &EvalOptions,
    top: usize,
    json: bool,
) -> Result<()> {
    let base = index.pipeline_config().clone();
    let space = set.grid.clone().unwrap_or_default();
    let report = grid_search(index, &set.queries, &base, &space, options);
    if json {
        println!("{}", serde_json::to_string_pretty(report.top(top))?);
    } else {
        print!("{}", format_grid(&report, top));
    }
    Ok(())
}

fn format_macro(report: &EvaluationReport) -> String {
    let mut parts: Vec<String> = report
        .macro_recall_at_k
        .iter()
        .map(|(k, v)| format!("Recall@{k}={v:.3}"))
        .collect();
    parts.push(format!("MRR@10={:.3}", report.macro_mrr_at_10));
    parts.push(format!("nDCG@10={:.3}", report.macro_ndcg_at_10));
    parts.join(" ")
}

/// Per-query lines followed by the macro averages.
pub fn format_report(report: &EvaluationReport) -> String {
    let mut out = String::new();
    for q in &report.per_query {
        out.push_str(&format!(
            "- {} (retrieved={}, MRR@10={:.3}, nDCG@10={:.3})\n",
            q.query.query,
            q.retrieved.len(),
            q.mrr_at_10,
            q.ndcg_at_10
        ));
    }
    out.push_str(&format!(
        "{} queries: {}\n",
        report.per_query.len(),
        format_macro(report)
    ));
    out
}

/// The best `top` trials, one line each.
pub fn format_grid(report: &GridSearchReport, top: usize) -> String {
    if report.entries.is_empty() {
        return "No trials.\n".to_string();
    }
    let mut out = format!("{} trials\n", report.entries.len());
    for (i, e) in report.top(top).iter().enumerate() {
        out.push_str(&format!(
            "{}. α={:.2} N={} M={} λ={:.2} β={:.2}: {}\n",
            i + 1,
            e.alpha,
            e.fusion_top_n,
            e.mmr_limit,
            e.mmr_lambda,
            e.role_bias,
            format_macro(&e.report)
        ));
    }
    out
}
