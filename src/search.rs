//! CLI rendering for `search`, `suggest` and `docs`.
//!
//! Text output is one block per selection:
//!
//! ```text
//! 1. [0.91] Eldertown
//!     id: lore/atlas.md::Eldertown
//!     scores: lexical=1.00 semantic=0.85 bias=1.00
//!     excerpt: "Eldertown is the capital of the realm..."
//! ```
//!
//! `--json` prints the selections (or, with `--trace`, the full trace) as
//! pretty JSON instead.

use anyhow::Result;
use docseek_core::models::PipelineSelection;
use docseek_core::pipeline::SearchOptions;
use docseek_core::trace::DEFAULT_ITEMS_PER_STAGE;

use crate::index::DocumentationIndex;

const EXCERPT_CHARS: usize = 200;

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputMode {
    pub json: bool,
    pub trace: bool,
}

pub fn run_search(
    index: &mut DocumentationIndex,
    query: &str,
    options: &SearchOptions,
    mode: OutputMode,
) -> Result<()> {
    let selections = index.search(query, options);

    if mode.json {
        let json = match (mode.trace, index.last_trace()) {
            (true, Some(trace)) => serde_json::to_string_pretty(trace)?,
            _ => serde_json::to_string_pretty(&selections)?,
        };
        println!("{json}");
        return Ok(());
    }

    print!("{}", format_selections(&selections));
    if mode.trace {
        if let Some(trace) = index.last_trace() {
            println!("{}", trace.render(DEFAULT_ITEMS_PER_STAGE));
        }
    }
    Ok(())
}

/// Text block for a result list; `"No results.\n"` when empty.
pub fn format_selections(selections: &[PipelineSelection]) -> String {
    if selections.is_empty() {
        return "No results.\n".to_string();
    }

    let mut out = String::new();
    for (i, s) in selections.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{:.2}] {}\n",
            i + 1,
            s.score,
            s.section.display_title()
        ));
        out.push_str(&format!("    id: {}\n", s.section.identifier()));
        out.push_str(&format!(
            "    scores: lexical={:.2} semantic={:.2} bias={:.2}\n",
            s.lexical_score, s.semantic_score, s.bias_applied
        ));
        out.push_str(&format!(
            "    excerpt: \"{}\"\n\n",
            s.section.snippet(EXCERPT_CHARS)
        ));
    }
    out
}

pub fn run_suggest(index: &DocumentationIndex, prefix: &str, limit: usize, json: bool) -> Result<()> {
    let suggestions = index.suggest(prefix, limit);
    if json {
        println!("{}", serde_json::to_string_pretty(&suggestions)?);
    } else if suggestions.is_empty() {
        println!("No suggestions.");
    } else {
        for s in &suggestions {
            println!("{s}");
        }
    }
    Ok(())
}

pub fn run_docs(index: &DocumentationIndex, json: bool) -> Result<()> {
    let rows: Vec<(String, usize)> = index
        .list_documents()
        .iter()
        .map(|path| {
            let sections = index.document(path).map_or(0, |d| d.sections.len());
            (path.to_string_lossy().replace('\\', "/"), sections)
        })
        .collect();

    if json {
        let value: Vec<serde_json::Value> = rows
            .iter()
            .map(|(path, sections)| serde_json::json!({ "path": path, "sections": sections }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for (path, sections) in &rows {
        println!("{path} ({sections} sections)");
    }
    println!(
        "{} documents, {} sections",
        rows.len(),
        index.sections().len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docseek_core::models::DocumentSection;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn selection() -> PipelineSelection {
        PipelineSelection {
            section: Arc::new(DocumentSection {
                document_path: PathBuf::from("lore/atlas.md"),
                title: "Eldertown".to_string(),
                content: "Eldertown is\nthe capital.".to_string(),
                metadata: BTreeMap::new(),
                heading_level: 1,
                tokens: vec!["eldertown".to_string(), "capital".to_string()],
            }),
            chunk_text: "atlas › Eldertown\n\nEldertown is the capital.".to_string(),
            score: 0.912,
            lexical_score: 1.0,
            semantic_score: 0.854,
            bias_applied: 1.0,
        }
    }

    #[test]
    fn test_format_empty() {
        assert_eq!(format_selections(&[]), "No results.\n");
    }

    #[test]
    fn test_format_selection_block() {
        let text = format_selections(&[selection()]);
        assert_eq!(
            text,
            "1. [0.91] Eldertown\n    id: lore/atlas.md::Eldertown\n    scores: lexical=1.00 semantic=0.85 bias=1.00\n    excerpt: \"Eldertown is the capital.\"\n\n"
        );
    }
}
