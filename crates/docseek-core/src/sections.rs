//! Markdown sectionizer.
//!
//! A document is split into one [`DocumentSection`] per heading. Content
//! before the first heading becomes an untitled section. An optional front
//! matter block delimited by `---` lines supplies `key: value` metadata that
//! every section of the document inherits.
//!
//! Lines inside fenced code blocks are never treated as headings.

use std::collections::BTreeMap;
use std::path::Path;

use crate::models::DocumentSection;
use crate::tokenize::Tokenizer;

/// Parse a markdown document into sections.
///
/// Sections whose content yields no tokens are dropped.
pub fn parse_markdown(path: &Path, text: &str, tokenizer: &Tokenizer) -> Vec<DocumentSection> {
    let (metadata, body) = split_front_matter(text);
    split_sections(body)
        .into_iter()
        .filter_map(|(title, level, content)| {
            let tokens = tokenizer.tokenize(&content);
            if tokens.is_empty() {
                return None;
            }
            Some(DocumentSection {
                document_path: path.to_path_buf(),
                title,
                content,
                metadata: metadata.clone(),
                heading_level: level,
                tokens,
            })
        })
        .collect()
}

/// Separate a leading `---` front matter block from the body.
///
/// Only flat `key: value` lines are understood; anything else in the block
/// is ignored. Values lose surrounding double quotes.
pub fn split_front_matter(text: &str) -> (BTreeMap<String, String>, &str) {
    if !text.starts_with("---") {
        return (BTreeMap::new(), text);
    }
    let mut parts = text.splitn(3, "---");
    let _ = parts.next();
    let (Some(header), Some(rest)) = (parts.next(), parts.next()) else {
        return (BTreeMap::new(), text);
    };

    let metadata = header
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| {
            (
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            )
        })
        .filter(|(key, _)| !key.is_empty())
        .collect();
    (metadata, rest)
}

/// Split a markdown body into `(title, level, content)` triples.
fn split_sections(body: &str) -> Vec<(String, usize, String)> {
    let mut out = Vec::new();
    let mut title = String::new();
    let mut level = 1;
    let mut lines: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in body.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }
        if !in_fence && line.starts_with('#') {
            if !lines.is_empty() {
                out.push((title.clone(), level, lines.join("\n").trim().to_string()));
                lines.clear();
            }
            level = line.chars().take_while(|c| *c == '#').count();
            title = line
                .trim()
                .trim_start_matches(|c: char| c == '#' || c == ' ')
                .to_string();
        } else {
            lines.push(line);
        }
    }
    if !lines.is_empty() {
        out.push((title, level, lines.join("\n").trim().to_string()));
    }
    out
}
