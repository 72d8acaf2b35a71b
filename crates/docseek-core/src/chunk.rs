//! Sentence-aligned section chunker.
//!
//! Splits a section's content into overlapping windows bounded by a token
//! budget. Chunks never break inside a sentence.
//!
//! # Algorithm
//!
//! 1. Split content into sentences at whitespace following `.`, `!` or `?`.
//! 2. Accumulate sentences. Flush the current chunk when the next sentence
//!    would push it over `chunk_size_tokens` **and** the chunk already holds
//!    at least half the budget.
//! 3. Seed the next chunk with whole trailing sentences of the flushed one
//!    until at least `overlap_tokens` tokens are carried over.
//! 4. Prefix every chunk with a `document stem › section title` header.
//! 5. A section without sentences still yields one chunk.
//!
//! # Example
//!
//! ```rust
//! use docseek_core::chunk::chunk_section;
//! use docseek_core::models::DocumentSection;
//! use std::path::PathBuf;
//!
//! let section = DocumentSection {
//!     document_path: PathBuf::from("world_atlas.md"),
//!     title: "Eldertown".to_string(),
//!     content: "Eldertown is the capital. It sits on the coast.".to_string(),
//!     metadata: Default::default(),
//!     heading_level: 1,
//!     tokens: vec!["eldertown".to_string()],
//! };
//! let chunks = chunk_section(&section, 400, 40);
//! assert_eq!(chunks.len(), 1);
//! assert!(chunks[0].starts_with("world atlas › Eldertown\n\n"));
//! ```

use crate::models::DocumentSection;
use crate::tokenize::{count_tokens, split_sentences};

/// Smallest token budget a chunk may be configured with.
pub const MIN_CHUNK_TOKENS: usize = 50;

/// Separator between the document stem and section title in chunk headers.
pub const HEADER_SEPARATOR: &str = " › ";

/// Split `section` into header-prefixed chunks.
///
/// `chunk_size_tokens` is raised to [`MIN_CHUNK_TOKENS`] if smaller.
pub fn chunk_section(
    section: &DocumentSection,
    chunk_size_tokens: usize,
    overlap_tokens: usize,
) -> Vec<String> {
    let sentences = split_sentences(&section.content);
    if sentences.is_empty() {
        return vec![compose_chunk_text(section, &section.content)];
    }

    let chunk_size = chunk_size_tokens.max(MIN_CHUNK_TOKENS);
    let mut chunks = Vec::new();
    // (sentence, token count)
    let mut current: Vec<(String, usize)> = Vec::new();
    let mut current_tokens = 0usize;

    for sentence in sentences {
        let tokens = count_tokens(&sentence);
        if !current.is_empty()
            && current_tokens + tokens > chunk_size
            && current_tokens >= chunk_size / 2
        {
            chunks.push(compose_chunk_text(section, &join_sentences(&current)));
            current = carry_overlap(&current, overlap_tokens);
            current_tokens = current.iter().map(|(_, t)| t).sum();
        }
        current_tokens += tokens;
        current.push((sentence, tokens));
    }

    if !current.is_empty() {
        chunks.push(compose_chunk_text(section, &join_sentences(&current)));
    }
    chunks
}

/// Trailing whole sentences of `flushed` totalling at least `overlap_tokens`.
fn carry_overlap(flushed: &[(String, usize)], overlap_tokens: usize) -> Vec<(String, usize)> {
    if overlap_tokens == 0 {
        return Vec::new();
    }
    let mut carried = 0usize;
    let mut start = flushed.len();
    while start > 0 && carried < overlap_tokens {
        start -= 1;
        carried += flushed[start].1;
    }
    flushed[start..].to_vec()
}

fn join_sentences(sentences: &[(String, usize)]) -> String {
    sentences
        .iter()
        .map(|(s, _)| s.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Prefix `body` with the `stem › title` header of its section.
///
/// Underscores in the stem read as spaces. Falls back to the file name when
/// both parts are empty.
pub fn compose_chunk_text(section: &DocumentSection, body: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let stem = section
        .document_path
        .file_stem()
        .map(|s| s.to_string_lossy().replace('_', " "))
        .unwrap_or_default();
    if !stem.is_empty() {
        parts.push(stem);
    }
    if !section.title.is_empty() {
        parts.push(section.title.clone());
    }
    let header = if parts.is_empty() {
        section.document_name()
    } else {
        parts.join(HEADER_SEPARATOR)
    };
    format!("{header}\n\n{}", body.trim()).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn section(content: &str) -> DocumentSection {
        DocumentSection {
            document_path: PathBuf::from("lore/world_atlas.md"),
            title: "Eldertown".to_string(),
            content: content.to_string(),
            metadata: BTreeMap::new(),
            heading_level: 1,
            tokens: Vec::new(),
        }
    }

    /// `count` sentences of exactly ten tokens each.
    fn ten_token_sentences(count: usize) -> String {
        (0..count)
            .map(|i| format!("Sentence {i} has exactly ten words in it right here."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn body(chunk: &str) -> &str {
        chunk.split_once("\n\n").map(|(_, b)| b).unwrap_or("")
    }

    #[test]
    fn test_header_composition() {
        let chunks = chunk_section(&section("Short text."), 400, 40);
        assert_eq!(chunks, vec!["world atlas › Eldertown\n\nShort text.".to_string()]);
    }

    #[test]
    fn test_header_untitled_section() {
        let mut s = section("Body.");
        s.title.clear();
        assert_eq!(compose_chunk_text(&s, "Body."), "world atlas\n\nBody.");
    }

    #[test]
    fn test_empty_section_yields_one_chunk() {
        let chunks = chunk_section(&section("   "), 400, 40);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "world atlas › Eldertown");
    }

    #[test]
    fn test_thousand_tokens_make_three_chunks() {
        let s = section(&ten_token_sentences(100));
        assert_eq!(count_tokens(&s.content), 1000);
        let chunks = chunk_section(&s, 400, 40);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(count_tokens(body(chunk)) <= 440, "chunk too large");
        }
    }

    #[test]
    fn test_consecutive_chunks_share_sentences() {
        let s = section(&ten_token_sentences(100));
        let chunks = chunk_section(&s, 400, 40);
        for pair in chunks.windows(2) {
            let prev = split_sentences(body(&pair[0]));
            let next = split_sentences(body(&pair[1]));
            assert!(prev.last().is_some_and(|last| next.contains(last)));
            assert_eq!(next.first(), prev.get(prev.len() - 4));
        }
    }

    #[test]
    fn test_chunks_end_on_sentence_boundary() {
        let s = section(&format!("{} Trailing words without a stop", ten_token_sentences(60)));
        let chunks = chunk_section(&s, 200, 20);
        let (last, rest) = chunks.split_last().unwrap();
        for chunk in rest {
            assert!(chunk.ends_with(['.', '!', '?']));
        }
        assert!(last.ends_with("stop"));
    }

    #[test]
    fn test_no_overlap() {
        let s = section(&ten_token_sentences(100));
        let chunks = chunk_section(&s, 400, 0);
        let total: usize = chunks.iter().map(|c| count_tokens(body(c))).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn test_minimum_budget_enforced() {
        let s = section(&ten_token_sentences(10));
        // A budget of 5 would split every sentence; the floor keeps 100 tokens in 2 chunks.
        let chunks = chunk_section(&s, 5, 0);
        assert_eq!(chunks.len(), 2);
    }
}
