//! Text normalization and tokenization.
//!
//! [`Tokenizer`] produces the lexical tokens used by the BM25 index. The
//! same instance must tokenize both sections and queries, otherwise folded
//! and unfolded forms stop matching.
//!
//! The free functions here are unfiltered helpers: [`word_tokens`] for
//! catalog keys and the hash embedder, [`count_tokens`] for chunk budgets
//! and [`split_sentences`] for the chunker.

use std::collections::HashSet;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Spanish and English function words that carry no retrieval signal.
const DEFAULT_STOPWORDS: &[&str] = &[
    "el", "la", "los", "las", "un", "una", "unos", "unas", "es", "son", "era", "eran",
    "fueron", "sea", "sean", "que", "como", "para", "con", "por", "del", "desde", "hasta",
    "ante", "sobre", "tras", "durante", "mediante", "este", "esta", "estos", "estas", "esto",
    "aquel", "aquella", "aquellos", "aquellas", "uno", "todo", "toda", "todos", "todas",
    "muy", "más", "menos", "mucho", "poco", "también", "tampoco", "siempre", "nunca", "aquí",
    "allí", "allá", "acá", "hoy", "ayer", "mañana", "anoche", "ahora", "entonces", "después",
    "antes", "primero", "primera", "último", "última", "segundo", "segunda", "tercero",
    "tercera", "cuarto", "cuarta", "quinto", "quinta", "sexto", "séptimo", "octavo",
    "noveno", "décimo",
    // English
    "the", "and", "are", "for", "with", "that", "this", "these", "those", "from", "into",
    "was", "were", "will", "but", "not", "its", "their", "then", "there", "such", "also",
];

/// Lexical tokenizer: NFD normalization, optional diacritic stripping,
/// case folding, stopword and short-token removal.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    strip_diacritics: bool,
    min_token_len: usize,
    stopwords: HashSet<String>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(true, 3, &[])
    }
}

impl Tokenizer {
    /// Build a tokenizer with the default stopword list plus `extra_stopwords`.
    ///
    /// Stopwords are folded with the same rules as the text, so `"más"`
    /// still matches when diacritics are stripped.
    pub fn new(strip_diacritics: bool, min_token_len: usize, extra_stopwords: &[String]) -> Self {
        let mut tokenizer = Self {
            strip_diacritics,
            min_token_len,
            stopwords: HashSet::new(),
        };
        let stopwords = DEFAULT_STOPWORDS
            .iter()
            .map(|w| w.to_string())
            .chain(extra_stopwords.iter().cloned())
            .map(|w| tokenizer.fold(&w))
            .collect();
        tokenizer.stopwords = stopwords;
        tokenizer
    }

    /// Normalize `text` into lowercase form, stripping diacritics if enabled.
    pub fn fold(&self, text: &str) -> String {
        let normalized: String = if self.strip_diacritics {
            text.nfd().filter(|c| !is_combining_mark(*c)).collect()
        } else {
            text.nfc().collect()
        };
        normalized.to_lowercase()
    }

    /// Tokenize `text` for lexical indexing or querying.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        word_tokens(&self.fold(text))
            .into_iter()
            .filter(|t| t.chars().count() >= self.min_token_len)
            .filter(|t| !self.stopwords.contains(t))
            .collect()
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Lowercased runs of word characters, without any filtering.
pub fn word_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !is_word_char(c))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Number of word-character runs in `text`. Used as the token budget unit.
pub fn count_tokens(text: &str) -> usize {
    text.split(|c: char| !is_word_char(c))
        .filter(|t| !t.is_empty())
        .count()
}

/// Split text into sentences at whitespace that follows `.`, `!` or `?`.
///
/// Sentences are trimmed and empty ones dropped; the terminator stays
/// attached to its sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;
    let mut in_break = false;

    for c in trimmed.chars() {
        if c.is_whitespace() && matches!(prev, Some('.' | '!' | '?')) {
            in_break = true;
        }
        if in_break {
            if c.is_whitespace() {
                continue;
            }
            push_sentence(&mut sentences, &current);
            current.clear();
            in_break = false;
        }
        current.push(c);
        prev = Some(c);
    }
    push_sentence(&mut sentences, &current);
    sentences
}

fn push_sentence(out: &mut Vec<String>, sentence: &str) {
    let s = sentence.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
}
