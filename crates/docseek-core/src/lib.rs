//! # docseek core
//!
//! Pure retrieval logic for docseek: markdown sectionizing, tokenization,
//! the BM25 lexical index, the embedding layer, the hybrid search pipeline
//! and offline evaluation.
//!
//! This crate performs no filesystem walking and no network I/O. Remote
//! embedding services plug in through [`embedding::EmbeddingBackend`]; the
//! corpus arrives as already-read markdown strings.
//!
//! ```text
//! query ─▶ tokenize ─▶ BM25 pool ─▶ RRF ─▶ embed sections ─▶ MMR
//!                                                            │
//!          selections ◀─ sort ◀─ hybrid score ◀─ embed ◀─ chunk
//! ```

pub mod bm25;
pub mod chunk;
pub mod embedding;
pub mod evaluation;
pub mod fusion;
pub mod models;
pub mod pipeline;
pub mod sections;
pub mod tokenize;
pub mod trace;
