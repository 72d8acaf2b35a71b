//! # docseek
//!
//! Local hybrid retrieval over a tree of markdown documents.
//!
//! docseek scans a documentation directory, splits every file into
//! heading-delimited sections and answers natural-language queries with
//! the most relevant passages, each carrying its score breakdown and a
//! per-stage trace.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────────────┐   ┌─────────────────────────┐
//! │  docs/*.md  │──▶│ DocumentationIndex │──▶│ HybridSearchPipeline    │
//! │  (scanner)  │   │  sections + BM25   │   │ RRF → MMR → chunk → mix │
//! └─────────────┘   └────────────────────┘   └────────────┬────────────┘
//!                                                         │
//!                                   ┌─────────────────────┤
//!                                   ▼                     ▼
//!                             ┌──────────┐         ┌─────────────┐
//!                             │   CLI    │         │ eval / tune │
//!                             │(docseek) │         │  (offline)  │
//!                             └──────────┘         └─────────────┘
//! ```
//!
//! The algorithms live in `docseek-core`; this crate adds configuration,
//! directory scanning, network embedding backends and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! docseek search "capital of the realm"
//! docseek search "eldertown" --role guionista --trace
//! docseek suggest eld
//! docseek eval queries.toml
//! docseek tune queries.toml --top 5
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`connector_fs`] | Documentation tree scanner |
//! | [`index`] | In-memory index with mtime refresh and suggestions |
//! | [`embedding`] | Ollama/OpenAI backends, directory cache, embedder construction |
//! | [`search`] | Result, suggestion and document listing output |
//! | [`eval`] | Query sets, offline evaluation and grid search output |

pub mod config;
pub mod connector_fs;
pub mod embedding;
pub mod eval;
pub mod index;
pub mod search;

pub use docseek_core as core;
