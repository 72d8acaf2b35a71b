//! In-memory documentation index.
//!
//! [`DocumentationIndex`] owns the parsed corpus and ties the tokenizer,
//! the BM25 index and the [`HybridSearchPipeline`] together.
//!
//! # Refresh
//!
//! Each path moves through three states: unseen, tracked-stale and
//! tracked-fresh. [`refresh`](DocumentationIndex::refresh) scans the tree and:
//!
//! | on disk | tracked | condition                           | action  |
//! |---------|---------|-------------------------------------|---------|
//! | yes     | no      |                                     | add     |
//! | yes     | yes     | mtime advanced, or path forced      | reparse |
//! | no      | yes     | no forced set, or path in forced set | evict   |
//!
//! A reparse replaces every section of the document. Whenever anything
//! changed, the section list, BM25 statistics and suggestion catalog are
//! rebuilt from scratch.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use docseek_core::bm25::Bm25Index;
use docseek_core::chunk::HEADER_SEPARATOR;
use docseek_core::evaluation::{OfflineQuery, Retriever};
use docseek_core::models::{DocumentSection, PipelineSelection, SearchResult};
use docseek_core::pipeline::{HybridSearchPipeline, SearchOptions, SearchPipelineConfig};
use docseek_core::sections::parse_markdown;
use docseek_core::tokenize::{word_tokens, Tokenizer};
use docseek_core::trace::PipelineTrace;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, DocsConfig};
use crate::connector_fs::{scan_docs, DiscoveredFile};
use crate::embedding::create_embedder;

const STEM_WEIGHT: f64 = 1.0;
const TAG_WEIGHT: f64 = 1.5;
const SECTION_LABEL_WEIGHT: f64 = 3.0;
const TITLE_TOKEN_WEIGHT: f64 = 1.5;
const MIN_SUGGESTION_TOKEN_LEN: usize = 3;

/// A parsed corpus file.
#[derive(Debug, Clone)]
pub struct IndexedDocument {
    /// Path relative to the corpus root.
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
    pub sections: Vec<Arc<DocumentSection>>,
}

/// What one [`DocumentationIndex::refresh`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl RefreshSummary {
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

pub struct DocumentationIndex {
    docs: DocsConfig,
    tokenizer: Tokenizer,
    pipeline: HybridSearchPipeline,
    documents: BTreeMap<PathBuf, IndexedDocument>,
    sections: Vec<Arc<DocumentSection>>,
    bm25: Bm25Index,
    suggestions: Vec<(String, String)>,
}

impl DocumentationIndex {
    /// Build an index from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Fails if the embedder cannot be built or the corpus root is missing.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(
            &config.embedding,
            &config.retrieval.embedding_strategy,
        )?;
        let pipeline = HybridSearchPipeline::new(embedder, config.retrieval.clone());
        Self::open(config.docs.clone(), config.tokenizer.build(), pipeline)
    }

    /// Open the corpus at `docs.root` and index it.
    ///
    /// # Errors
    ///
    /// Fails if the root directory does not exist or cannot be scanned.
    pub fn open(docs: DocsConfig, tokenizer: Tokenizer, pipeline: HybridSearchPipeline) -> Result<Self> {
        if !docs.root.is_dir() {
            bail!("Documentation root does not exist: {}", docs.root.display());
        }
        let mut index = Self {
            docs,
            tokenizer,
            pipeline,
            documents: BTreeMap::new(),
            sections: Vec::new(),
            bm25: Bm25Index::build(&[]),
            suggestions: Vec::new(),
        };
        index.refresh(None)?;
        Ok(index)
    }

    pub fn root(&self) -> &Path {
        &self.docs.root
    }

    /// Rescan the corpus.
    ///
    /// `paths` forces a reparse of the listed files (relative to the root
    /// or absolute) and limits eviction to them. `None` evicts every
    /// tracked file that disappeared.
    pub fn refresh(&mut self, paths: Option<&[PathBuf]>) -> Result<RefreshSummary> {
        let forced: Option<HashSet<PathBuf>> =
            paths.map(|p| p.iter().map(|path| self.relative_key(path)).collect());
        let discovered = scan_docs(&self.docs)?;
        let on_disk: HashSet<&Path> = discovered.iter().map(|f| f.relative.as_path()).collect();

        let mut summary = RefreshSummary::default();
        for file in &discovered {
            let forced_here = forced.as_ref().is_some_and(|f| f.contains(&file.relative));
            match self.documents.get(&file.relative) {
                None => summary.added += 1,
                Some(record) if forced_here || record.modified < file.modified => {
                    summary.updated += 1
                }
                Some(_) => continue,
            }
            let document = self.parse_document(file);
            self.documents.insert(file.relative.clone(), document);
        }

        let stale: Vec<PathBuf> = self
            .documents
            .keys()
            .filter(|path| !on_disk.contains(path.as_path()))
            .filter(|path| forced.as_ref().map_or(true, |f| f.contains(*path)))
            .cloned()
            .collect();
        for path in &stale {
            tracing::debug!(path = %path.display(), "evicting document");
            self.documents.remove(path);
        }
        summary.removed = stale.len();

        if summary.changed() {
            self.rebuild();
            tracing::info!(
                added = summary.added,
                updated = summary.updated,
                removed = summary.removed,
                sections = self.sections.len(),
                "documentation index refreshed"
            );
        }
        Ok(summary)
    }

    fn relative_key(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            return path.to_path_buf();
        }
        if let Ok(relative) = path.strip_prefix(&self.docs.root) {
            return relative.to_path_buf();
        }
        match (path.canonicalize(), self.docs.root.canonicalize()) {
            (Ok(path), Ok(root)) => path
                .strip_prefix(&root)
                .map(Path::to_path_buf)
                .unwrap_or(path),
            _ => path.to_path_buf(),
        }
    }

    fn parse_document(&self, file: &DiscoveredFile) -> IndexedDocument {
        let text = match std::fs::read_to_string(&file.absolute) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %file.absolute.display(), "unreadable document indexed as empty: {e}");
                String::new()
            }
        };
        let sections = parse_markdown(&file.relative, &text, &self.tokenizer)
            .into_iter()
            .map(Arc::new)
            .collect();
        IndexedDocument {
            path: file.relative.clone(),
            modified: file.modified,
            sections,
        }
    }

    fn rebuild(&mut self) {
        self.sections = self
            .documents
            .values()
            .flat_map(|doc| doc.sections.iter().cloned())
            .collect();
        self.bm25 = Bm25Index::build(&self.sections);
        self.suggestions = build_suggestions(self.documents.values());
    }

    /// Run the hybrid pipeline with the stored configuration.
    pub fn search(&mut self, query: &str, options: &SearchOptions) -> Vec<PipelineSelection> {
        let config = self.pipeline.config().clone();
        self.search_with_config(query, options, &config)
    }

    /// Run the hybrid pipeline with an explicit configuration.
    pub fn search_with_config(
        &mut self,
        query: &str,
        options: &SearchOptions,
        config: &SearchPipelineConfig,
    ) -> Vec<PipelineSelection> {
        let candidates = self.lexical_search(query, config.lexical_top_k);
        self.pipeline
            .search_with_config(query, &candidates, options, config)
    }

    /// BM25 ranking only.
    pub fn lexical_search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        let tokens = self.tokenizer.tokenize(query);
        self.bm25.search(&tokens, limit)
    }

    /// Autocomplete labels for `prefix`, best first.
    ///
    /// A catalog entry matches when its key, or any whitespace-separated
    /// part of it, starts with the lowercased prefix.
    pub fn suggest(&self, prefix: &str, limit: usize) -> Vec<String> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut out: Vec<String> = Vec::new();
        for (key, label) in &self.suggestions {
            let matches =
                key.starts_with(&prefix) || key.split_whitespace().any(|p| p.starts_with(&prefix));
            if matches && !out.contains(label) {
                out.push(label.clone());
                if out.len() >= limit {
                    break;
                }
            }
        }
        out
    }

    /// Tracked document paths, relative to the root, in path order.
    pub fn list_documents(&self) -> Vec<PathBuf> {
        self.documents.keys().cloned().collect()
    }

    pub fn document(&self, path: &Path) -> Option<&IndexedDocument> {
        self.documents.get(path)
    }

    /// Every section, in document path order.
    pub fn sections(&self) -> &[Arc<DocumentSection>] {
        &self.sections
    }

    pub fn last_trace(&self) -> Option<&PipelineTrace> {
        self.pipeline.last_trace()
    }

    pub fn pipeline_config(&self) -> &SearchPipelineConfig {
        self.pipeline.config()
    }

    pub fn pipeline_config_mut(&mut self) -> &mut SearchPipelineConfig {
        self.pipeline.config_mut()
    }
}

impl Retriever for DocumentationIndex {
    fn retrieve(
        &mut self,
        query: &OfflineQuery,
        limit: usize,
        config: &SearchPipelineConfig,
    ) -> Vec<String> {
        let options = SearchOptions {
            limit,
            role: query.role.clone(),
            alpha: query.alpha,
        };
        self.search_with_config(&query.query, &options, config)
            .iter()
            .map(|s| s.section.identifier())
            .collect()
    }
}

/// Score catalog entries and order them by score, then key.
fn build_suggestions<'a>(
    documents: impl Iterator<Item = &'a IndexedDocument>,
) -> Vec<(String, String)> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut labels: HashMap<String, String> = HashMap::new();
    let mut add = |key: String, label: String, weight: f64| {
        labels.entry(key.clone()).or_insert(label);
        *scores.entry(key).or_insert(0.0) += weight;
    };

    for document in documents {
        let stem = document
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let base_label = stem.replace('_', " ");
        add(base_label.to_lowercase(), base_label, STEM_WEIGHT);

        if let Some(first) = document.sections.first() {
            for field in ["tags", "keywords"] {
                let Some(raw) = first.metadata.get(field) else {
                    continue;
                };
                for tag in word_tokens(raw) {
                    if tag.chars().count() >= MIN_SUGGESTION_TOKEN_LEN {
                        add(tag.clone(), tag, TAG_WEIGHT);
                    }
                }
            }
        }

        for section in document.sections.iter().filter(|s| !s.title.is_empty()) {
            let label = format!("{stem}{HEADER_SEPARATOR}{}", section.title);
            add(label.to_lowercase(), label, SECTION_LABEL_WEIGHT);
            for token in word_tokens(&section.title) {
                if token.chars().count() >= MIN_SUGGESTION_TOKEN_LEN {
                    add(token.clone(), token, TITLE_TOKEN_WEIGHT);
                }
            }
        }
    }

    let mut ordered: Vec<(String, f64)> = scores.into_iter().collect();
    ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ordered
        .into_iter()
        .filter_map(|(key, _)| labels.remove(&key).map(|label| (key, label)))
        .collect()
}
