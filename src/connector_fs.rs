//! Documentation tree scanner.
//!
//! Walks `docs.root`, applies include/exclude globs and reports every
//! matching file with its modification time. Reading and parsing is left to
//! [`crate::index`].
//!
//! `.git`, `target` and `node_modules` directories are always excluded.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::config::DocsConfig;

/// A corpus file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub absolute: PathBuf,
    /// Path relative to the corpus root; used as the document key.
    pub relative: PathBuf,
    pub modified: DateTime<Utc>,
}

/// List corpus files under `config.root`, sorted by relative path.
///
/// # Errors
///
/// Fails if the root does not exist, a glob pattern is invalid, or the
/// directory walk hits an I/O error.
pub fn scan_docs(config: &DocsConfig) -> Result<Vec<DiscoveredFile>> {
    let root = &config.root;
    if !root.is_dir() {
        bail!("Documentation root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);

        if exclude_set.is_match(relative) {
            continue;
        }
        if !include_set.is_match(relative) {
            continue;
        }

        files.push(DiscoveredFile {
            absolute: path.to_path_buf(),
            relative: relative.to_path_buf(),
            modified: modified_time(path),
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));

    Ok(files)
}

/// Modification time of `path`, or the Unix epoch when unavailable.
pub fn modified_time(path: &Path) -> DateTime<Utc> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH);
    DateTime::<Utc>::from(modified)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {pattern}"))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn corpus() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("lore")).unwrap();
        fs::create_dir_all(root.join("drafts")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("atlas.md"), "# Atlas\n").unwrap();
        fs::write(root.join("lore/factions.md"), "# Factions\n").unwrap();
        fs::write(root.join("drafts/wip.md"), "# Draft\n").unwrap();
        fs::write(root.join("notes.txt"), "plain text").unwrap();
        fs::write(root.join("node_modules/pkg/readme.md"), "# Pkg\n").unwrap();
        tmp
    }

    fn relative(files: &[DiscoveredFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative.to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_scan_includes_markdown_sorted() {
        let tmp = corpus();
        let files = scan_docs(&DocsConfig::new(tmp.path())).unwrap();
        assert_eq!(
            relative(&files),
            vec!["atlas.md", "drafts/wip.md", "lore/factions.md"]
        );
        assert!(files.iter().all(|f| f.absolute.starts_with(tmp.path())));
    }

    #[test]
    fn test_scan_applies_excludes() {
        let tmp = corpus();
        let mut config = DocsConfig::new(tmp.path());
        config.exclude_globs = vec!["drafts/**".to_string()];
        let files = scan_docs(&config).unwrap();
        assert_eq!(relative(&files), vec!["atlas.md", "lore/factions.md"]);
    }

    #[test]
    fn test_scan_custom_includes() {
        let tmp = corpus();
        let mut config = DocsConfig::new(tmp.path());
        config.include_globs = vec!["*.txt".to_string()];
        let files = scan_docs(&config).unwrap();
        assert_eq!(relative(&files), vec!["notes.txt"]);
    }

    #[test]
    fn test_scan_missing_root_fails() {
        let tmp = TempDir::new().unwrap();
        let config = DocsConfig::new(tmp.path().join("missing"));
        assert!(scan_docs(&config).is_err());
    }

    #[test]
    fn test_invalid_glob_fails() {
        let tmp = corpus();
        let mut config = DocsConfig::new(tmp.path());
        config.include_globs = vec!["[".to_string()];
        assert!(scan_docs(&config).is_err());
    }

    #[test]
    fn test_modified_time_of_missing_file_is_epoch() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(modified_time(&tmp.path().join("nope")).timestamp(), 0);
    }
}
