//! Filesystem document source.
//!
//! Walks `root` with include/exclude globs (`.git`, `target` and
//! `node_modules` are always excluded). Documents are keyed by their
//! canonical `file://` URI; the listing marker is `mtime:size`, so an
//! untouched file is never re-read. Entries that cannot be read (permission
//! denied, dangling symlinks) are logged and skipped.

use anyhow::{bail, Context};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use docs_index_core::models::{Document, DocumentRef};
use docs_index_core::pipeline::DocumentSource;
use docs_index_core::{IndexError, Result};

use crate::config::FilesystemSourceConfig;

pub struct FilesystemSource {
    config: FilesystemSourceConfig,
    include: GlobSet,
    exclude: GlobSet,
}

impl FilesystemSource {
    pub fn new(config: FilesystemSourceConfig) -> anyhow::Result<Self> {
        let include = build_globset(&config.include_globs)?;

        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        excludes.extend(config.exclude_globs.clone());
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            config,
            include,
            exclude,
        })
    }

    /// Check the root exists, for `docidx sources`.
    pub fn check(&self) -> anyhow::Result<()> {
        if !self.config.root.is_dir() {
            bail!("root does not exist: {}", self.config.root.display());
        }
        Ok(())
    }

    fn scan(&self) -> anyhow::Result<Vec<DocumentRef>> {
        let root = self
            .config
            .root
            .canonicalize()
            .with_context(|| format!("Filesystem root does not exist: {}", self.config.root.display()))?;

        let mut refs = Vec::new();
        let walker = WalkDir::new(&root).follow_links(self.config.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(source = %self.config.name, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            refs.push(DocumentRef {
                uri: format!("file://{}", path.display()),
                source: self.config.name.clone(),
                locator: path.to_string_lossy().to_string(),
                marker: Some(format!("mtime:{}:{}", mtime_secs(&metadata), metadata.len())),
            });
        }

        refs.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(refs)
    }
}

fn mtime_secs(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[async_trait]
impl DocumentSource for FilesystemSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn list(&self) -> Result<Vec<DocumentRef>> {
        self.scan()
            .map_err(|e| IndexError::fetch(self.config.root.display().to_string(), format!("{:#}", e)))
    }

    async fn fetch(&self, doc: &DocumentRef) -> Result<Document> {
        let path = PathBuf::from(&doc.locator);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| IndexError::fetch(&doc.uri, e))?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| IndexError::fetch(&doc.uri, e))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| IndexError::malformed(&doc.uri, "not valid UTF-8"))?;

        Ok(Document {
            uri: doc.uri.clone(),
            source: self.config.name.clone(),
            title: file_name(&path),
            text,
            marker: format!("mtime:{}:{}", mtime_secs(&metadata), metadata.len()),
            updated_at: mtime_secs(&metadata),
        })
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}
