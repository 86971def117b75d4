//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the narrow interface the indexer writes
//! through and the retriever reads through, enabling pluggable backends
//! (SQLite in the app crate, [`memory::InMemoryStore`] for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;
use crate::models::IndexEntry;

/// Metadata filters applied to nearest-neighbour queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    /// Only entries from this configured source.
    pub source: Option<String>,
    /// Only entries written at or after this unix timestamp.
    pub since: Option<i64>,
    /// Only entries embedded with this model.
    pub model: Option<String>,
}

impl QueryFilter {
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        if let Some(src) = &self.source {
            if &entry.source != src {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.updated_at < since {
                return false;
            }
        }
        if let Some(model) = &self.model {
            if &entry.model != model {
                return false;
            }
        }
        true
    }
}

/// An entry paired with its similarity to a query vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEntry {
    #[serde(flatten)]
    pub entry: IndexEntry,
    pub score: f32,
}

/// Abstract vector store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`entries_for_document`](VectorStore::entries_for_document) | Current entries of one document (for hash comparison) |
/// | [`upsert`](VectorStore::upsert) | Insert or replace entries keyed by `(document_uri, chunk_index)` |
/// | [`prune_document`](VectorStore::prune_document) | Drop entries past a document's last chunk |
/// | [`mark_document`](VectorStore::mark_document) | Stamp every entry of a document with its listing marker |
/// | [`query`](VectorStore::query) | Nearest neighbours by cosine similarity |
/// | [`count`](VectorStore::count) | Total number of entries |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// All entries for a document, ordered by chunk index.
    async fn entries_for_document(&self, document_uri: &str)
        -> Result<Vec<IndexEntry>, StoreError>;

    /// Insert or replace each entry by `(document_uri, chunk_index)`.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<(), StoreError>;

    /// Delete entries of `document_uri` with `chunk_index >= from_index`.
    /// Returns the number of entries deleted.
    async fn prune_document(&self, document_uri: &str, from_index: i64)
        -> Result<u64, StoreError>;

    /// Set `document_marker` on every entry of `document_uri`.
    /// Returns the number of entries touched.
    async fn mark_document(&self, document_uri: &str, marker: &str)
        -> Result<u64, StoreError>;

    /// Top `limit` entries matching `filter`, ranked by [`rank_top_k`].
    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<ScoredEntry>, StoreError>;

    /// Total number of entries in the store.
    async fn count(&self) -> Result<u64, StoreError>;
}

/// Sort by score (desc), then entry id (asc), and keep the first `k`.
///
/// The id tie-break keeps rankings stable across runs for a fixed index.
pub fn rank_top_k(mut scored: Vec<ScoredEntry>, k: usize) -> Vec<ScoredEntry> {
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    scored.truncate(k);
    scored
}
