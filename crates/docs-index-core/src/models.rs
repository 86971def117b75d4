//! Core data models that flow through the ingestion and retrieval pipeline.
//!
//! A [`DocumentRef`] is what a source lists; fetching it yields a
//! [`Document`]. The chunker turns a document into [`Chunk`]s, and the
//! indexer persists each chunk as one [`IndexEntry`] in a vector store.

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A document a source knows about but has not fetched yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    /// Stable source URI (repository path + file path).
    pub uri: String,
    /// Name of the configured source that listed this document.
    pub source: String,
    /// Source-specific locator (filesystem path, download URL, ...).
    pub locator: String,
    /// Last-modified marker if the listing already knows it (blob SHA).
    pub marker: Option<String>,
}

/// A fetched document.
#[derive(Debug, Clone)]
pub struct Document {
    pub uri: String,
    pub source: String,
    pub title: Option<String>,
    pub text: String,
    /// Commit/blob hash or mtime, whatever the source can offer.
    pub marker: String,
    /// Unix seconds.
    pub updated_at: i64,
}

/// A bounded slice of a document's text; the unit of embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Deterministic UUIDv5 over `"{document_uri}#{chunk_index}"`.
    pub id: String,
    pub document_uri: String,
    pub chunk_index: i64,
    /// Byte offset of `text` inside the document.
    pub start: usize,
    pub text: String,
    /// SHA-256 of `text`, lowercase hex.
    pub hash: String,
}

impl Chunk {
    /// Byte offset one past the end of this chunk in the document.
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

/// The persisted unit in a vector store, one per [`Chunk`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexEntry {
    pub id: String,
    pub document_uri: String,
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    pub content_hash: String,
    pub model: String,
    #[serde(skip)]
    pub vector: Vec<f32>,
    pub document_marker: String,
    /// Unix seconds of the last time this entry was (re)written.
    pub updated_at: i64,
}

/// Derive the stable chunk identity for `(document_uri, chunk_index)`.
pub fn chunk_id(document_uri: &str, chunk_index: i64) -> String {
    let name = format!("{}#{}", document_uri, chunk_index);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// SHA-256 of `text` as lowercase hex. Used as the dedup hash.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
