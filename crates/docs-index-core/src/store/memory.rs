//! In-memory [`VectorStore`] implementation for tests and embedding.
//!
//! Entries live in a `HashMap` keyed by `(document_uri, chunk_index)`
//! behind a `std::sync::RwLock`. Queries are brute-force cosine similarity
//! over all stored vectors.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::models::IndexEntry;

use super::{rank_top_k, QueryFilter, ScoredEntry, VectorStore};

type Key = (String, i64);

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<Key, IndexEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<Key, IndexEntry>>, StoreError> {
        self.entries
            .read()
            .map_err(|_| StoreError::new("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<Key, IndexEntry>>, StoreError> {
        self.entries
            .write()
            .map_err(|_| StoreError::new("in-memory store lock poisoned"))
    }

    /// Snapshot of every entry, ordered by `(document_uri, chunk_index)`.
    pub fn all_entries(&self) -> Result<Vec<IndexEntry>, StoreError> {
        let mut all: Vec<IndexEntry> = self.read()?.values().cloned().collect();
        all.sort_by(|a, b| {
            a.document_uri
                .cmp(&b.document_uri)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        Ok(all)
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn entries_for_document(
        &self,
        document_uri: &str,
    ) -> Result<Vec<IndexEntry>, StoreError> {
        let mut found: Vec<IndexEntry> = self
            .read()?
            .values()
            .filter(|e| e.document_uri == document_uri)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.chunk_index);
        Ok(found)
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<(), StoreError> {
        let mut map = self.write()?;
        for e in entries {
            map.insert((e.document_uri.clone(), e.chunk_index), e.clone());
        }
        Ok(())
    }

    async fn prune_document(
        &self,
        document_uri: &str,
        from_index: i64,
    ) -> Result<u64, StoreError> {
        let mut map = self.write()?;
        let before = map.len();
        map.retain(|(uri, idx), _| !(uri == document_uri && *idx >= from_index));
        Ok((before - map.len()) as u64)
    }

    async fn mark_document(&self, document_uri: &str, marker: &str) -> Result<u64, StoreError> {
        let mut map = self.write()?;
        let mut touched = 0;
        for e in map.values_mut().filter(|e| e.document_uri == document_uri) {
            e.document_marker = marker.to_string();
            touched += 1;
        }
        Ok(touched)
    }

    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<ScoredEntry>, StoreError> {
        let scored: Vec<ScoredEntry> = self
            .read()?
            .values()
            .filter(|e| filter.matches(e))
            .map(|e| ScoredEntry {
                score: cosine_similarity(vector, &e.vector),
                entry: e.clone(),
            })
            .collect();
        Ok(rank_top_k(scored, limit))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.len() as u64)
    }
}
