//! Idempotent chunk indexer.
//!
//! For each chunk of a document the indexer compares the SHA-256 content
//! hash against the stored entry at the same `(document_uri, chunk_index)`:
//!
//! | Stored entry | Action |
//! |--------------|--------|
//! | same hash, same model | skip |
//! | different hash or model | re-embed, replace |
//! | absent | embed, insert |
//!
//! Vectors of the document's existing entries are reused when a changed
//! chunk's hash matches one of them (text that moved to another index),
//! so only genuinely new text reaches the embedding service. Entries past
//! the document's last chunk are pruned.
//!
//! Each embedding batch is written before the next one is requested, so a
//! run that dies mid-document keeps what it committed and a re-run skips
//! it by hash. Written entries carry an empty document marker until the
//! last batch and the prune succeed; only then is the whole document
//! stamped with its listing marker, so [`Indexer::is_current`] never
//! vouches for a partially indexed document.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::embedding::Embedder;
use crate::error::{EmbeddingError, Result};
use crate::models::{Chunk, Document, IndexEntry};
use crate::store::VectorStore;

/// Marker of entries written by an upsert that has not completed.
const UNSTAMPED: &str = "";

/// Per-document upsert counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Written entries whose vector was reused instead of embedded.
    pub reused: u64,
    pub pruned: u64,
}

impl UpsertOutcome {
    /// Entries written (inserted or updated).
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }

    pub fn merge(&mut self, other: &UpsertOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.reused += other.reused;
        self.pruned += other.pruned;
    }
}

/// Writes chunks into a [`VectorStore`], embedding only what changed.
pub struct Indexer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl Indexer {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Upsert all chunks of `doc`.
    ///
    /// # Errors
    ///
    /// - [`crate::IndexError::Embedding`] if the embedding service fails;
    ///   entries from earlier batches stay committed.
    /// - [`crate::IndexError::Store`] if the store cannot be read or written.
    pub async fn upsert(&self, doc: &Document, chunks: &[Chunk]) -> Result<UpsertOutcome> {
        let model = self.embedder.model_name().to_string();
        let existing = self.store.entries_for_document(&doc.uri).await?;

        let by_index: HashMap<i64, &IndexEntry> =
            existing.iter().map(|e| (e.chunk_index, e)).collect();
        let by_hash: HashMap<&str, &[f32]> = existing
            .iter()
            .filter(|e| e.model == model)
            .map(|e| (e.content_hash.as_str(), e.vector.as_slice()))
            .collect();

        let mut outcome = UpsertOutcome::default();
        let mut reusable: Vec<IndexEntry> = Vec::new();
        let mut reusable_updates = 0u64;
        let mut pending: Vec<(&Chunk, bool)> = Vec::new();
        // Unchanged text under a different marker still needs stamping.
        let mut stale_marker = false;

        for chunk in chunks {
            let current = by_index.get(&chunk.chunk_index);
            if let Some(e) = current {
                if e.content_hash == chunk.hash && e.model == model {
                    outcome.unchanged += 1;
                    stale_marker |= e.document_marker != doc.marker;
                    continue;
                }
            }
            let is_update = current.is_some();
            match by_hash.get(chunk.hash.as_str()) {
                Some(vector) => {
                    reusable.push(self.entry_for(doc, chunk, vector.to_vec(), &model));
                    if is_update {
                        reusable_updates += 1;
                    }
                }
                None => pending.push((chunk, is_update)),
            }
        }

        if !reusable.is_empty() {
            self.store.upsert(&reusable).await?;
            let n = reusable.len() as u64;
            outcome.reused += n;
            outcome.updated += reusable_updates;
            outcome.inserted += n - reusable_updates;
        }

        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(c, _)| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            self.check_vectors(batch.len(), &vectors)?;

            let entries: Vec<IndexEntry> = batch
                .iter()
                .zip(vectors)
                .map(|((chunk, _), vector)| self.entry_for(doc, chunk, vector, &model))
                .collect();
            self.store.upsert(&entries).await?;

            for (_, is_update) in batch {
                if *is_update {
                    outcome.updated += 1;
                } else {
                    outcome.inserted += 1;
                }
            }
        }

        outcome.pruned = self
            .store
            .prune_document(&doc.uri, chunks.len() as i64)
            .await?;

        if stale_marker || outcome.written() > 0 {
            self.store.mark_document(&doc.uri, &doc.marker).await?;
        }

        tracing::debug!(
            uri = %doc.uri,
            inserted = outcome.inserted,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            reused = outcome.reused,
            pruned = outcome.pruned,
            "indexed document"
        );

        Ok(outcome)
    }

    /// True if the last completed upsert of `document_uri` was from
    /// `marker` with the current model, so fetching it again is pointless.
    pub async fn is_current(&self, document_uri: &str, marker: &str) -> Result<bool> {
        if marker == UNSTAMPED {
            return Ok(false);
        }
        let model = self.embedder.model_name();
        let existing = self.store.entries_for_document(document_uri).await?;
        Ok(!existing.is_empty()
            && existing
                .iter()
                .all(|e| e.document_marker == marker && e.model == model))
    }

    fn check_vectors(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != expected {
            return Err(EmbeddingError::Persistent(format!(
                "expected {} vectors, got {}",
                expected,
                vectors.len()
            ))
            .into());
        }
        let dims = self.embedder.dims();
        if dims > 0 {
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                return Err(EmbeddingError::Persistent(format!(
                    "expected {}-dimensional vectors, got {}",
                    dims,
                    bad.len()
                ))
                .into());
            }
        }
        Ok(())
    }

    fn entry_for(&self, doc: &Document, chunk: &Chunk, vector: Vec<f32>, model: &str) -> IndexEntry {
        IndexEntry {
            id: chunk.id.clone(),
            document_uri: doc.uri.clone(),
            source: doc.source.clone(),
            chunk_index: chunk.chunk_index,
            text: chunk.text.clone(),
            content_hash: chunk.hash.clone(),
            model: model.to_string(),
            vector,
            document_marker: UNSTAMPED.to_string(),
            updated_at: doc.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_text, ChunkingParams};
    use crate::error::IndexError;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds text as `[len, vowels, 1.0]` and counts calls.
    struct CountingEmbedder {
        texts_embedded: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                texts_embedded: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let vowels = t.chars().filter(|c| "aeiou".contains(*c)).count();
                    vec![t.len() as f32, vowels as f32, 1.0]
                })
                .collect())
        }
    }

    /// Fails the `fail_on`-th embedding call with a transient error.
    struct FailOnCall {
        inner: CountingEmbedder,
        calls: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl Embedder for FailOnCall {
        fn model_name(&self) -> &str {
            self.inner.model_name()
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_on {
                return Err(EmbeddingError::Transient("429 Too Many Requests".to_string()));
            }
            self.inner.embed(texts).await
        }
    }

    struct WrongDims;

    #[async_trait]
    impl Embedder for WrongDims {
        fn model_name(&self) -> &str {
            "wrong"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    fn doc(text: &str) -> Document {
        Document {
            uri: "file:///docs/guide.md".to_string(),
            source: "docs".to_string(),
            title: Some("guide.md".to_string()),
            text: text.to_string(),
            marker: "v1".to_string(),
            updated_at: 1_700_000_000,
        }
    }

    fn paragraphs(n: usize) -> String {
        (0..n)
            .map(|i| format!("Section {} explains how validators stake tokens.", i))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn params() -> ChunkingParams {
        ChunkingParams {
            max_tokens: 15,
            overlap_tokens: 0,
        }
    }

    #[tokio::test]
    async fn test_first_upsert_inserts_everything() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(CountingEmbedder::new());
        let indexer = Indexer::new(store.clone(), embedder.clone(), 2);

        let d = doc(&paragraphs(5));
        let chunks = chunk_text(&d.uri, &d.text, &params());
        let outcome = indexer.upsert(&d, &chunks).await.unwrap();

        assert_eq!(outcome.inserted, chunks.len() as u64);
        assert_eq!(outcome.written(), chunks.len() as u64);
        assert_eq!(store.count().await.unwrap(), chunks.len() as u64);
        assert_eq!(embedder.texts_embedded.load(Ordering::SeqCst), chunks.len());
    }

    #[tokio::test]
    async fn test_second_upsert_is_noop() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(CountingEmbedder::new());
        let indexer = Indexer::new(store.clone(), embedder.clone(), 8);

        let d = doc(&paragraphs(5));
        let chunks = chunk_text(&d.uri, &d.text, &params());
        indexer.upsert(&d, &chunks).await.unwrap();
        let calls_after_first = embedder.texts_embedded.load(Ordering::SeqCst);

        let outcome = indexer.upsert(&d, &chunks).await.unwrap();
        assert_eq!(outcome.written(), 0);
        assert_eq!(outcome.unchanged, chunks.len() as u64);
        assert_eq!(store.count().await.unwrap(), chunks.len() as u64);
        assert_eq!(embedder.texts_embedded.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn test_changed_chunk_is_the_only_update() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(CountingEmbedder::new());
        let indexer = Indexer::new(store.clone(), embedder.clone(), 8);

        let d = doc(&paragraphs(5));
        let chunks = chunk_text(&d.uri, &d.text, &params());
        indexer.upsert(&d, &chunks).await.unwrap();

        // Same length, different content: offsets of later chunks don't move.
        let edited = doc(&d.text.replacen("Section 2 explains", "Section 2 outlines", 1));
        let new_chunks = chunk_text(&edited.uri, &edited.text, &params());
        assert_eq!(new_chunks.len(), chunks.len());

        let outcome = indexer.upsert(&edited, &new_chunks).await.unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.unchanged, chunks.len() as u64 - 1);
        assert_eq!(store.count().await.unwrap(), chunks.len() as u64);
    }

    #[tokio::test]
    async fn test_shrunk_document_prunes_tail() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(CountingEmbedder::new());
        let indexer = Indexer::new(store.clone(), embedder, 8);

        let d = doc(&paragraphs(6));
        let chunks = chunk_text(&d.uri, &d.text, &params());
        indexer.upsert(&d, &chunks).await.unwrap();

        let short = doc(&paragraphs(2));
        let short_chunks = chunk_text(&short.uri, &short.text, &params());
        let outcome = indexer.upsert(&short, &short_chunks).await.unwrap();

        assert_eq!(outcome.pruned, (chunks.len() - short_chunks.len()) as u64);
        assert_eq!(store.count().await.unwrap(), short_chunks.len() as u64);
    }

    #[tokio::test]
    async fn test_shifted_text_reuses_vectors() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(CountingEmbedder::new());
        let indexer = Indexer::new(store.clone(), embedder.clone(), 8);

        let d = doc(&paragraphs(4));
        let chunks = chunk_text(&d.uri, &d.text, &params());
        indexer.upsert(&d, &chunks).await.unwrap();
        let before = embedder.texts_embedded.load(Ordering::SeqCst);

        // Drop the first paragraph: every remaining chunk moves down one index.
        let tail = d.text.splitn(2, "\n\n").nth(1).unwrap().to_string();
        let shifted = doc(&tail);
        let shifted_chunks = chunk_text(&shifted.uri, &shifted.text, &params());
        let outcome = indexer.upsert(&shifted, &shifted_chunks).await.unwrap();

        assert_eq!(outcome.reused, shifted_chunks.len() as u64);
        assert_eq!(embedder.texts_embedded.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_is_current_tracks_marker() {
        let store = Arc::new(InMemoryStore::new());
        let indexer = Indexer::new(store, Arc::new(CountingEmbedder::new()), 8);

        let d = doc(&paragraphs(3));
        assert!(!indexer.is_current(&d.uri, "v1").await.unwrap());

        let chunks = chunk_text(&d.uri, &d.text, &params());
        indexer.upsert(&d, &chunks).await.unwrap();
        assert!(indexer.is_current(&d.uri, "v1").await.unwrap());
        assert!(!indexer.is_current(&d.uri, "v2").await.unwrap());

        // New marker, same text: nothing written, marker refreshed.
        let mut touched = d.clone();
        touched.marker = "v2".to_string();
        let outcome = indexer.upsert(&touched, &chunks).await.unwrap();
        assert_eq!(outcome.written(), 0);
        assert!(indexer.is_current(&d.uri, "v2").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_document_not_current() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(FailOnCall {
            inner: CountingEmbedder::new(),
            calls: AtomicUsize::new(0),
            fail_on: 2,
        });
        let indexer = Indexer::new(store.clone(), embedder, 2);

        let d = doc(&paragraphs(5));
        let chunks = chunk_text(&d.uri, &d.text, &params());
        assert!(chunks.len() > 2);

        let err = indexer.upsert(&d, &chunks).await.unwrap_err();
        assert!(matches!(err, IndexError::Embedding(EmbeddingError::Transient(_))));
        assert_eq!(store.count().await.unwrap(), 2);
        assert!(!indexer.is_current(&d.uri, "v1").await.unwrap());

        let outcome = indexer.upsert(&d, &chunks).await.unwrap();
        assert_eq!(outcome.unchanged, 2);
        assert_eq!(outcome.inserted, chunks.len() as u64 - 2);
        assert!(indexer.is_current(&d.uri, "v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_appended_chunk_failure_keeps_old_marker() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(FailOnCall {
            inner: CountingEmbedder::new(),
            calls: AtomicUsize::new(0),
            fail_on: 2,
        });
        let indexer = Indexer::new(store.clone(), embedder, 8);

        let d = doc(&paragraphs(3));
        let chunks = chunk_text(&d.uri, &d.text, &params());
        indexer.upsert(&d, &chunks).await.unwrap();

        let mut grown = doc(&paragraphs(4));
        grown.marker = "v2".to_string();
        let grown_chunks = chunk_text(&grown.uri, &grown.text, &params());
        assert!(indexer.upsert(&grown, &grown_chunks).await.is_err());

        assert!(!indexer.is_current(&d.uri, "v2").await.unwrap());
        let stored = store.entries_for_document(&d.uri).await.unwrap();
        assert!(stored.iter().all(|e| e.document_marker == "v1"));
    }

    #[tokio::test]
    async fn test_wrong_dimensions_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let indexer = Indexer::new(store.clone(), Arc::new(WrongDims), 8);

        let d = doc("short text");
        let chunks = chunk_text(&d.uri, &d.text, &params());
        let err = indexer.upsert(&d, &chunks).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::Embedding(EmbeddingError::Persistent(_))
        ));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
