//! Top-k retrieval over a [`VectorStore`].
//!
//! The retriever validates the query, embeds it, asks the store for the
//! nearest entries, and returns them ranked by descending cosine
//! similarity with ties broken by entry id. A query against an empty
//! index returns nothing without touching the embedding service. Only
//! entries embedded with the retriever's own model are candidates.
//!
//! Retrieval is read-only and may run while an ingestion pass is writing;
//! it then sees whatever the store has committed so far.

use std::collections::HashMap;
use std::sync::Arc;

use crate::embedding::{embed_one, Embedder};
use crate::error::{IndexError, Result};
use crate::store::{rank_top_k, QueryFilter, ScoredEntry, VectorStore};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// Candidates fetched from the store before per-document capping.
    pub candidate_k: usize,
    /// Maximum chunks from one document in a result set (0 = unlimited).
    pub max_chunks_per_doc: usize,
    /// Longest accepted query, in chars.
    pub max_query_chars: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            candidate_k: 40,
            max_chunks_per_doc: 0,
            max_query_chars: 2000,
        }
    }
}

/// Answers `retrieve(query, k, filter)` for chat/response agents.
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            store,
            embedder,
            params,
        }
    }

    /// Return at most `k` entries, sorted by non-increasing score.
    ///
    /// # Errors
    ///
    /// - [`IndexError::InvalidQuery`] for empty, whitespace-only, or
    ///   oversized queries.
    /// - [`IndexError::Embedding`] if the query cannot be embedded.
    /// - [`IndexError::Store`] if the store cannot be read.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<ScoredEntry>> {
        validate_query(query, self.params.max_query_chars)?;

        if k == 0 || self.store.count().await? == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embed_one(self.embedder.as_ref(), query.trim()).await?;

        let fetch = if self.params.max_chunks_per_doc > 0 {
            k.max(self.params.candidate_k)
        } else {
            k
        };
        let filter = QueryFilter {
            model: Some(self.embedder.model_name().to_string()),
            ..filter.clone()
        };
        let candidates = self.store.query(&query_vec, fetch, &filter).await?;
        let ranked = rank_top_k(candidates, usize::MAX);

        let results = cap_per_document(ranked, self.params.max_chunks_per_doc, k);
        tracing::debug!(query_chars = query.len(), k, returned = results.len(), "retrieved");
        Ok(results)
    }
}

/// Reject queries that cannot be meaningfully embedded.
pub fn validate_query(query: &str, max_chars: usize) -> Result<()> {
    if query.trim().is_empty() {
        return Err(IndexError::InvalidQuery(
            "query must not be empty".to_string(),
        ));
    }
    let chars = query.chars().count();
    if max_chars > 0 && chars > max_chars {
        return Err(IndexError::InvalidQuery(format!(
            "query is {} chars, limit is {}",
            chars, max_chars
        )));
    }
    Ok(())
}

/// Keep ranking order, allow at most `per_doc` entries per document
/// (0 = unlimited), stop at `k`.
fn cap_per_document(ranked: Vec<ScoredEntry>, per_doc: usize, k: usize) -> Vec<ScoredEntry> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(k.min(ranked.len()));
    for scored in ranked {
        if out.len() == k {
            break;
        }
        if per_doc > 0 {
            let n = seen.entry(scored.entry.document_uri.clone()).or_insert(0);
            if *n >= per_doc {
                continue;
            }
            *n += 1;
        }
        out.push(scored);
    }
    out
}

/// Format a Unix timestamp as ISO 8601.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
