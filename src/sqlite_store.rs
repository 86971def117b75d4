//! SQLite-backed [`VectorStore`].
//!
//! Entries live in `index_entries` with the embedding stored as a
//! little-endian f32 BLOB. Queries filter in SQL and rank by brute-force
//! cosine similarity in process, which is plenty for documentation-sized
//! corpora.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docs_index_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docs_index_core::models::IndexEntry;
use docs_index_core::store::{rank_top_k, QueryFilter, ScoredEntry, VectorStore};
use docs_index_core::StoreError;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const COLUMNS: &str = "id, document_uri, source, chunk_index, text, content_hash, model, \
                       embedding, document_marker, updated_at";

fn row_to_entry(row: &SqliteRow) -> IndexEntry {
    let blob: Vec<u8> = row.get("embedding");
    IndexEntry {
        id: row.get("id"),
        document_uri: row.get("document_uri"),
        source: row.get("source"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        content_hash: row.get("content_hash"),
        model: row.get("model"),
        vector: blob_to_vec(&blob),
        document_marker: row.get("document_marker"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn entries_for_document(&self, document_uri: &str) -> Result<Vec<IndexEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM index_entries WHERE document_uri = ? ORDER BY chunk_index ASC",
            COLUMNS
        ))
        .bind(document_uri)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::new)?;

        Ok(rows.iter().map(row_to_entry).collect())
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::new)?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO index_entries (id, document_uri, source, chunk_index, text,
                                           content_hash, model, dims, embedding,
                                           document_marker, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(document_uri, chunk_index) DO UPDATE SET
                    id = excluded.id,
                    source = excluded.source,
                    text = excluded.text,
                    content_hash = excluded.content_hash,
                    model = excluded.model,
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    document_marker = excluded.document_marker,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.document_uri)
            .bind(&entry.source)
            .bind(entry.chunk_index)
            .bind(&entry.text)
            .bind(&entry.content_hash)
            .bind(&entry.model)
            .bind(entry.vector.len() as i64)
            .bind(vec_to_blob(&entry.vector))
            .bind(&entry.document_marker)
            .bind(entry.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::new)?;
        }

        tx.commit().await.map_err(StoreError::new)?;
        Ok(())
    }

    async fn prune_document(&self, document_uri: &str, from_index: i64) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM index_entries WHERE document_uri = ? AND chunk_index >= ?")
                .bind(document_uri)
                .bind(from_index)
                .execute(&self.pool)
                .await
                .map_err(StoreError::new)?;
        Ok(result.rows_affected())
    }

    async fn mark_document(&self, document_uri: &str, marker: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE index_entries SET document_marker = ? WHERE document_uri = ?")
            .bind(marker)
            .bind(document_uri)
            .execute(&self.pool)
            .await
            .map_err(StoreError::new)?;
        Ok(result.rows_affected())
    }

    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<ScoredEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM index_entries \
             WHERE (?1 IS NULL OR source = ?1) AND (?2 IS NULL OR updated_at >= ?2) \
               AND (?3 IS NULL OR model = ?3)",
            COLUMNS
        ))
        .bind(filter.source.as_deref())
        .bind(filter.since)
        .bind(filter.model.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::new)?;

        let scored: Vec<ScoredEntry> = rows
            .iter()
            .map(|row| {
                let entry = row_to_entry(row);
                ScoredEntry {
                    score: cosine_similarity(vector, &entry.vector),
                    entry,
                }
            })
            .collect();

        Ok(rank_top_k(scored, limit))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::new)?;
        Ok(n as u64)
    }
}
