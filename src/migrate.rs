//! Schema migrations. Every statement is idempotent.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per chunk; the unit the indexer dedups on.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            id TEXT PRIMARY KEY,
            document_uri TEXT NOT NULL,
            source TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            document_marker TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(document_uri, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Run history for `stats` and the scheduler.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            status TEXT NOT NULL,
            documents_indexed INTEGER NOT NULL DEFAULT 0,
            documents_unchanged INTEGER NOT NULL DEFAULT 0,
            documents_failed INTEGER NOT NULL DEFAULT 0,
            entries_written INTEGER NOT NULL DEFAULT 0,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_source ON index_entries(source)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_updated_at ON index_entries(updated_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runs_source ON ingest_runs(source, finished_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
