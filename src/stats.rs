//! Index statistics and health overview.
//!
//! Summarises what's indexed: entry and document counts, embedding
//! models in use, and per-source breakdowns with the last ingestion run.
//! Used by `docidx stats` to confirm that syncs are landing.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::ingest::open_store;

/// Per-source breakdown of documents, entries, and the latest run.
struct SourceStats {
    source: String,
    doc_count: i64,
    entry_count: i64,
    last_run: Option<(i64, String)>,
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let pool = store.pool();

    let total_entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
        .fetch_one(pool)
        .await?;
    let total_docs: i64 =
        sqlx::query_scalar("SELECT COUNT(DISTINCT document_uri) FROM index_entries")
            .fetch_one(pool)
            .await?;
    let models: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT model || ' (' || dims || 'd)' FROM index_entries")
            .fetch_all(pool)
            .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docs-index stats");
    println!("================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", total_docs);
    println!("  Entries:     {}", total_entries);
    if !models.is_empty() {
        println!("  Models:      {}", models.join(", "));
    }

    let source_rows = sqlx::query(
        r#"
        SELECT source,
               COUNT(DISTINCT document_uri) AS doc_count,
               COUNT(*) AS entry_count
        FROM index_entries
        GROUP BY source
        ORDER BY entry_count DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    // Latest run per source, including sources that never indexed anything.
    let run_rows = sqlx::query(
        r#"
        SELECT r.source, r.finished_at, r.status
        FROM ingest_runs r
        JOIN (SELECT source, MAX(id) AS id FROM ingest_runs GROUP BY source) latest
          ON latest.id = r.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut stats: Vec<SourceStats> = source_rows
        .iter()
        .map(|row| SourceStats {
            source: row.get("source"),
            doc_count: row.get("doc_count"),
            entry_count: row.get("entry_count"),
            last_run: None,
        })
        .collect();

    for run in &run_rows {
        let source: String = run.get("source");
        let last = (run.get::<i64, _>("finished_at"), run.get::<String, _>("status"));
        match stats.iter_mut().find(|s| s.source == source) {
            Some(s) => s.last_run = Some(last),
            None => stats.push(SourceStats {
                source,
                doc_count: 0,
                entry_count: 0,
                last_run: Some(last),
            }),
        }
    }

    if !stats.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<24} {:>6} {:>8}   {}",
            "SOURCE", "DOCS", "ENTRIES", "LAST RUN"
        );
        println!("  {}", "-".repeat(64));

        for s in &stats {
            let run_display = match &s.last_run {
                Some((ts, status)) => format!("{} ({})", format_ts_relative(*ts), status),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>6} {:>8}   {}",
                s.source, s.doc_count, s.entry_count, run_display
            );
        }
    }

    println!();
    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative time ("3 hours ago"), falling back to a date past 30 days.
fn format_ts_relative(ts: i64) -> String {
    relative_to(ts, chrono::Utc::now().timestamp())
}

fn relative_to(ts: i64, now: i64) -> String {
    let delta = now - ts;
    let plural = |n: i64| if n == 1 { "" } else { "s" };

    if delta < 0 || delta >= 86400 * 30 {
        chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| ts.to_string())
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        format!("{} min{} ago", delta / 60, plural(delta / 60))
    } else if delta < 86400 {
        format!("{} hour{} ago", delta / 3600, plural(delta / 3600))
    } else {
        format!("{} day{} ago", delta / 86400, plural(delta / 86400))
    }
}
