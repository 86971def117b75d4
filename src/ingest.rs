//! `docidx sync`: wires configured sources, the SQLite store, and the
//! embedding provider into the core [`Pipeline`], and records one
//! `ingest_runs` row per source for `stats` and the scheduler.
//!
//! ```text
//! sources ──list/fetch──▶ Pipeline (chunk, embed, upsert) ──▶ index_entries
//!                                 │
//!                                 └──────── report ──▶ ingest_runs
//! ```

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use docs_index_core::chunk::chunk_document;
use docs_index_core::embedding::Embedder;
use docs_index_core::index::{Indexer, UpsertOutcome};
use docs_index_core::pipeline::{
    DocumentSource, DocumentStatus, IngestReport, Pipeline, RunOptions,
};
use docs_index_core::store::VectorStore;
use docs_index_core::IndexError;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::source_fs::FilesystemSource;
use crate::source_github::GithubSource;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

/// Connect to the configured database and make sure the schema exists.
pub async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = db::connect(&config.db).await?;
    migrate::run_migrations(&pool).await?;
    Ok(SqliteStore::new(pool))
}

/// Resolve a source selector: `all`, or one configured source name.
pub fn build_sources(config: &Config, selector: &str) -> Result<Vec<Arc<dyn DocumentSource>>> {
    let mut sources: Vec<Arc<dyn DocumentSource>> = Vec::new();

    for fs in &config.sources.filesystem {
        if selector == "all" || selector == fs.name {
            sources.push(Arc::new(FilesystemSource::new(fs.clone())?));
        }
    }
    for gh in &config.sources.github {
        if selector == "all" || selector == gh.name {
            sources.push(Arc::new(GithubSource::new(gh.clone())?));
        }
    }

    if sources.is_empty() {
        let names = config.sources.names();
        if names.is_empty() {
            bail!("No sources configured. Add [[sources.filesystem]] or [[sources.github]] to the config.");
        }
        bail!(
            "Unknown source: '{}'. Available: all, {}",
            selector,
            names.join(", ")
        );
    }
    Ok(sources)
}

pub fn build_pipeline(
    config: &Config,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
) -> Pipeline {
    let indexer = Indexer::new(store, embedder, config.embedding.batch_size);
    Pipeline::new(indexer, config.chunking.params())
}

/// One row of `ingest_runs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub source: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub status: &'static str,
    pub indexed: i64,
    pub unchanged: i64,
    pub failed: i64,
    pub entries_written: i64,
    pub error: Option<String>,
}

/// Summarise a finished run per source.
pub fn run_records(
    sources: &[Arc<dyn DocumentSource>],
    report: &IngestReport,
    started_at: i64,
    finished_at: i64,
) -> Vec<RunRecord> {
    sources
        .iter()
        .map(|source| {
            let name = source.name();
            let docs: Vec<_> = report.documents.iter().filter(|d| d.source == name).collect();
            let listing_error = report
                .source_failures
                .iter()
                .find(|f| f.source == name)
                .map(|f| f.reason.clone());

            let mut entries = UpsertOutcome::default();
            for doc in &docs {
                if let DocumentStatus::Indexed { outcome, .. } = &doc.status {
                    entries.merge(outcome);
                }
            }
            let count = |pred: fn(&DocumentStatus) -> bool| {
                docs.iter().filter(|d| pred(&d.status)).count() as i64
            };

            let status = if listing_error.is_some() {
                "failed"
            } else if report.cancelled {
                "cancelled"
            } else {
                "ok"
            };

            RunRecord {
                source: name.to_string(),
                started_at,
                finished_at,
                status,
                indexed: count(|s| matches!(s, DocumentStatus::Indexed { .. })),
                unchanged: count(|s| matches!(s, DocumentStatus::Unchanged)),
                failed: count(|s| matches!(s, DocumentStatus::Failed { .. })),
                entries_written: entries.written() as i64,
                error: listing_error,
            }
        })
        .collect()
}

pub async fn record_run(pool: &SqlitePool, record: &RunRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ingest_runs (source, started_at, finished_at, status, documents_indexed,
                                 documents_unchanged, documents_failed, entries_written, error)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.source)
    .bind(record.started_at)
    .bind(record.finished_at)
    .bind(record.status)
    .bind(record.indexed)
    .bind(record.unchanged)
    .bind(record.failed)
    .bind(record.entries_written)
    .bind(&record.error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Run the pipeline once and record the outcome.
///
/// An aborted run (store failure) is recorded as `aborted` for every
/// selected source before the error is returned. A rejected overlapping
/// run records nothing.
pub async fn ingest(
    pipeline: &Pipeline,
    pool: &SqlitePool,
    sources: &[Arc<dyn DocumentSource>],
    opts: &RunOptions,
) -> Result<IngestReport> {
    let started_at = chrono::Utc::now().timestamp();
    let result = pipeline.run(sources, opts).await;
    let finished_at = chrono::Utc::now().timestamp();

    match result {
        Ok(report) => {
            for record in run_records(sources, &report, started_at, finished_at) {
                record_run(pool, &record).await?;
            }
            Ok(report)
        }
        Err(IndexError::RunInProgress) => Err(IndexError::RunInProgress.into()),
        Err(e) => {
            for source in sources {
                let record = RunRecord {
                    source: source.name().to_string(),
                    started_at,
                    finished_at,
                    status: "aborted",
                    indexed: 0,
                    unchanged: 0,
                    failed: 0,
                    entries_written: 0,
                    error: Some(e.to_string()),
                };
                if let Err(record_err) = record_run(pool, &record).await {
                    tracing::warn!(error = %record_err, "failed to record aborted run");
                }
            }
            Err(e.into())
        }
    }
}

pub async fn run_sync(
    config: &Config,
    selector: &str,
    dry_run: bool,
    limit: Option<usize>,
    force: bool,
) -> Result<()> {
    let sources = build_sources(config, selector)?;

    if dry_run {
        return dry_run_sync(config, selector, &sources, limit).await;
    }

    let store = Arc::new(open_store(config).await?);
    let embedder = create_embedder(&config.embedding)?;
    let pipeline = build_pipeline(config, store.clone(), embedder);

    let opts = RunOptions {
        limit,
        force,
        ..RunOptions::default()
    };
    let report = ingest(&pipeline, store.pool(), &sources, &opts).await?;

    print_report(selector, &report);
    store.pool().close().await;
    Ok(())
}

fn print_report(selector: &str, report: &IngestReport) {
    println!("sync {}", selector);
    println!(
        "  documents: {} indexed, {} unchanged, {} failed",
        report.indexed(),
        report.unchanged(),
        report.failed()
    );
    println!(
        "  entries: {} inserted, {} updated, {} unchanged, {} reused, {} pruned",
        report.totals.inserted,
        report.totals.updated,
        report.totals.unchanged,
        report.totals.reused,
        report.totals.pruned
    );
    for failure in &report.source_failures {
        println!("  source failed: {}: {}", failure.source, failure.reason);
    }
    for doc in &report.documents {
        if let DocumentStatus::Failed { reason } = &doc.status {
            println!("  failed: {}: {}", doc.uri, reason);
        }
    }
    if report.cancelled {
        println!("cancelled");
    } else {
        println!("ok");
    }
}

/// List and chunk without embedding or writing anything.
async fn dry_run_sync(
    config: &Config,
    selector: &str,
    sources: &[Arc<dyn DocumentSource>],
    limit: Option<usize>,
) -> Result<()> {
    let params = config.chunking.params();
    println!("sync {} (dry-run)", selector);

    for source in sources {
        let mut refs = match source.list().await {
            Ok(refs) => refs,
            Err(e) => {
                println!("  {}: listing failed: {}", source.name(), e);
                continue;
            }
        };
        if let Some(limit) = limit {
            refs.truncate(limit);
        }

        let mut chunks = 0usize;
        let mut skipped = 0usize;
        for doc_ref in &refs {
            match source
                .fetch(doc_ref)
                .await
                .and_then(|doc| chunk_document(&doc, &params))
            {
                Ok(c) => chunks += c.len(),
                Err(e) => {
                    tracing::debug!(uri = %doc_ref.uri, error = %e, "would fail");
                    skipped += 1;
                }
            }
        }

        println!("  {}:", source.name());
        println!("    documents found: {}", refs.len());
        println!("    estimated chunks: {}", chunks);
        if skipped > 0 {
            println!("    would fail: {}", skipped);
        }
    }
    Ok(())
}
