//! `docidx watch`: periodic re-ingestion.
//!
//! The scheduler owns timing only. Every tick it asks which sources are
//! due (never run, or last run finished at least `refresh_interval_secs`
//! ago according to `ingest_runs`) and hands them to the pipeline as a
//! background run. A tick that lands while a run is still active is
//! skipped. Ctrl-C cancels the active run at the next document boundary
//! and stops the loop.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use docs_index_core::pipeline::{CancellationFlag, DocumentSource, Pipeline, RunOptions};
use docs_index_core::IndexError;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::ingest;

/// Names of sources whose refresh interval has elapsed at `now`.
pub fn due_sources(schedule: &[(String, u64)], last_runs: &HashMap<String, i64>, now: i64) -> Vec<String> {
    schedule
        .iter()
        .filter(|(name, interval)| match last_runs.get(name) {
            Some(last) => now - last >= *interval as i64,
            None => true,
        })
        .map(|(name, _)| name.clone())
        .collect()
}

/// Latest `finished_at` per source. Aborted runs do not count, so a
/// source whose store write failed is retried on the next tick.
pub async fn last_runs(pool: &SqlitePool) -> Result<HashMap<String, i64>> {
    let rows = sqlx::query(
        "SELECT source, MAX(finished_at) AS finished_at FROM ingest_runs \
         WHERE status != 'aborted' GROUP BY source",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get("source"), row.get("finished_at")))
        .collect())
}

pub async fn run_watch(config: &Config, tick_secs: u64) -> Result<()> {
    let all_sources = ingest::build_sources(config, "all")?;
    let store = Arc::new(ingest::open_store(config).await?);
    let embedder = create_embedder(&config.embedding)?;
    let pipeline = Arc::new(ingest::build_pipeline(config, store.clone(), embedder));
    let schedule = config.sources.schedule();

    let cancel = CancellationFlag::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(tick_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut active: Option<tokio::task::JoinHandle<()>> = None;

    println!(
        "watching {} source(s), tick every {}s (ctrl-c to stop)",
        schedule.len(),
        tick_secs.max(1)
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                cancel.cancel();
                break;
            }
        }

        if pipeline.is_running() {
            tracing::debug!("previous run still active, skipping tick");
            continue;
        }

        let due = due_sources(&schedule, &last_runs(store.pool()).await?, chrono::Utc::now().timestamp());
        if due.is_empty() {
            continue;
        }
        let sources: Vec<Arc<dyn DocumentSource>> = all_sources
            .iter()
            .filter(|s| due.iter().any(|name| name == s.name()))
            .cloned()
            .collect();
        tracing::info!(sources = ?due, "starting scheduled run");

        let pipeline = pipeline.clone();
        let pool = store.pool().clone();
        let opts = RunOptions {
            cancel: cancel.clone(),
            ..RunOptions::default()
        };
        active = Some(tokio::spawn(async move {
            match ingest::ingest(&pipeline, &pool, &sources, &opts).await {
                Ok(report) => tracing::info!(
                    indexed = report.indexed(),
                    unchanged = report.unchanged(),
                    failed = report.failed(),
                    "scheduled run finished"
                ),
                Err(e) if matches!(e.downcast_ref::<IndexError>(), Some(IndexError::RunInProgress)) => {
                    tracing::debug!("run already in progress, tick skipped");
                }
                Err(e) => tracing::error!(error = %format!("{:#}", e), "scheduled run failed"),
            }
        }));
    }

    if let Some(handle) = active {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "scheduled run task ended abnormally");
        }
    }
    store.pool().close().await;
    println!("stopped");
    Ok(())
}
