//! Ingestion orchestrator.
//!
//! A run walks every configured [`DocumentSource`], and for each listed
//! document moves through `Fetching -> Chunking -> Indexing` before
//! returning to `Idle`. A document that fails to fetch, chunk, or embed
//! is recorded as [`DocumentStatus::Failed`] and the run moves on; only
//! store errors abort the run.
//!
//! Runs are exclusive: a second [`Pipeline::run`] while one is active
//! returns [`IndexError::RunInProgress`]. Cancellation is observed between
//! documents, never inside one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

use crate::chunk::{chunk_document, ChunkingParams};
use crate::error::{IndexError, Result};
use crate::index::{Indexer, UpsertOutcome};
use crate::models::{Document, DocumentRef};

/// A configured place documents come from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Configured source name, stored on every entry.
    fn name(&self) -> &str;

    /// Enumerate the documents currently available.
    async fn list(&self) -> Result<Vec<DocumentRef>>;

    /// Fetch one listed document.
    async fn fetch(&self, doc: &DocumentRef) -> Result<Document>;
}

/// Where the orchestrator is in the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Idle,
    Fetching,
    Chunking,
    Indexing,
}

/// Terminal state of one document in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    Indexed { chunks: usize, outcome: UpsertOutcome },
    /// Listing marker matched the store; not fetched.
    Unchanged,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub uri: String,
    pub source: String,
    #[serde(flatten)]
    pub status: DocumentStatus,
}

/// A source whose listing failed; its documents were not attempted.
#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

/// Result of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub documents: Vec<DocumentReport>,
    pub source_failures: Vec<SourceFailure>,
    pub totals: UpsertOutcome,
    pub cancelled: bool,
}

impl IngestReport {
    pub fn indexed(&self) -> usize {
        self.count(|s| matches!(s, DocumentStatus::Indexed { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|s| matches!(s, DocumentStatus::Unchanged))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, DocumentStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&DocumentStatus) -> bool) -> usize {
        self.documents.iter().filter(|d| pred(&d.status)).count()
    }
}

/// Shared stop request, checked before each document.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run knobs.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Attempt at most this many documents per source.
    pub limit: Option<usize>,
    /// Fetch and re-chunk even when the listing marker is already indexed.
    pub force: bool,
    pub cancel: CancellationFlag,
}

/// The ingestion orchestrator.
pub struct Pipeline {
    indexer: Indexer,
    chunking: ChunkingParams,
    running: AtomicBool,
    state: Mutex<IngestState>,
}

/// Releases the run flag and returns to `Idle` however the run ends.
struct RunGuard<'a>(&'a Pipeline);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.set_state(IngestState::Idle);
        self.0.running.store(false, Ordering::SeqCst);
    }
}

impl Pipeline {
    pub fn new(indexer: Indexer, chunking: ChunkingParams) -> Self {
        Self {
            indexer,
            chunking,
            running: AtomicBool::new(false),
            state: Mutex::new(IngestState::Idle),
        }
    }

    pub fn state(&self) -> IngestState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: IngestState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = next;
    }

    fn acquire(&self) -> Result<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| IndexError::RunInProgress)?;
        Ok(RunGuard(self))
    }

    /// Run one ingestion pass over `sources`.
    ///
    /// # Errors
    ///
    /// - [`IndexError::RunInProgress`] if another run is active.
    /// - [`IndexError::Store`] if the store fails; entries committed
    ///   before the failure are kept.
    pub async fn run(
        &self,
        sources: &[Arc<dyn DocumentSource>],
        opts: &RunOptions,
    ) -> Result<IngestReport> {
        let _guard = self.acquire()?;
        let mut report = IngestReport::default();

        'sources: for source in sources {
            if opts.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            self.set_state(IngestState::Fetching);
            let mut refs = match source.list().await {
                Ok(refs) => refs,
                Err(e) if e.aborts_run() => return Err(e),
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "listing failed");
                    report.source_failures.push(SourceFailure {
                        source: source.name().to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if let Some(limit) = opts.limit {
                refs.truncate(limit);
            }
            tracing::info!(source = source.name(), documents = refs.len(), "ingesting source");

            for doc_ref in &refs {
                if opts.cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'sources;
                }

                let status = match self.ingest_one(source.as_ref(), doc_ref, opts.force).await {
                    Ok(status) => status,
                    Err(e) if e.aborts_run() => {
                        tracing::error!(uri = %doc_ref.uri, error = %e, "aborting ingestion run");
                        return Err(e);
                    }
                    Err(e) => {
                        tracing::warn!(uri = %doc_ref.uri, error = %e, "document failed");
                        DocumentStatus::Failed {
                            reason: e.to_string(),
                        }
                    }
                };
                if let DocumentStatus::Indexed { outcome, .. } = &status {
                    report.totals.merge(outcome);
                }
                report.documents.push(DocumentReport {
                    uri: doc_ref.uri.clone(),
                    source: source.name().to_string(),
                    status,
                });
            }
        }

        if report.cancelled {
            tracing::info!("ingestion cancelled at document boundary");
        }
        tracing::info!(
            indexed = report.indexed(),
            unchanged = report.unchanged(),
            failed = report.failed(),
            written = report.totals.written(),
            "ingestion run finished"
        );
        Ok(report)
    }

    async fn ingest_one(
        &self,
        source: &dyn DocumentSource,
        doc_ref: &DocumentRef,
        force: bool,
    ) -> Result<DocumentStatus> {
        if !force {
            if let Some(marker) = &doc_ref.marker {
                if self.indexer.is_current(&doc_ref.uri, marker).await? {
                    return Ok(DocumentStatus::Unchanged);
                }
            }
        }

        self.set_state(IngestState::Fetching);
        let doc = source.fetch(doc_ref).await?;

        self.set_state(IngestState::Chunking);
        let chunks = chunk_document(&doc, &self.chunking)?;

        self.set_state(IngestState::Indexing);
        let outcome = self.indexer.upsert(&doc, &chunks).await?;

        Ok(DocumentStatus::Indexed {
            chunks: chunks.len(),
            outcome,
        })
    }
}
