//! End-to-end ingestion over the SQLite store and a filesystem source,
//! with a deterministic in-process embedder.

use async_trait::async_trait;
use sqlx::Row;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use docs_index::config::load_config;
use docs_index::ingest::{build_pipeline, build_sources, ingest, open_store};
use docs_index_core::embedding::Embedder;
use docs_index_core::pipeline::RunOptions;
use docs_index_core::retrieve::Retriever;
use docs_index_core::store::{QueryFilter, VectorStore};
use docs_index_core::EmbeddingError;

const DIMS: usize = 64;

/// Hashed bag of words: texts sharing words land close together.
struct WordEmbedder;

#[async_trait]
impl Embedder for WordEmbedder {
    fn model_name(&self) -> &str {
        "words-64"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIMS];
                for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
                    let h = word
                        .to_lowercase()
                        .bytes()
                        .fold(7u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32));
                    v[h as usize % DIMS] += 1.0;
                }
                v
            })
            .collect())
    }
}

fn write_config(root: &Path) -> std::path::PathBuf {
    let files = root.join("files");
    fs::create_dir_all(&files).unwrap();
    fs::write(
        files.join("staking.md"),
        "# Staking\n\nDelegate tokens to a validator to earn staking rewards.",
    )
    .unwrap();
    fs::write(
        files.join("fees.md"),
        "# Fees\n\nTransaction fees are paid in the native token.",
    )
    .unwrap();
    fs::write(files.join("empty.md"), "   \n").unwrap();

    let config_path = root.join("docidx.toml");
    fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{root}/docidx.sqlite"

[embedding]
provider = "ollama"
model = "unused"
dims = 64

[[sources.filesystem]]
name = "local"
root = "{root}/files"
"#,
            root = root.display()
        ),
    )
    .unwrap();
    config_path
}

#[tokio::test]
async fn test_ingest_skip_and_retrieve_over_sqlite() {
    let tmp = TempDir::new().unwrap();
    let config = load_config(&write_config(tmp.path())).unwrap();

    let store = Arc::new(open_store(&config).await.unwrap());
    let embedder: Arc<dyn Embedder> = Arc::new(WordEmbedder);
    let pipeline = build_pipeline(&config, store.clone(), embedder.clone());
    let sources = build_sources(&config, "all").unwrap();

    let first = ingest(&pipeline, store.pool(), &sources, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(first.indexed(), 2);
    assert_eq!(first.failed(), 1, "whitespace-only document is malformed");
    assert_eq!(store.count().await.unwrap(), 2);

    // Listing markers match, so nothing is fetched or rewritten.
    let second = ingest(&pipeline, store.pool(), &sources, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(second.indexed(), 0);
    assert_eq!(second.unchanged(), 2);
    assert_eq!(store.count().await.unwrap(), 2);

    // Forced: fetched and re-chunked, but every entry is unchanged.
    let forced = RunOptions {
        force: true,
        ..RunOptions::default()
    };
    let third = ingest(&pipeline, store.pool(), &sources, &forced).await.unwrap();
    assert_eq!(third.indexed(), 2);
    assert_eq!(third.totals.written(), 0);
    assert_eq!(third.totals.unchanged, 2);

    let runs = sqlx::query("SELECT status, documents_indexed FROM ingest_runs ORDER BY id")
        .fetch_all(store.pool())
        .await
        .unwrap();
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|r| r.get::<String, _>("status") == "ok"));
    assert_eq!(runs[0].get::<i64, _>("documents_indexed"), 2);

    let retriever = Retriever::new(store.clone(), embedder, config.retrieval.params());
    let hits = retriever
        .retrieve("how do I delegate to a validator?", 1, &QueryFilter::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].entry.document_uri.ends_with("staking.md"));
}

#[tokio::test]
async fn test_changed_file_is_reindexed() {
    let tmp = TempDir::new().unwrap();
    let config = load_config(&write_config(tmp.path())).unwrap();

    let store = Arc::new(open_store(&config).await.unwrap());
    let pipeline = build_pipeline(&config, store.clone(), Arc::new(WordEmbedder));
    let sources = build_sources(&config, "local").unwrap();

    ingest(&pipeline, store.pool(), &sources, &RunOptions::default())
        .await
        .unwrap();

    // A different size changes the mtime:size marker even within one second.
    fs::write(
        tmp.path().join("files/fees.md"),
        "# Fees\n\nTransaction fees are paid in the native token and partly burned.",
    )
    .unwrap();

    let report = ingest(&pipeline, store.pool(), &sources, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.indexed(), 1);
    assert_eq!(report.unchanged(), 1);
    assert_eq!(report.totals.updated, 1);
    assert_eq!(store.count().await.unwrap(), 2);
}
