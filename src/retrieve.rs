//! `docidx retrieve`: top-k passages for a query.
//!
//! Shares [`Passage`] and [`parse_since`] with the HTTP server so both
//! surfaces return the same shape.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

use docs_index_core::retrieve::{format_ts_iso, validate_query, Retriever};
use docs_index_core::store::{QueryFilter, ScoredEntry};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::ingest::open_store;
use crate::sqlite_store::SqliteStore;

/// A retrieved chunk as shown to consumers.
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub id: String,
    pub document_uri: String,
    pub source: String,
    pub chunk_index: i64,
    pub score: f32,
    pub text: String,
    /// ISO 8601.
    pub updated_at: String,
}

impl From<ScoredEntry> for Passage {
    fn from(scored: ScoredEntry) -> Self {
        let entry = scored.entry;
        Self {
            id: entry.id,
            document_uri: entry.document_uri,
            source: entry.source,
            chunk_index: entry.chunk_index,
            score: scored.score,
            text: entry.text,
            updated_at: format_ts_iso(entry.updated_at),
        }
    }
}

/// `YYYY-MM-DD` → unix seconds at 00:00 UTC.
pub fn parse_since(date: &str) -> Result<i64> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", date))?;
    Ok(day
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default())
}

pub fn build_filter(source: Option<String>, since: Option<&str>) -> Result<QueryFilter> {
    Ok(QueryFilter {
        source,
        since: since.map(parse_since).transpose()?,
        ..QueryFilter::default()
    })
}

/// Open the store and embedding provider for retrieval.
pub async fn build_retriever(config: &Config) -> Result<(Arc<SqliteStore>, Retriever)> {
    let store = Arc::new(open_store(config).await?);
    let embedder = create_embedder(&config.embedding)?;
    let retriever = Retriever::new(store.clone(), embedder, config.retrieval.params());
    Ok((store, retriever))
}

pub async fn run_retrieve(
    config: &Config,
    query: &str,
    k: Option<usize>,
    source: Option<String>,
    since: Option<String>,
    json: bool,
) -> Result<()> {
    validate_query(query, config.retrieval.max_query_chars)?;
    let filter = build_filter(source, since.as_deref())?;
    let k = k.unwrap_or(config.retrieval.top_k);

    let (store, retriever) = build_retriever(config).await?;
    let passages: Vec<Passage> = retriever
        .retrieve(query, k, &filter)
        .await?
        .into_iter()
        .map(Passage::from)
        .collect();
    store.pool().close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&passages)?);
        return Ok(());
    }

    if passages.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, p) in passages.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} #{} ({})",
            i + 1,
            p.score,
            p.document_uri,
            p.chunk_index,
            p.source
        );
        println!("    updated: {}", p.updated_at);
        println!("    {}", snippet(&p.text, 240));
        println!();
    }
    Ok(())
}

/// First `max_chars` chars of `text` on one line.
fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docs_index_core::models::IndexEntry;

    #[test]
    fn test_parse_since() {
        assert_eq!(parse_since("1970-01-02").unwrap(), 86_400);
        assert!(parse_since("02/01/1970").is_err());
    }

    #[test]
    fn test_build_filter() {
        let filter = build_filter(Some("docs".to_string()), Some("2024-01-01")).unwrap();
        assert_eq!(filter.source.as_deref(), Some("docs"));
        assert_eq!(filter.since, Some(1_704_067_200));
        assert_eq!(build_filter(None, None).unwrap(), QueryFilter::default());
    }

    #[test]
    fn test_passage_from_scored_entry() {
        let scored = ScoredEntry {
            entry: IndexEntry {
                id: "id-1".to_string(),
                document_uri: "file:///docs/a.md".to_string(),
                source: "local".to_string(),
                chunk_index: 2,
                text: "Validators stake tokens.".to_string(),
                content_hash: "h".to_string(),
                model: "m".to_string(),
                vector: vec![0.1, 0.2],
                document_marker: "mtime:1:2".to_string(),
                updated_at: 0,
            },
            score: 0.75,
        };
        let passage = Passage::from(scored);
        assert_eq!(passage.chunk_index, 2);
        assert_eq!(passage.updated_at, "1970-01-01T00:00:00Z");

        let json = serde_json::to_value(&passage).unwrap();
        assert!(json.get("vector").is_none());
        assert_eq!(json["score"], 0.75);
    }

    #[test]
    fn test_snippet_flattens_and_truncates() {
        assert_eq!(snippet("a\n\nb   c", 100), "a b c");
        assert_eq!(snippet("abcdef", 3), "abc…");
    }
}
