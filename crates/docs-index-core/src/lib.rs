//! # docs-index core
//!
//! Document ingestion and retrieval logic for docs-index: data models,
//! error taxonomy, chunking, the embedding and vector-store traits, the
//! idempotent indexer, the top-k retriever, and the ingestion
//! orchestrator.
//!
//! This crate contains no tokio, sqlx, network, or filesystem code.
//! Concrete stores, embedding providers, and document sources live in the
//! `docs-index` application crate and plug in through [`store::VectorStore`],
//! [`embedding::Embedder`], and [`pipeline::DocumentSource`].

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod retrieve;
pub mod store;

pub use error::{EmbeddingError, IndexError, Result, StoreError};
