//! # docs-index
//!
//! Documentation ingestion and retrieval for a docs-support chat bot.
//!
//! Raw markdown/text documents are fetched from GitHub repositories and
//! local directories, split into bounded overlapping chunks, embedded, and
//! stored in SQLite keyed by a stable document+chunk identity. Agents ask
//! for the top-k passages for a question through the CLI, the HTTP API, or
//! this library.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────────┐   ┌──────────────┐
//! │   Sources    │──▶│       Pipeline         │──▶│    SQLite     │
//! │  FS/GitHub   │   │ chunk, embed, upsert   │   │ index_entries │
//! └──────────────┘   └───────────────────────┘   └──────┬───────┘
//!        ▲                                              │
//!        │ watch                  ┌──────────────────────┤
//!  ┌───────────┐                  ▼                      ▼
//!  │ Scheduler │            ┌──────────┐          ┌──────────┐
//!  └───────────┘            │   CLI    │          │   HTTP   │
//!                           │ (docidx) │          │ /retrieve│
//!                           └──────────┘          └──────────┘
//! ```
//!
//! The pipeline, chunker, indexer, and retriever live in
//! [`docs_index_core`]; this crate supplies the concrete store, embedding
//! providers, sources, and surfaces.
//!
//! ## Quick Start
//!
//! ```bash
//! docidx init                       # create database
//! docidx sync all                   # ingest every configured source
//! docidx retrieve "how do I stake?" -k 3
//! docidx serve                      # start HTTP server
//! docidx watch                      # re-ingest on each source's interval
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_store`] | SQLite [`VectorStore`](docs_index_core::store::VectorStore) |
//! | [`embedding`] | OpenAI, Ollama, and local embedding providers with retry |
//! | [`source_fs`] / [`source_github`] | Document sources |
//! | [`ingest`] | `sync`: pipeline wiring and run history |
//! | [`schedule`] | `watch`: periodic re-ingestion |
//! | [`retrieve`] | `retrieve` command |
//! | [`server`] | HTTP retrieval API |

pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod retrieve;
pub mod schedule;
pub mod server;
pub mod source_fs;
pub mod source_github;
pub mod sources;
pub mod sqlite_store;
pub mod stats;
