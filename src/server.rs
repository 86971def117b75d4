//! HTTP retrieval server.
//!
//! Exposes `retrieve` to chat/response agents over JSON.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/retrieve` | Top-k passages for `{ "query", "k"?, "source"?, "since"? }` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid query: query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embedding_unavailable` (502),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based
//! agents can call the API directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use docs_index_core::retrieve::Retriever;
use docs_index_core::IndexError;

use crate::config::Config;
use crate::retrieve::{build_filter, build_retriever, Passage};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    retriever: Arc<Retriever>,
    /// `k` when the request omits it.
    default_k: usize,
}

impl AppState {
    pub fn new(retriever: Arc<Retriever>, default_k: usize) -> Self {
        Self {
            retriever,
            default_k,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/retrieve", post(handle_retrieve))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let (_store, retriever) = build_retriever(config).await?;
    let state = AppState::new(Arc::new(retriever), config.retrieval.top_k);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("retrieval server listening on http://{}", config.server.bind);
    tracing::info!(bind = %config.server.bind, "server started");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }
}

impl From<IndexError> for AppError {
    fn from(err: IndexError) -> Self {
        let (status, code) = match &err {
            IndexError::InvalidQuery(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            IndexError::Embedding(_) => (StatusCode::BAD_GATEWAY, "embedding_unavailable"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "retrieve failed");
        }
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /retrieve ============

#[derive(Deserialize)]
struct RetrieveRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    source: Option<String>,
    /// `YYYY-MM-DD`.
    #[serde(default)]
    since: Option<String>,
}

#[derive(Serialize)]
struct RetrieveResponse {
    results: Vec<Passage>,
}

async fn handle_retrieve(
    State(state): State<AppState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, AppError> {
    let filter = build_filter(req.source, req.since.as_deref())
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let k = req.k.unwrap_or(state.default_k);

    let results = state
        .retriever
        .retrieve(&req.query, k, &filter)
        .await?
        .into_iter()
        .map(Passage::from)
        .collect();

    Ok(Json(RetrieveResponse { results }))
}
