//! Embedding providers.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings`, key from `OPENAI_API_KEY`.
//! - **[`OllamaEmbedder`]**: `POST /api/embed` on a local Ollama instance.
//! - **`LocalEmbedder`**: fastembed models run in process (feature
//!   `local-embeddings`); no network calls after the model download.
//!
//! # Retry Strategy
//!
//! Providers classify failures, and [`RetryingEmbedder`] retries the
//! transient ones with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: base, 2×, 4×, ... capped at 2^5 × base
//!
//! When retries run out the error reaches the orchestrator, which marks
//! the document failed and moves on.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use docs_index_core::embedding::Embedder;
use docs_index_core::EmbeddingError;

use crate::config::EmbeddingConfig;

/// Build the configured provider, wrapped for retries where it talks HTTP.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let retry = |inner: Arc<dyn Embedder>| -> Arc<dyn Embedder> {
        Arc::new(RetryingEmbedder::new(
            inner,
            config.max_retries,
            Duration::from_millis(config.retry_base_ms),
        ))
    };

    match config.provider.as_str() {
        "openai" => Ok(retry(Arc::new(OpenAIEmbedder::new(config)?))),
        "ollama" => Ok(retry(Arc::new(OllamaEmbedder::new(config)?))),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn required_model(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

/// Map an HTTP status to the retry classification.
fn classify_status(service: &str, status: reqwest::StatusCode, body: &str) -> EmbeddingError {
    let message = format!("{} API error {}: {}", service, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        EmbeddingError::Transient(message)
    } else {
        EmbeddingError::Persistent(message)
    }
}

/// Send a JSON request and return the parsed JSON body, classifying errors.
async fn send_json(
    service: &str,
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value, EmbeddingError> {
    let response = request
        .send()
        .await
        .map_err(|e| EmbeddingError::Transient(format!("{} connection error: {}", service, e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(service, status, &body));
    }

    response
        .json()
        .await
        .map_err(|e| EmbeddingError::Persistent(format!("{} returned invalid JSON: {}", service, e)))
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Fails if `model`/`dims` are missing or `OPENAI_API_KEY` is unset.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config, "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            client: http_client(config)?,
            api_key,
            url: format!("{}/v1/embeddings", base.trim_end_matches('/')),
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = send_json("OpenAI", request).await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let invalid = |what: &str| EmbeddingError::Persistent(format!("Invalid OpenAI response: {}", what));

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| invalid("missing embedding"))?;
        indexed.push((index, to_f32_vec(embedding)));
    }
    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config, "Ollama")?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client: http_client(config)?,
            url: format!("{}/api/embed", base.trim_end_matches('/')),
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self.client.post(&self.url).json(&body);
        let json = send_json("Ollama", request).await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbeddingError::Persistent("Invalid Ollama response: missing embeddings array".into())
        })?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding.as_array().map(|a| to_f32_vec(a)).ok_or_else(|| {
                EmbeddingError::Persistent(
                    "Invalid Ollama response: embedding is not an array".into(),
                )
            })
        })
        .collect()
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::*;
    use std::sync::Mutex;

    /// In-process embedding via fastembed. The model is downloaded from
    /// Hugging Face on first use and cached; later runs are offline.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
            // Validate the name now rather than on first embed.
            fastembed_model(&model_name)?;
            let dims = config.dims.unwrap_or(match model_name.as_str() {
                "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
                "bge-large-en-v1.5" => 1024,
                _ => 384,
            });

            Ok(Self {
                model_name,
                dims,
                batch_size: config.batch_size,
                model: Arc::new(Mutex::new(None)),
            })
        }
    }

    fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
                 bge-large-en-v1.5, nomic-embed-text-v1.5",
                other
            ),
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let name = self.model_name.clone();
            let slot = self.model.clone();
            let batch_size = self.batch_size;
            let texts = texts.to_vec();

            tokio::task::spawn_blocking(move || {
                let mut guard = slot
                    .lock()
                    .map_err(|_| EmbeddingError::Persistent("local model lock poisoned".into()))?;
                if guard.is_none() {
                    let model = fastembed_model(&name)
                        .map_err(|e| EmbeddingError::Persistent(e.to_string()))?;
                    let loaded = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model).with_show_download_progress(false),
                    )
                    .map_err(|e| {
                        EmbeddingError::Persistent(format!("Failed to load local model: {}", e))
                    })?;
                    *guard = Some(loaded);
                }
                match guard.as_mut() {
                    Some(model) => model.embed(texts, Some(batch_size)).map_err(|e| {
                        EmbeddingError::Persistent(format!("Local embedding failed: {}", e))
                    }),
                    None => Err(EmbeddingError::Persistent("local model not loaded".into())),
                }
            })
            .await
            .map_err(|e| EmbeddingError::Persistent(format!("embedding task failed: {}", e)))?
        }
    }
}

// ============ Retry ============

/// Retries [`EmbeddingError::Transient`] failures with exponential backoff.
pub struct RetryingEmbedder {
    inner: Arc<dyn Embedder>,
    max_retries: u32,
    base_delay: Duration,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt.saturating_sub(1)).min(5))
    }
}

#[async_trait]
impl Embedder for RetryingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt = 0;
        loop {
            match self.inner.embed(texts).await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        model = self.inner.model_name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "embedding failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `error` for the first `failures` calls.
    struct Flaky {
        failures: u32,
        error: EmbeddingError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Embedder for Flaky {
        fn model_name(&self) -> &str {
            "flaky"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(self.error.clone());
            }
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    fn flaky(failures: u32, error: EmbeddingError) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            error,
            calls: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let inner = flaky(2, EmbeddingError::Transient("429".into()));
        let retrying = RetryingEmbedder::new(inner.clone(), 3, Duration::from_millis(1));

        let out = retrying.embed(&["a".to_string()]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let inner = flaky(10, EmbeddingError::Transient("503".into()));
        let retrying = RetryingEmbedder::new(inner.clone(), 2, Duration::from_millis(1));

        let err = retrying.embed(&["a".to_string()]).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_persistent_errors_fail_fast() {
        let inner = flaky(1, EmbeddingError::Persistent("401".into()));
        let retrying = RetryingEmbedder::new(inner.clone(), 5, Duration::from_millis(1));

        assert!(retrying.embed(&["a".to_string()]).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let r = RetryingEmbedder::new(
            flaky(0, EmbeddingError::Transient(String::new())),
            10,
            Duration::from_millis(100),
        );
        assert_eq!(r.backoff(1), Duration::from_millis(100));
        assert_eq!(r.backoff(2), Duration::from_millis(200));
        assert_eq!(r.backoff(4), Duration::from_millis(800));
        assert_eq!(r.backoff(9), Duration::from_millis(3200));
    }

    #[test]
    fn test_status_classification() {
        use reqwest::StatusCode;
        assert!(classify_status("x", StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status("x", StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!classify_status("x", StatusCode::UNAUTHORIZED, "").is_retryable());
        assert!(!classify_status("x", StatusCode::BAD_REQUEST, "").is_retryable());
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.5, 0.5]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn test_parse_openai_missing_data() {
        let err = parse_openai_response(&serde_json::json!({"error": "x"})).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_parse_ollama() {
        let json = serde_json::json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4]] });
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert!((vectors[1][1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "magic".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(768),
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.model_name(), "nomic-embed-text");
        assert_eq!(embedder.dims(), 768);
    }
}
