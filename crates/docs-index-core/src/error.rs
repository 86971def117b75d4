//! Error taxonomy for ingestion and retrieval.
//!
//! Per-document errors ([`IndexError::Fetch`], [`IndexError::Malformed`],
//! [`IndexError::Embedding`]) are recovered by the orchestrator: the
//! document is marked failed and the run continues. [`IndexError::Store`]
//! aborts the run. [`IndexError::InvalidQuery`] is only produced at
//! retrieval time.

/// Errors from an embedding service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmbeddingError {
    /// Rate limit, timeout, 5xx, connection reset. Worth retrying.
    #[error("embedding service unavailable: {0}")]
    Transient(String),

    /// Bad request, auth failure, malformed response. Retrying won't help.
    #[error("embedding request rejected: {0}")]
    Persistent(String),
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// The vector store could not be read or written.
#[derive(Debug, thiserror::Error)]
#[error("vector store error: {source}")]
pub struct StoreError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl StoreError {
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self { source: err.into() }
    }
}

/// Top-level error for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Source unreachable or returned something unusable.
    #[error("fetch failed for {uri}: {message}")]
    Fetch { uri: String, message: String },

    /// Content that cannot be chunked (binary, empty).
    #[error("malformed document {uri}: {reason}")]
    Malformed { uri: String, reason: String },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Empty, whitespace-only, or oversized query.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Another ingestion run holds the store.
    #[error("an ingestion run is already in progress")]
    RunInProgress,
}

impl IndexError {
    pub fn fetch(uri: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Fetch {
            uri: uri.into(),
            message: message.to_string(),
        }
    }

    pub fn malformed(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that must stop the whole ingestion run.
    pub fn aborts_run(&self) -> bool {
        matches!(self, Self::Store(_) | Self::RunInProgress)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::malformed("file:///a.md", "contains NUL bytes");
        assert_eq!(
            err.to_string(),
            "malformed document file:///a.md: contains NUL bytes"
        );

        let err = IndexError::Store(StoreError::new("database is locked"));
        assert!(err.to_string().contains("database is locked"));
    }

    #[test]
    fn test_store_errors_abort_run() {
        assert!(IndexError::Store(StoreError::new("down")).aborts_run());
        assert!(!IndexError::fetch("u", "404").aborts_run());
        assert!(!IndexError::Embedding(EmbeddingError::Transient("429".into())).aborts_run());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EmbeddingError::Transient("timeout".into()).is_retryable());
        assert!(!EmbeddingError::Persistent("401".into()).is_retryable());
    }
}
