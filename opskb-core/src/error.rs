//! Error types for the opskb knowledge engine

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using opskb's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the opskb knowledge engine
#[derive(Debug, Error)]
pub enum Error {
    // ============ Indexing Errors ============
    /// The document at `path` could not be read
    #[error("Failed to read {path:?}: {source}")]
    Read {
        /// Path that failed to read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    // ============ Embedding Errors ============
    /// Embedding provider unreachable after all retries
    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Embedding provider permanently rejected the request
    #[error("Embedding provider rejected request: {0}")]
    EmbeddingRejected(String),

    /// Vector dimensionality does not match the configured/indexed one
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the index was configured with
        expected: usize,
        /// Dimension actually observed
        actual: usize,
    },

    // ============ Storage Errors ============
    /// Index store failure
    #[error("Index store error: {0}")]
    Store(String),

    // ============ Search Errors ============
    /// Neither search signal finished before the deadline
    #[error("Search timed out after {0:?}")]
    SearchTimeout(Duration),

    // ============ Configuration Errors ============
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    // ============ System Errors ============
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a new read error for `path`
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Create a new store error from anything displayable
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Short stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Read { .. } => "read_error",
            Self::EmbeddingUnavailable(_) => "embedding_unavailable",
            Self::EmbeddingRejected(_) => "embedding_rejected",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::Store(_) => "store_error",
            Self::SearchTimeout(_) => "search_timeout",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Other(_) => "other",
        }
    }

    /// Check if this error is transient
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbeddingUnavailable(_) | Self::SearchTimeout(_))
    }
}

/// Failure reported by an external provider (embedding or cross-encoder)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Transient: network failure, timeout, rate limit, 5xx
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Permanent: the provider refused this input
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(msg) => Self::EmbeddingUnavailable(msg),
            ProviderError::Rejected(msg) => Self::EmbeddingRejected(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::read("/tmp/missing.md", std::io::ErrorKind::NotFound.into());
        assert_eq!(err.kind(), "read_error");
        assert!(!err.is_retryable());

        let err: Error = ProviderError::Unavailable("503".into()).into();
        assert_eq!(err.kind(), "embedding_unavailable");
        assert!(err.is_retryable());

        let err: Error = ProviderError::Rejected("too long".into()).into();
        assert!(matches!(err, Error::EmbeddingRejected(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        assert_eq!(
            err.to_string(),
            "Embedding dimension mismatch: expected 384, got 768"
        );
    }
}
