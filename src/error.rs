//! Error types for the retrieval and answer pipeline.
//!
//! Every stage (extraction, indexing, retrieval, reranking, synthesis)
//! returns [`Result<T>`]; only [`crate::pipeline::RagPipeline::query`]
//! turns a [`RagError`] into a user-facing message.

use thiserror::Error;

/// Errors that can occur in pipeline stages and their collaborators.
#[derive(Debug, Error)]
pub enum RagError {
    /// Missing credentials, invalid settings, or an inconsistent collection.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The embedding service failed.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        provider: String,
        message: String,
        transient: bool,
    },

    /// The vector store backend failed.
    #[error("Vector store error ({backend}): {message}")]
    VectorStore { backend: String, message: String },

    /// A PDF file or page could not be read.
    #[error("Extraction error ({source_file}): {message}")]
    Extraction {
        source_file: String,
        message: String,
    },

    /// The vision-description service failed.
    #[error("Vision error: {message}")]
    Vision { message: String, transient: bool },

    /// The image description cache could not be read or written.
    #[error("Cache error: {0}")]
    Cache(String),

    /// The relevance model failed to score a batch.
    #[error("Reranker error ({reranker}): {message}")]
    Rerank { reranker: String, message: String },

    /// The completion service failed.
    #[error("Completion error: {message}")]
    Completion { message: String, transient: bool },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Whether retrying the same call may succeed (rate limit, timeout,
    /// server error, dropped connection).
    pub fn is_transient(&self) -> bool {
        match self {
            RagError::Embedding { transient, .. }
            | RagError::Vision { transient, .. }
            | RagError::Completion { transient, .. } => *transient,
            _ => false,
        }
    }

    pub(crate) fn store(backend: &str, err: impl std::fmt::Display) -> Self {
        RagError::VectorStore {
            backend: backend.to_string(),
            message: err.to_string(),
        }
    }
}

/// HTTP 429 and 5xx are worth retrying; other statuses are not.
pub(crate) fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// Network-level failures (connect, timeout) are worth retrying; decoding
/// failures are not.
pub(crate) fn is_transient_reqwest(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

impl From<sqlx::Error> for RagError {
    fn from(err: sqlx::Error) -> Self {
        RagError::store("sqlite", err)
    }
}

/// A convenience result type for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;
