use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("pdf parse error in {document_id}: {reason}")]
    PdfParse { document_id: String, reason: String },

    #[error("pdf had no readable page text: {0}")]
    NoText(String),
}

impl ExtractionError {
    pub fn document_id(&self) -> &str {
        match self {
            Self::PdfParse { document_id, .. } => document_id,
            Self::NoText(document_id) => document_id,
        }
    }
}

/// Failure of a single call to an external model endpoint.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("{backend} rate limited the request: {details}")]
    RateLimited { backend: String, details: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("missing credential: {0}")]
    MissingCredential(String),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::RateLimited { .. } | Self::Timeout { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("embedding service error: {0}")]
    EmbeddingService(#[source] ServiceError),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no index has been built yet; upload documents first")]
    EmptyIndex,

    #[error("query is empty")]
    EmptyQuery,

    #[error("embedding service error: {0}")]
    EmbeddingService(#[source] ServiceError),

    #[error("query embedder {query_model} does not match index embedder {index_model}")]
    EmbeddingMismatch {
        index_model: String,
        query_model: String,
    },

    #[error("generation error ({model}): {source}")]
    Generation {
        model: String,
        #[source]
        source: ServiceError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("unknown model id: {0}")]
    UnknownModel(String),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
