use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("extraction failed: {0}")]
    ExtractionFailure(String),
    #[error("embedding batch mismatch: requested {requested}, received {received}")]
    EmbeddingBatchMismatch { requested: usize, received: usize },
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("provider timed out: {0}")]
    ProviderTimeout(String),
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("empty input: {0}")]
    EmptyInput(String),
    #[error("no knowledge scope supplied")]
    ScopeRequired,
    #[error("store error: {0}")]
    Store(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        RagError::Store(err.to_string())
    }

    /// Map a reqwest failure onto the provider-facing taxonomy.
    pub fn from_http(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RagError::ProviderTimeout(err.to_string())
        } else {
            RagError::ProviderError(err.to_string())
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
