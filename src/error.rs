//! Error types for memdc

use thiserror::Error;

/// Result type alias for memdc operations
pub type Result<T> = std::result::Result<T, MemdcError>;

/// Main error type for memdc
#[derive(Error, Debug)]
pub enum MemdcError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error {status}: {body}")]
    UpstreamHttp { status: u16, body: String },

    #[error("Upstream protocol error: {0}")]
    UpstreamProtocol(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Vector index error: {0}")]
    Index(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Internal state error: {0}")]
    InternalState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for MemdcError {
    fn from(e: reqwest::Error) -> Self {
        MemdcError::Network(e.to_string())
    }
}

impl From<redis::RedisError> for MemdcError {
    fn from(e: redis::RedisError) -> Self {
        MemdcError::Index(e.to_string())
    }
}

impl MemdcError {
    /// HTTP status code this error maps to at the transport boundary
    pub fn status_code(&self) -> u16 {
        match self {
            MemdcError::Validation(_) => 400,
            MemdcError::NotFound(_) => 404,
            _ => 500,
        }
    }

    /// Whether the failure came from a remote collaborator
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            MemdcError::UpstreamHttp { .. }
                | MemdcError::UpstreamProtocol(_)
                | MemdcError::Network(_)
                | MemdcError::Index(_)
                | MemdcError::Embedding(_)
        )
    }
}
