/// Error types for the embedding engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    /// The backend is reachable in principle but cannot serve right now
    /// (model still downloading, device busy). Retryable; callers must
    /// never substitute a zero vector.
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("Model loading failed: {0}")]
    ModelLoadError(String),

    #[error("Model file not found at path: {0}")]
    ModelNotFound(String),

    #[error("Tokenization failed: {0}")]
    TokenizationError(String),

    #[error("Inference failed: {0}")]
    InferenceError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EmbedError>;
