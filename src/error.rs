//! Error types for the chat service.

use thiserror::Error;

/// Errors produced by the chat service and its collaborators.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Device name outside the supported set.
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    /// Model size key outside the supported set.
    #[error("unknown model size: {0}")]
    UnknownModelSize(String),
    /// The inference collaborator failed.
    #[error("inference failed: {0}")]
    Inference(String),
    /// The inference collaborator returned no usable message.
    #[error("inference returned no generated text")]
    EmptyGeneration,
    /// A replacement engine could not be constructed.
    #[error("failed to load model {model}: {reason}")]
    ModelLoad {
        /// Model identifier that failed to load.
        model: String,
        /// Underlying failure.
        reason: String,
    },
    /// HTTP response was not a success.
    #[error("inference server returned status {0}")]
    HttpStatus(u16),
    /// HTTP client error.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Regex error.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed upload.
    #[error("invalid upload: {0}")]
    Upload(String),
}

impl ChatError {
    /// Whether the error was caused by the caller's input rather than the engine.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownDevice(_) | Self::UnknownModelSize(_) | Self::Upload(_)
        )
    }
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
