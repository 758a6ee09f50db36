//! Coordinator error types.

use thiserror::Error;

use vfarm_invoke::InvokeError;

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The invocation channel failed before a structured reply. Retryable.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// A worker returned a well-formed error reply. Never retried.
    #[error("Worker returned error: {message}")]
    Application {
        message: String,
        stack: Option<String>,
    },

    /// Malformed or unknown streaming frame. Local bug.
    #[error("Protocol error: {0}")]
    Protocol(#[from] vfarm_protocol::ProtocolError),

    /// A chunk reported a render error. Immediately fatal to the render.
    #[error("Chunk {chunk} failed: {message}")]
    ChunkFailure {
        chunk: u32,
        message: String,
        stack: Option<String>,
    },

    /// Chunk output blobs missing past the deadline while siblings finished.
    #[error("Chunks {missing_chunks:?} did not appear within {timeout_ms}ms")]
    Timeout {
        missing_chunks: Vec<u32>,
        timeout_ms: u64,
    },

    #[error("Render was cancelled")]
    Cancelled,

    #[error("Render {0} not found")]
    RenderNotFound(String),

    #[error("Planning error: {0}")]
    Planning(#[from] vfarm_models::PlanningError),

    #[error("Storage error: {0}")]
    Storage(#[from] vfarm_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] vfarm_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<InvokeError> for CoordinatorError {
    fn from(e: InvokeError) -> Self {
        match e {
            InvokeError::Transport(message) => Self::Transport(message),
            InvokeError::Application { message, stack } => Self::Application { message, stack },
            InvokeError::Protocol(e) => Self::Protocol(e),
        }
    }
}

impl CoordinatorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn chunk_failure(chunk: u32, message: impl Into<String>, stack: Option<String>) -> Self {
        Self::ChunkFailure {
            chunk,
            message: message.into(),
            stack,
        }
    }

    /// Only transport failures may be retried; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinatorError::Transport(_))
    }

    /// Stack trace carried by the error, if the worker reported one.
    pub fn stack(&self) -> Option<&str> {
        match self {
            CoordinatorError::Application { stack, .. }
            | CoordinatorError::ChunkFailure { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(CoordinatorError::Transport("reset".into()).is_retryable());
        assert!(!CoordinatorError::Application {
            message: "bad input".into(),
            stack: None
        }
        .is_retryable());
        assert!(!CoordinatorError::chunk_failure(3, "boom", None).is_retryable());
    }

    #[test]
    fn test_timeout_names_missing_chunks() {
        let err = CoordinatorError::Timeout {
            missing_chunks: vec![2],
            timeout_ms: 5_000,
        };
        assert!(err.to_string().contains("[2]"));
    }
}
