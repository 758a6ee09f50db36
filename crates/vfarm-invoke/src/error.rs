//! Invocation error taxonomy.

use thiserror::Error;

use vfarm_protocol::ProtocolError;

/// Result type for invocation operations.
pub type InvokeResult<T> = Result<T, InvokeError>;

/// Errors from a single remote function invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The channel failed before a structured reply arrived. Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// The function returned a well-formed error reply. Never retried.
    #[error("function returned error: {message}")]
    Application {
        message: String,
        stack: Option<String>,
    },

    /// A malformed or unknown streaming frame. Local bug, never retried.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl InvokeError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn application(message: impl Into<String>, stack: Option<String>) -> Self {
        Self::Application {
            message: message.into(),
            stack,
        }
    }

    /// Only transport failures may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InvokeError::Transport(_))
    }
}
