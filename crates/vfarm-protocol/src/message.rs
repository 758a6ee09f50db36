//! Streaming message types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors from encoding or decoding streaming frames.
///
/// These indicate a local programming or version-skew bug, never a transient
/// condition; callers must surface them rather than drop the frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message type id '{0}'")]
    UnknownMessageType(String),

    #[error("malformed frame header: {0}")]
    InvalidHeader(String),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// How a message kind's payload is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    Binary,
}

/// One message multiplexed onto the worker's outbound channel.
///
/// The tag set is closed: every variant has exactly one encode and one decode
/// arm, checked exhaustively at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamingMessage {
    /// Progress: `count` more frames have been rendered.
    FramesRendered { frames: u64 },
    /// A slice of the chunk's encoded output, streamed directly.
    ChunkRendered(Vec<u8>),
    /// The chunk failed; fatal to the render.
    ErrorOccurred {
        error: String,
        stack: Option<String>,
    },
    /// The worker generated a render id because the caller supplied none.
    RenderIdDetermined { render_id: String },
}

impl StreamingMessage {
    /// Wire type id for this message.
    pub fn type_id(&self) -> &'static str {
        match self {
            StreamingMessage::FramesRendered { .. } => "1",
            StreamingMessage::ErrorOccurred { .. } => "2",
            StreamingMessage::RenderIdDetermined { .. } => "3",
            StreamingMessage::ChunkRendered(_) => "4",
        }
    }

    /// Payload encoding for a wire type id.
    pub fn format_for_type_id(type_id: &str) -> ProtocolResult<PayloadFormat> {
        match type_id {
            "1" | "2" | "3" => Ok(PayloadFormat::Json),
            "4" => Ok(PayloadFormat::Binary),
            other => Err(ProtocolError::UnknownMessageType(other.to_string())),
        }
    }
}

/// JSON body of a frames-rendered message.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FramesRenderedBody {
    pub frames: u64,
}

/// JSON body of an error-occurred message.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ErrorOccurredBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// JSON body of a render-id-determined message.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RenderIdDeterminedBody {
    pub render_id: String,
}

/// Delivery status of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Success,
    Error,
}

impl MessageStatus {
    pub fn as_wire_digit(&self) -> &'static str {
        match self {
            MessageStatus::Success => "0",
            MessageStatus::Error => "1",
        }
    }

    pub fn from_wire_value(value: u32) -> Self {
        if value == 1 {
            MessageStatus::Error
        } else {
            MessageStatus::Success
        }
    }
}

/// One decoded frame: the message plus its delivery status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub status: MessageStatus,
    pub message: StreamingMessage,
}
