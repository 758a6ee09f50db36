//! Framed streaming protocol for worker progress channels.
//!
//! A worker multiplexes JSON progress messages and raw binary payloads onto
//! its single outbound byte stream. Each frame is self-delimiting:
//!
//! ```text
//! vfarm_buffer:<typeId>:<payloadLength>:<status>:<payloadBytes>
//! ```
//!
//! The declared payload length is ground truth, so binary payloads that
//! happen to contain the separator byte sequence are never misread as a new
//! frame boundary. Decoding is a pure function of the bytes supplied so far
//! and never blocks.

mod codec;
mod message;

pub use codec::{encode_frame, StreamDecoder, STREAM_SEPARATOR};
pub use message::{
    MessageStatus, PayloadFormat, ProtocolError, ProtocolResult, StreamFrame, StreamingMessage,
};
