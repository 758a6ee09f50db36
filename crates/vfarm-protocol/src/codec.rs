//! Frame encoder and resumable decoder.

use crate::message::{
    ErrorOccurredBody, FramesRenderedBody, MessageStatus, PayloadFormat, ProtocolError,
    ProtocolResult, RenderIdDeterminedBody, StreamFrame, StreamingMessage,
};

/// Separator token opening every frame.
pub const STREAM_SEPARATOR: &[u8] = b"vfarm_buffer:";

const FIELD_DELIMITER: u8 = b':';

/// Encode one message into a self-delimiting frame.
///
/// Deterministic and byte-exact for a given message and status. Binary
/// payloads are embedded verbatim; the length field is the only boundary
/// authority, so payload bytes that look like a separator stay payload.
pub fn encode_frame(message: &StreamingMessage, status: MessageStatus) -> ProtocolResult<Vec<u8>> {
    let body = match message {
        StreamingMessage::FramesRendered { frames } => {
            serde_json::to_vec(&FramesRenderedBody { frames: *frames })?
        }
        StreamingMessage::ErrorOccurred { error, stack } => serde_json::to_vec(&ErrorOccurredBody {
            error: error.clone(),
            stack: stack.clone(),
        })?,
        StreamingMessage::RenderIdDetermined { render_id } => {
            serde_json::to_vec(&RenderIdDeterminedBody {
                render_id: render_id.clone(),
            })?
        }
        StreamingMessage::ChunkRendered(bytes) => bytes.clone(),
    };

    let header = format!(
        "{}:{}:{}:",
        message.type_id(),
        body.len(),
        status.as_wire_digit()
    );

    let mut frame = Vec::with_capacity(STREAM_SEPARATOR.len() + header.len() + body.len());
    frame.extend_from_slice(STREAM_SEPARATOR);
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Resumable frame decoder.
///
/// Fed arbitrarily-chunked buffers via repeated [`StreamDecoder::push`]
/// calls. Incomplete trailing data is buffered; when a declared payload is
/// short, the decoder records exactly how many bytes are still missing and
/// resumes on the next push without loss or duplication.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    missing: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the decoder holds bytes of a not-yet-complete frame.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Payload bytes still required to complete the frame being assembled.
    pub fn missing_bytes(&self) -> usize {
        self.missing
    }

    /// Append bytes and return every frame that is now complete, in order.
    pub fn push(&mut self, data: &[u8]) -> ProtocolResult<Vec<StreamFrame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_decode_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Decode the first complete frame in the buffer, draining its bytes.
    fn try_decode_one(&mut self) -> ProtocolResult<Option<StreamFrame>> {
        let Some(separator_index) = find_subsequence(&self.buffer, STREAM_SEPARATOR) else {
            return Ok(None);
        };

        let header_start = separator_index + STREAM_SEPARATOR.len();
        let mut cursor = header_start;

        let Some(type_field) = read_header_field(&self.buffer, &mut cursor) else {
            return Ok(None);
        };
        let Some(length_field) = read_header_field(&self.buffer, &mut cursor) else {
            return Ok(None);
        };
        let Some(status_field) = read_header_field(&self.buffer, &mut cursor) else {
            return Ok(None);
        };

        let payload_length: usize = length_field
            .parse()
            .map_err(|_| ProtocolError::InvalidHeader(format!("bad length '{}'", length_field)))?;
        let status_value: u32 = status_field
            .parse()
            .map_err(|_| ProtocolError::InvalidHeader(format!("bad status '{}'", status_field)))?;

        let available = self.buffer.len() - cursor;
        if available < payload_length {
            self.missing = payload_length - available;
            return Ok(None);
        }

        let payload = &self.buffer[cursor..cursor + payload_length];
        let message = decode_payload(&type_field, payload)?;
        let frame = StreamFrame {
            status: MessageStatus::from_wire_value(status_value),
            message,
        };

        self.buffer.drain(..cursor + payload_length);
        self.missing = 0;
        Ok(Some(frame))
    }
}

/// Read one colon-delimited ASCII header field. Returns `None` when the
/// delimiter has not arrived yet.
fn read_header_field(buffer: &[u8], cursor: &mut usize) -> Option<String> {
    let start = *cursor;
    let mut index = start;

    while index < buffer.len() {
        if buffer[index] == FIELD_DELIMITER {
            let field = String::from_utf8_lossy(&buffer[start..index]).into_owned();
            *cursor = index + 1;
            return Some(field);
        }
        index += 1;
    }

    None
}

fn decode_payload(type_id: &str, payload: &[u8]) -> ProtocolResult<StreamingMessage> {
    match StreamingMessage::format_for_type_id(type_id)? {
        PayloadFormat::Binary => Ok(StreamingMessage::ChunkRendered(payload.to_vec())),
        PayloadFormat::Json => match type_id {
            "1" => {
                let body: FramesRenderedBody = serde_json::from_slice(payload)?;
                Ok(StreamingMessage::FramesRendered {
                    frames: body.frames,
                })
            }
            "2" => {
                let body: ErrorOccurredBody = serde_json::from_slice(payload)?;
                Ok(StreamingMessage::ErrorOccurred {
                    error: body.error,
                    stack: body.stack,
                })
            }
            "3" => {
                let body: RenderIdDeterminedBody = serde_json::from_slice(payload)?;
                Ok(StreamingMessage::RenderIdDetermined {
                    render_id: body.render_id,
                })
            }
            other => Err(ProtocolError::UnknownMessageType(other.to_string())),
        },
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_messages() -> Vec<StreamingMessage> {
        vec![
            StreamingMessage::FramesRendered { frames: 240 },
            StreamingMessage::ErrorOccurred {
                error: "composition 'intro' not found".to_string(),
                stack: Some("at resolveComposition".to_string()),
            },
            StreamingMessage::RenderIdDetermined {
                render_id: "9f8e7d6c".to_string(),
            },
            StreamingMessage::ChunkRendered(vec![0x00, 0xff, 0x1a, 0x45, 0xdf]),
        ]
    }

    fn decode_in_fragments(encoded: &[u8], fragment_size: usize) -> Vec<StreamFrame> {
        let mut decoder = StreamDecoder::new();
        let mut frames = Vec::new();
        for fragment in encoded.chunks(fragment_size) {
            frames.extend(decoder.push(fragment).unwrap());
        }
        assert!(!decoder.has_pending());
        frames
    }

    #[test]
    fn test_round_trip_all_message_kinds() {
        for message in sample_messages() {
            for status in [MessageStatus::Success, MessageStatus::Error] {
                let encoded = encode_frame(&message, status).unwrap();
                let frames = StreamDecoder::new().push(&encoded).unwrap();
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0].status, status);
                assert_eq!(frames[0].message, message);
            }
        }
    }

    #[test]
    fn test_round_trip_under_fragmentation() {
        let mut encoded = Vec::new();
        for message in sample_messages() {
            encoded.extend(encode_frame(&message, MessageStatus::Success).unwrap());
        }

        for fragment_size in [1, 7, encoded.len()] {
            let frames = decode_in_fragments(&encoded, fragment_size);
            assert_eq!(frames.len(), sample_messages().len());
            for (frame, expected) in frames.iter().zip(sample_messages()) {
                assert_eq!(frame.message, expected);
            }
        }
    }

    #[test]
    fn test_binary_payload_containing_separator() {
        let mut payload = b"leading".to_vec();
        payload.extend_from_slice(STREAM_SEPARATOR);
        payload.extend_from_slice(b"trailing");
        let message = StreamingMessage::ChunkRendered(payload.clone());

        let encoded = encode_frame(&message, MessageStatus::Success).unwrap();

        for fragment_size in [1, 7, encoded.len()] {
            let frames = decode_in_fragments(&encoded, fragment_size);
            assert_eq!(frames.len(), 1);
            assert_eq!(
                frames[0].message,
                StreamingMessage::ChunkRendered(payload.clone())
            );
        }
    }

    #[test]
    fn test_decoder_resumes_truncated_payload() {
        let first = StreamingMessage::ChunkRendered(vec![7u8; 64]);
        let second = StreamingMessage::FramesRendered { frames: 12 };
        let encoded_first = encode_frame(&first, MessageStatus::Success).unwrap();
        let encoded_second = encode_frame(&second, MessageStatus::Success).unwrap();

        // Header plus part of the payload, cut 20 bytes short.
        let cut = encoded_first.len() - 20;
        let mut decoder = StreamDecoder::new();

        let frames = decoder.push(&encoded_first[..cut]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(decoder.missing_bytes(), 20);

        // Remaining payload bytes concatenated with the next full frame.
        let mut rest = encoded_first[cut..].to_vec();
        rest.extend_from_slice(&encoded_second);
        let frames = decoder.push(&rest).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].message, first);
        assert_eq!(frames[1].message, second);
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut encoded = Vec::new();
        encoded.extend(encode_frame(&StreamingMessage::FramesRendered { frames: 1 }, MessageStatus::Success).unwrap());
        encoded.extend(encode_frame(&StreamingMessage::FramesRendered { frames: 2 }, MessageStatus::Success).unwrap());
        encoded.extend(encode_frame(&StreamingMessage::FramesRendered { frames: 3 }, MessageStatus::Success).unwrap());

        let frames = StreamDecoder::new().push(&encoded).unwrap();
        let counts: Vec<u64> = frames
            .iter()
            .map(|f| match f.message {
                StreamingMessage::FramesRendered { frames } => frames,
                _ => panic!("unexpected message"),
            })
            .collect();
        assert_eq!(counts, vec![1, 2, 3]);
    }

    #[test]
    fn test_unknown_type_id_is_fatal() {
        let mut frame = Vec::new();
        frame.extend_from_slice(STREAM_SEPARATOR);
        frame.extend_from_slice(b"9:2:0:{}");

        let err = StreamDecoder::new().push(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(id) if id == "9"));
    }

    #[test]
    fn test_error_status_is_preserved() {
        let message = StreamingMessage::ErrorOccurred {
            error: "render crashed".to_string(),
            stack: None,
        };
        let encoded = encode_frame(&message, MessageStatus::Error).unwrap();
        let frames = StreamDecoder::new().push(&encoded).unwrap();
        assert_eq!(frames[0].status, MessageStatus::Error);
    }

    #[test]
    fn test_encoding_is_byte_exact() {
        let message = StreamingMessage::FramesRendered { frames: 5 };
        let a = encode_frame(&message, MessageStatus::Success).unwrap();
        let b = encode_frame(&message, MessageStatus::Success).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(STREAM_SEPARATOR));
    }
}
