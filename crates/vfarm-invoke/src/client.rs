//! Single-invocation call with response demultiplexing.

use std::time::Duration;

use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use vfarm_models::InvocationPayload;
use vfarm_protocol::{StreamDecoder, StreamFrame, STREAM_SEPARATOR};

use crate::error::{InvokeError, InvokeResult};
use crate::invoker::FunctionInvoker;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Caller-side deadline for the whole call, independent of the
    /// platform's own invocation timeout. Used for deterministic tests.
    pub timeout: Option<Duration>,
}

/// A well-formed error reply embedded in the final JSON response.
#[derive(Debug, Deserialize)]
struct ErrorReply {
    #[serde(rename = "type")]
    kind: String,
    message: String,
    #[serde(default)]
    stack: Option<String>,
}

/// Call a named remote function once.
///
/// Every fragment of the live response is classified: fragments that open a
/// streaming frame (or continue one mid-assembly) feed the frame decoder and
/// each completed frame is forwarded to `on_message`; all other fragments
/// accumulate into the final JSON reply, parsed on stream completion.
pub async fn call_function<T, F>(
    invoker: &dyn FunctionInvoker,
    function_name: &str,
    payload: &InvocationPayload,
    options: InvokeOptions,
    on_message: F,
) -> InvokeResult<T>
where
    T: DeserializeOwned,
    F: FnMut(StreamFrame),
{
    let call = run_call(invoker, function_name, payload, on_message);

    match options.timeout {
        Some(timeout) => tokio::time::timeout(timeout, call).await.map_err(|_| {
            InvokeError::transport(format!(
                "invocation of {} timed out after {}ms",
                function_name,
                timeout.as_millis()
            ))
        })?,
        None => call.await,
    }
}

async fn run_call<T, F>(
    invoker: &dyn FunctionInvoker,
    function_name: &str,
    payload: &InvocationPayload,
    mut on_message: F,
) -> InvokeResult<T>
where
    T: DeserializeOwned,
    F: FnMut(StreamFrame),
{
    let payload_json = serde_json::to_value(payload)
        .map_err(|e| InvokeError::transport(format!("failed to serialize payload: {}", e)))?;

    let mut fragments = invoker.invoke(function_name, payload_json).await?;

    let mut decoder = StreamDecoder::new();
    let mut response_buffer: Vec<u8> = Vec::new();

    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;

        if decoder.has_pending() || fragment.starts_with(STREAM_SEPARATOR) {
            for frame in decoder.push(&fragment)? {
                on_message(frame);
            }
        } else {
            response_buffer.extend_from_slice(&fragment);
        }
    }

    if decoder.has_pending() {
        warn!(
            "{} closed its stream mid-frame ({} payload bytes missing)",
            function_name,
            decoder.missing_bytes()
        );
    }

    debug!(
        "{} completed, {} byte response",
        function_name,
        response_buffer.len()
    );

    parse_reply(function_name, &response_buffer)
}

fn parse_reply<T: DeserializeOwned>(function_name: &str, buffer: &[u8]) -> InvokeResult<T> {
    if let Ok(reply) = serde_json::from_slice::<ErrorReply>(buffer) {
        if reply.kind == "error" {
            return Err(InvokeError::Application {
                message: reply.message,
                stack: reply.stack,
            });
        }
    }

    serde_json::from_slice(buffer).map_err(|e| {
        InvokeError::transport(format!(
            "{} closed without a structured reply: {}",
            function_name, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::FragmentStream;

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde::Deserialize;

    use vfarm_models::{CompositionMetadata, FrameRange, RenderId};
    use vfarm_protocol::{encode_frame, MessageStatus, StreamingMessage};

    #[derive(Debug, Deserialize, PartialEq)]
    struct ChunkReply {
        chunk: u32,
        ok: bool,
    }

    fn render_chunk_payload() -> InvocationPayload {
        InvocationPayload::RenderChunk {
            render_id: Some(RenderId::from_string("r1")),
            chunk_index: 0,
            frame_range: FrameRange::new(0, 19),
            serve_url: "https://example.com/site".to_string(),
            composition: CompositionMetadata {
                id: "main".to_string(),
                width: 1280,
                height: 720,
                fps: 30.0,
                duration_in_frames: 100,
            },
            codec: vfarm_models::Codec::H264,
            output_key: "renders/r1/chunks/chunk:00000000".to_string(),
            attempt: 1,
        }
    }

    /// Invoker that replays a fixed fragment script.
    struct ScriptedInvoker {
        fragments: Vec<InvokeResult<Bytes>>,
    }

    impl ScriptedInvoker {
        fn new(fragments: Vec<InvokeResult<Bytes>>) -> Self {
            Self { fragments }
        }
    }

    #[async_trait]
    impl FunctionInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            _function_name: &str,
            _payload: serde_json::Value,
        ) -> InvokeResult<FragmentStream> {
            let fragments: Vec<_> = self
                .fragments
                .iter()
                .map(|f| match f {
                    Ok(b) => Ok(b.clone()),
                    Err(_) => Err(InvokeError::transport("connection reset")),
                })
                .collect();
            Ok(Box::pin(futures::stream::iter(fragments)))
        }
    }

    fn frame_bytes(message: StreamingMessage) -> Bytes {
        Bytes::from(encode_frame(&message, MessageStatus::Success).unwrap())
    }

    #[tokio::test]
    async fn test_demultiplexes_frames_from_final_reply() {
        let invoker = ScriptedInvoker::new(vec![
            Ok(frame_bytes(StreamingMessage::FramesRendered { frames: 10 })),
            Ok(Bytes::from_static(b"{\"chunk\":0,")),
            Ok(frame_bytes(StreamingMessage::FramesRendered { frames: 20 })),
            Ok(Bytes::from_static(b"\"ok\":true}")),
        ]);

        let mut seen = Vec::new();
        let reply: ChunkReply = call_function(
            &invoker,
            "render-chunk",
            &render_chunk_payload(),
            InvokeOptions::default(),
            |frame| seen.push(frame.message),
        )
        .await
        .unwrap();

        assert_eq!(reply, ChunkReply { chunk: 0, ok: true });
        assert_eq!(
            seen,
            vec![
                StreamingMessage::FramesRendered { frames: 10 },
                StreamingMessage::FramesRendered { frames: 20 },
            ]
        );
    }

    #[tokio::test]
    async fn test_frame_split_across_fragments() {
        let payload = vec![0xab; 256];
        let encoded = encode_frame(
            &StreamingMessage::ChunkRendered(payload.clone()),
            MessageStatus::Success,
        )
        .unwrap();
        let (head, tail) = encoded.split_at(40);

        // The tail does not start with the separator; mid-frame routing must
        // still deliver it to the decoder.
        let invoker = ScriptedInvoker::new(vec![
            Ok(Bytes::copy_from_slice(head)),
            Ok(Bytes::copy_from_slice(tail)),
            Ok(Bytes::from_static(b"{\"chunk\":3,\"ok\":true}")),
        ]);

        let mut seen = Vec::new();
        let reply: ChunkReply = call_function(
            &invoker,
            "render-chunk",
            &render_chunk_payload(),
            InvokeOptions::default(),
            |frame| seen.push(frame.message),
        )
        .await
        .unwrap();

        assert_eq!(reply.chunk, 3);
        assert_eq!(seen, vec![StreamingMessage::ChunkRendered(payload)]);
    }

    #[tokio::test]
    async fn test_embedded_error_reply_is_application_error() {
        let invoker = ScriptedInvoker::new(vec![Ok(Bytes::from_static(
            b"{\"type\":\"error\",\"message\":\"unknown composition\",\"stack\":\"at main\"}",
        ))]);

        let result: InvokeResult<ChunkReply> = call_function(
            &invoker,
            "render-chunk",
            &render_chunk_payload(),
            InvokeOptions::default(),
            |_| {},
        )
        .await;

        match result.unwrap_err() {
            InvokeError::Application { message, stack } => {
                assert_eq!(message, "unknown composition");
                assert_eq!(stack.as_deref(), Some("at main"));
            }
            other => panic!("expected application error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_stream_is_transport_error() {
        let invoker = ScriptedInvoker::new(vec![Ok(Bytes::from_static(b"{\"chunk\":0,"))]);

        let result: InvokeResult<ChunkReply> = call_function(
            &invoker,
            "render-chunk",
            &render_chunk_payload(),
            InvokeOptions::default(),
            |_| {},
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, InvokeError::Transport(_)));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_is_transport_error() {
        let invoker = ScriptedInvoker::new(vec![
            Ok(frame_bytes(StreamingMessage::FramesRendered { frames: 5 })),
            Err(InvokeError::transport("connection reset")),
        ]);

        let result: InvokeResult<ChunkReply> = call_function(
            &invoker,
            "render-chunk",
            &render_chunk_payload(),
            InvokeOptions::default(),
            |_| {},
        )
        .await;

        assert!(matches!(result.unwrap_err(), InvokeError::Transport(_)));
    }

    #[tokio::test]
    async fn test_timeout_override() {
        struct StalledInvoker;

        #[async_trait]
        impl FunctionInvoker for StalledInvoker {
            async fn invoke(
                &self,
                _function_name: &str,
                _payload: serde_json::Value,
            ) -> InvokeResult<FragmentStream> {
                Ok(Box::pin(futures::stream::pending()))
            }
        }

        let result: InvokeResult<ChunkReply> = call_function(
            &StalledInvoker,
            "render-chunk",
            &render_chunk_payload(),
            InvokeOptions {
                timeout: Some(Duration::from_millis(50)),
            },
            |_| {},
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_application_error_is_not_retryable() {
        let err = InvokeError::application("bad input", None);
        assert!(!err.is_retryable());
    }

    mod http {
        use super::*;
        use crate::invoker::HttpInvoker;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test]
        async fn test_http_invoker_round_trip() {
            let server = MockServer::start().await;

            let mut body = Vec::new();
            body.extend(
                encode_frame(
                    &StreamingMessage::FramesRendered { frames: 42 },
                    MessageStatus::Success,
                )
                .unwrap(),
            );
            body.extend_from_slice(b"{\"chunk\":1,\"ok\":true}");

            Mock::given(method("POST"))
                .and(path("/invoke/render-chunk"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
                .mount(&server)
                .await;

            let invoker = HttpInvoker::new(server.uri());
            let mut seen = Vec::new();
            let reply: ChunkReply = call_function(
                &invoker,
                "render-chunk",
                &render_chunk_payload(),
                InvokeOptions::default(),
                |frame| seen.push(frame.message),
            )
            .await
            .unwrap();

            assert_eq!(reply, ChunkReply { chunk: 1, ok: true });
            assert_eq!(seen, vec![StreamingMessage::FramesRendered { frames: 42 }]);
        }

        #[tokio::test]
        async fn test_http_invoker_server_error_is_transport() {
            let server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/invoke/render-chunk"))
                .respond_with(ResponseTemplate::new(502))
                .mount(&server)
                .await;

            let invoker = HttpInvoker::new(server.uri());
            let result: InvokeResult<ChunkReply> = call_function(
                &invoker,
                "render-chunk",
                &render_chunk_payload(),
                InvokeOptions::default(),
                |_| {},
            )
            .await;

            assert!(matches!(result.unwrap_err(), InvokeError::Transport(_)));
        }
    }
}
