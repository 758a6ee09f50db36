//! Render job definitions and persisted render records.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::chunk::FrameRange;
use crate::cost::CostEstimate;

/// Unique identifier for a render. Used as the object-store key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderId(pub String);

impl RenderId {
    /// Generate a new random render ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RenderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output codec for the merged artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Codec {
    #[default]
    H264,
    H265,
    Vp8,
    Vp9,
    Gif,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::H265 => "h265",
            Codec::Vp8 => "vp8",
            Codec::Vp9 => "vp9",
            Codec::Gif => "gif",
        }
    }

    /// Container extension for the merged output file.
    pub fn file_extension(&self) -> &'static str {
        match self {
            Codec::H264 | Codec::H265 => "mp4",
            Codec::Vp8 | Codec::Vp9 => "webm",
            Codec::Gif => "gif",
        }
    }

    /// MIME type for the merged output upload.
    pub fn content_type(&self) -> &'static str {
        match self {
            Codec::H264 | Codec::H265 => "video/mp4",
            Codec::Vp8 | Codec::Vp9 => "video/webm",
            Codec::Gif => "image/gif",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Access level for the final output object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Public,
    #[default]
    Private,
}

/// Content-Disposition policy for the final output object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DownloadBehavior {
    /// Serve inline.
    #[default]
    PlayInBrowser,
    /// Serve as an attachment, optionally with a suggested file name.
    #[serde(rename_all = "camelCase")]
    Download { file_name: Option<String> },
}

/// Metadata of the composition being rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionMetadata {
    /// Composition identifier within the served bundle
    pub id: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frames per second
    pub fps: f64,
    /// Total number of frames
    pub duration_in_frames: u32,
}

#[derive(Debug, Error)]
#[error("invalid serve URL '{url}': {reason}")]
pub struct InvalidServeUrl {
    pub url: String,
    pub reason: String,
}

/// Validate that a serve URL is an absolute http(s) URL.
pub fn validate_serve_url(serve_url: &str) -> Result<(), InvalidServeUrl> {
    let parsed = url::Url::parse(serve_url).map_err(|e| InvalidServeUrl {
        url: serve_url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(InvalidServeUrl {
            url: serve_url.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// A render job. Immutable after chunk planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    /// Unique render ID
    pub render_id: RenderId,
    /// URL the worker loads the composition bundle from
    pub serve_url: String,
    /// Composition metadata
    pub composition: CompositionMetadata,
    /// Output codec
    pub codec: Codec,
    /// Frames per chunk
    pub frames_per_chunk: u32,
    /// Maximum concurrent worker invocations
    pub concurrency: usize,
    /// Object-store key for the merged output
    pub output_key: String,
    /// Serialized input props handed to the composition; persisted to the
    /// store so workers fetch them by key instead of per-invocation copies
    #[serde(default)]
    pub input_props: serde_json::Value,
    /// Access level of the merged output
    #[serde(default)]
    pub privacy: Privacy,
    /// Content-Disposition policy of the merged output
    #[serde(default)]
    pub download_behavior: DownloadBehavior,
    /// GIF loop count (0 = forever); only meaningful for the GIF codec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gif_loops: Option<u32>,
    /// Keep intermediate artifacts for postmortem inspection
    #[serde(default)]
    pub verbose: bool,
    /// Maximum invocation attempts per chunk
    pub max_retries: u32,
    /// Deadline for every chunk blob to appear, in milliseconds
    pub chunk_timeout_ms: u64,
}

impl RenderJob {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }
}

/// Execution state of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl ChunkStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkStatus::Done | ChunkStatus::Failed)
    }
}

/// Wall-clock timing of one chunk invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkTiming {
    /// Chunk index
    pub chunk: u32,
    /// Invocation start, milliseconds since epoch
    pub started_at_ms: i64,
    /// Chunk output confirmed, milliseconds since epoch
    pub rendered_at_ms: i64,
}

impl ChunkTiming {
    pub fn duration_ms(&self) -> u64 {
        self.rendered_at_ms.saturating_sub(self.started_at_ms).max(0) as u64
    }
}

/// Outcome of one chunk, owned by the dispatcher handling that chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOutcome {
    pub chunk_index: u32,
    pub status: ChunkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<ChunkTiming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkOutcome {
    pub fn pending(chunk_index: u32) -> Self {
        Self {
            chunk_index,
            status: ChunkStatus::Pending,
            output_key: None,
            timing: None,
            error: None,
        }
    }
}

/// Persisted render record. Single source of truth for "what is this render";
/// written before any chunk is dispatched and read by every later stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderMetadata {
    pub render_id: RenderId,
    pub started_at: DateTime<Utc>,
    pub total_chunks: u32,
    pub total_frames: u32,
    pub fps: f64,
    pub codec: Codec,
    pub composition_id: String,
    pub output_key: String,
    pub privacy: Privacy,
    pub frames_per_chunk: u32,
    pub memory_size_mb: u32,
    pub disk_size_mb: u32,
    pub region: String,
    #[serde(default)]
    pub verbose: bool,
}

/// A recorded failure, persisted per attempt and aggregated post-render.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Chunk index, or `None` for render-level failures
    pub chunk: Option<u32>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub is_fatal: bool,
    pub attempt: u32,
    pub total_attempts: u32,
    pub will_retry: bool,
}

/// The merged output object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFile {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub size_bytes: u64,
    pub last_modified_ms: i64,
}

/// Final render record. Written exactly once on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRenderData {
    pub render_id: RenderId,
    pub output_file: OutputFile,
    pub cost: CostEstimate,
    pub time_to_finish_ms: u64,
    pub time_to_encode_ms: u64,
    pub time_to_cleanup_ms: u64,
    pub timings: Vec<ChunkTiming>,
    pub errors: Vec<ErrorInfo>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Result of the read-only status query, derived purely from store contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStatus {
    pub render_id: RenderId,
    /// 0.0 to 1.0
    pub overall_progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_so_far: Option<CostEstimate>,
    pub chunks_done: u32,
    pub chunks_total: u32,
    pub frames_rendered: u64,
    pub errors: Vec<ErrorInfo>,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputFile>,
}

/// Payload sent from the coordinator to a worker invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InvocationPayload {
    /// Render one chunk of the composition.
    #[serde(rename_all = "camelCase")]
    RenderChunk {
        /// Render ID; `None` lets the worker generate one and report it
        /// back via a render-id-determined message.
        #[serde(skip_serializing_if = "Option::is_none")]
        render_id: Option<RenderId>,
        chunk_index: u32,
        frame_range: FrameRange,
        serve_url: String,
        composition: CompositionMetadata,
        codec: Codec,
        /// Store key the worker writes its chunk output to
        output_key: String,
        attempt: u32,
    },
    /// Query the progress of a render.
    #[serde(rename_all = "camelCase")]
    Status { render_id: RenderId },
}
