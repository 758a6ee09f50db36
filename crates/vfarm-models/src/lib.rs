//! Shared data models for the VFarm render pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Render jobs, chunk outcomes and persisted render records
//! - Frame-range chunk planning
//! - Worker invocation payloads
//! - Cost estimation from execution timings

pub mod chunk;
pub mod cost;
pub mod render;

// Re-export common types
pub use chunk::{
    frames_per_chunk_from_concurrency, plan_chunks, plan_frame_ranges, Chunk, FrameRange,
    PlanningError,
};
pub use cost::{accrued_so_far, estimate_cost, estimated_billing_duration_ms, CostEstimate};
pub use render::{
    validate_serve_url, ChunkOutcome, ChunkStatus, ChunkTiming, Codec, CompositionMetadata,
    DownloadBehavior, ErrorInfo, InvocationPayload, OutputFile, PostRenderData, Privacy,
    RenderId, RenderJob, RenderMetadata, RenderStatus,
};
