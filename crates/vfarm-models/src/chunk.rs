//! Frame-range chunk planning.
//!
//! The planner is pure and deterministic: the merge step re-derives the
//! expected chunk set from the same inputs instead of trusting a stored list,
//! so identical inputs must always yield the identical partition.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inclusive range of frames rendered by one worker invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct FrameRange {
    /// First frame, inclusive
    pub start: u32,
    /// Last frame, inclusive
    pub end: u32,
}

impl FrameRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn frame_count(&self) -> u32 {
        self.end - self.start + 1
    }
}

impl From<(u32, u32)> for FrameRange {
    fn from((start, end): (u32, u32)) -> Self {
        Self { start, end }
    }
}

impl From<FrameRange> for (u32, u32) {
    fn from(range: FrameRange) -> Self {
        (range.start, range.end)
    }
}

/// A contiguous sub-range of frames with its merge sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Index 0..N-1; determines concatenation order at merge time
    pub index: u32,
    pub frame_range: FrameRange,
}

/// Errors from chunk planning.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanningError {
    #[error("cannot plan chunks for a render with zero frames")]
    EmptyRender,

    #[error("frames per chunk must be at least 1")]
    InvalidChunkSize,
}

/// Partition `total_frames` into `ceil(total_frames / frames_per_chunk)`
/// contiguous, non-overlapping inclusive ranges. The final range is truncated
/// to end at `total_frames - 1`.
pub fn plan_frame_ranges(
    total_frames: u32,
    frames_per_chunk: u32,
) -> Result<Vec<FrameRange>, PlanningError> {
    if total_frames == 0 {
        return Err(PlanningError::EmptyRender);
    }

    if frames_per_chunk == 0 {
        return Err(PlanningError::InvalidChunkSize);
    }

    let chunk_count = total_frames.div_ceil(frames_per_chunk);
    let ranges = (0..chunk_count)
        .map(|i| {
            let start = i * frames_per_chunk;
            let end = (start + frames_per_chunk - 1).min(total_frames - 1);
            FrameRange { start, end }
        })
        .collect();

    Ok(ranges)
}

/// Derive a chunk size from a target worker count.
pub fn frames_per_chunk_from_concurrency(total_frames: u32, concurrency: u32) -> u32 {
    if total_frames == 0 || concurrency == 0 {
        return 1;
    }

    total_frames.div_ceil(concurrency).max(1)
}

/// Plan the full indexed chunk set for a render.
pub fn plan_chunks(
    total_frames: u32,
    frames_per_chunk: u32,
) -> Result<Vec<Chunk>, PlanningError> {
    let ranges = plan_frame_ranges(total_frames, frames_per_chunk)?;
    Ok(ranges
        .into_iter()
        .enumerate()
        .map(|(index, frame_range)| Chunk {
            index: index as u32,
            frame_range,
        })
        .collect())
}
