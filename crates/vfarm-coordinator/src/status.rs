//! Read-only render status query.
//!
//! Derived purely from store contents, never from coordinator memory, so it
//! is safe to call concurrently with an in-progress render and from a
//! process that did not start the render.

use chrono::{DateTime, Utc};

use vfarm_models::{accrued_so_far, RenderId, RenderStatus};
use vfarm_storage::{keys, records, ObjectStore};

use crate::error::{CoordinatorError, CoordinatorResult};

/// Weight of the chunk-render phase in overall progress; the remainder is
/// the encoding phase.
const RENDER_PHASE_WEIGHT: f64 = 0.85;

/// Query the progress of a render.
pub async fn render_status(
    store: &dyn ObjectStore,
    render_id: &RenderId,
    now: DateTime<Utc>,
) -> CoordinatorResult<RenderStatus> {
    // A finished render is fully described by its post-render record.
    if let Some(post) = records::read_post_render_data(store, render_id).await? {
        let total_frames = records::read_render_metadata(store, render_id)
            .await?
            .map(|m| m.total_frames as u64)
            .unwrap_or(0);

        return Ok(RenderStatus {
            render_id: render_id.clone(),
            overall_progress: 1.0,
            cost_so_far: Some(post.cost.clone()),
            chunks_done: post.timings.len() as u32,
            chunks_total: post.timings.len() as u32,
            frames_rendered: total_frames,
            errors: post.errors.clone(),
            done: true,
            output: Some(post.output_file.clone()),
        });
    }

    let Some(metadata) = records::read_render_metadata(store, render_id).await? else {
        return Err(CoordinatorError::RenderNotFound(render_id.to_string()));
    };

    let listed = store.list(&keys::chunk_prefix(render_id)).await?;
    let chunks_done = listed
        .iter()
        .filter_map(|o| keys::parse_chunk_index(&o.key))
        .count() as u32;

    let timings = records::read_chunk_timings(store, render_id).await?;
    let errors = records::inspect_errors(store, render_id).await?;
    let frames_encoded = records::read_encoding_progress(store, render_id)
        .await?
        .unwrap_or(0);

    let total_chunks = metadata.total_chunks.max(1);
    let total_frames = metadata.total_frames.max(1) as u64;

    let render_fraction = chunks_done as f64 / total_chunks as f64;
    let encoding_fraction = (frames_encoded as f64 / total_frames as f64).min(1.0);
    let overall_progress =
        render_fraction * RENDER_PHASE_WEIGHT + encoding_fraction * (1.0 - RENDER_PHASE_WEIGHT);

    // Frame progress derived from confirmed chunk blobs alone.
    let frames_rendered =
        (chunks_done as u64 * metadata.frames_per_chunk as u64).min(total_frames);

    let cost_so_far = accrued_so_far(&metadata, &timings, metadata.total_chunks, now);

    Ok(RenderStatus {
        render_id: render_id.clone(),
        overall_progress,
        cost_so_far: Some(cost_so_far),
        chunks_done,
        chunks_total: metadata.total_chunks,
        frames_rendered,
        errors,
        done: false,
        output: None,
    })
}
