//! End-to-end render orchestration.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use vfarm_invoke::FunctionInvoker;
use vfarm_models::{plan_chunks, validate_serve_url, PostRenderData, RenderJob, RenderMetadata};
use vfarm_storage::{keys, records, ObjectStore};

use crate::config::CoordinatorConfig;
use crate::dispatch::dispatch_chunks;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::merge::{merge_chunks_and_finish, Concatenator, MergeParams};
use crate::progress::ProgressTracker;

/// External collaborators of one render.
pub struct RenderDeps {
    pub invoker: Arc<dyn FunctionInvoker>,
    pub store: Arc<dyn ObjectStore>,
    pub concatenator: Arc<dyn Concatenator>,
}

/// Execute a render end to end: plan chunks, persist the render records,
/// fan out one invocation per chunk, then merge from store state.
///
/// Cancellation stops waiting on outstanding dispatch results, aborts
/// in-flight invocations best-effort, and never merges a partial chunk set.
pub async fn execute_render(
    deps: &RenderDeps,
    config: &CoordinatorConfig,
    job: &RenderJob,
    cancel_rx: watch::Receiver<bool>,
) -> CoordinatorResult<PostRenderData> {
    validate_serve_url(&job.serve_url).map_err(|e| CoordinatorError::config(e.to_string()))?;

    let chunks = plan_chunks(job.composition.duration_in_frames, job.frames_per_chunk)?;
    info!(
        render_id = %job.render_id,
        "Starting render: {} frames in {} chunks",
        job.composition.duration_in_frames,
        chunks.len()
    );

    let metadata = RenderMetadata {
        render_id: job.render_id.clone(),
        started_at: Utc::now(),
        total_chunks: chunks.len() as u32,
        total_frames: job.composition.duration_in_frames,
        fps: job.composition.fps,
        codec: job.codec,
        composition_id: job.composition.id.clone(),
        output_key: job.output_key.clone(),
        privacy: job.privacy,
        frames_per_chunk: job.frames_per_chunk,
        memory_size_mb: config.memory_size_mb,
        disk_size_mb: config.disk_size_mb,
        region: config.region.clone(),
        verbose: job.verbose,
    };
    records::write_render_metadata(deps.store.as_ref(), &metadata).await?;
    if !job.input_props.is_null() {
        records::write_input_props(deps.store.as_ref(), &job.render_id, &job.input_props).await?;
    }
    records::write_initialized_marker(deps.store.as_ref(), &job.render_id).await?;

    let tracker = Arc::new(ProgressTracker::new());
    let dispatched = dispatch_chunks(
        Arc::clone(&deps.invoker),
        Arc::clone(&deps.store),
        config,
        job,
        &chunks,
        Arc::clone(&tracker),
        cancel_rx.clone(),
    )
    .await;

    if let Err(e) = dispatched {
        error!(render_id = %job.render_id, "Render aborted during dispatch: {}", e);
        abort_cleanup(deps.store.as_ref(), &metadata).await;
        return Err(e);
    }

    if *cancel_rx.borrow() {
        abort_cleanup(deps.store.as_ref(), &metadata).await;
        return Err(CoordinatorError::Cancelled);
    }

    merge_chunks_and_finish(MergeParams {
        store: Arc::clone(&deps.store),
        concatenator: deps.concatenator.as_ref(),
        metadata: &metadata,
        download_behavior: job.download_behavior.clone(),
        work_dir: config.work_dir.clone(),
        chunk_timeout: job.chunk_timeout(),
        poll_interval: config.poll_interval,
        gif_loops: job.gif_loops,
    })
    .await
}

/// Remove intermediate blobs after an aborted render. Error reports and the
/// render records stay for postmortem inspection; everything stays in
/// verbose mode.
async fn abort_cleanup(store: &dyn ObjectStore, metadata: &RenderMetadata) {
    if metadata.verbose {
        info!(
            render_id = %metadata.render_id,
            "Verbose render: keeping intermediate blobs after abort"
        );
        return;
    }

    let mut to_delete: Vec<String> = (0..metadata.total_chunks)
        .map(|i| keys::chunk_key(&metadata.render_id, i))
        .collect();
    to_delete.push(keys::input_props_key(&metadata.render_id));

    if let Err(e) = store.delete_many(&to_delete).await {
        warn!(
            render_id = %metadata.render_id,
            "Abort cleanup failed: {}",
            e
        );
    }
}
