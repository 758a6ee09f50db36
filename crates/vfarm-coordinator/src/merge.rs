//! Merge/finalizer: turn confirmed chunk blobs into the final artifact.
//!
//! The merge triggers only once a fresh store listing confirms the expected
//! chunk count. In-memory dispatcher state is never trusted: a restarted
//! coordinator resumes purely from the store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use vfarm_media::{concat_segments, ConcatParams, EncodingProgress, FfmpegRunner, MediaResult};
use vfarm_models::{
    estimate_cost, DownloadBehavior, OutputFile, PostRenderData, RenderId, RenderMetadata,
};
use vfarm_storage::{keys, records, ObjectInfo, ObjectStore, PutOptions, SingleFlight};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::governor::find_missing_chunks;

/// Concatenates ordered segment files into one output.
///
/// The production implementation shells out to FFmpeg; tests substitute a
/// byte-appending fake so merge behavior is observable without the binary.
#[async_trait]
pub trait Concatenator: Send + Sync {
    async fn concat(
        &self,
        params: &ConcatParams,
        on_progress: Box<dyn Fn(EncodingProgress) + Send + 'static>,
    ) -> MediaResult<PathBuf>;
}

/// FFmpeg-backed concatenator.
#[derive(Debug, Default, Clone)]
pub struct FfmpegConcatenator {
    runner: FfmpegRunner,
}

impl FfmpegConcatenator {
    pub fn new(runner: FfmpegRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Concatenator for FfmpegConcatenator {
    async fn concat(
        &self,
        params: &ConcatParams,
        on_progress: Box<dyn Fn(EncodingProgress) + Send + 'static>,
    ) -> MediaResult<PathBuf> {
        concat_segments(params, &self.runner, on_progress).await
    }
}

/// Republishes progress only after advancing at least ten percentage points
/// since the last publish.
#[derive(Debug, Default)]
pub(crate) struct ProgressThrottle {
    last_published: f64,
}

impl ProgressThrottle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn advance(&mut self, fraction: f64) -> bool {
        if fraction - self.last_published >= 0.1 {
            self.last_published = fraction;
            true
        } else {
            false
        }
    }
}

/// Block until a store listing shows every expected chunk blob, or the
/// deadline passes. The timeout names exactly the missing chunk indices.
pub async fn wait_for_all_chunks(
    store: &dyn ObjectStore,
    render_id: &RenderId,
    total_chunks: u32,
    timeout: Duration,
    poll_interval: Duration,
) -> CoordinatorResult<Vec<ObjectInfo>> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let mut listed = store.list(&keys::chunk_prefix(render_id)).await?;
        let present: Vec<u32> = listed
            .iter()
            .filter_map(|o| keys::parse_chunk_index(&o.key))
            .collect();

        if present.len() >= total_chunks as usize {
            listed.sort_by_key(|o| keys::parse_chunk_index(&o.key));
            return Ok(listed);
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(CoordinatorError::Timeout {
                missing_chunks: find_missing_chunks(total_chunks, &present),
                timeout_ms: timeout.as_millis() as u64,
            });
        }

        debug!(
            render_id = %render_id,
            "Waiting for chunks: {}/{} present",
            present.len(),
            total_chunks
        );
        tokio::time::sleep(poll_interval).await;
    }
}

/// Parameters for one finalization run.
pub struct MergeParams<'a> {
    pub store: Arc<dyn ObjectStore>,
    pub concatenator: &'a dyn Concatenator,
    pub metadata: &'a RenderMetadata,
    pub download_behavior: DownloadBehavior,
    pub work_dir: PathBuf,
    pub chunk_timeout: Duration,
    pub poll_interval: Duration,
    pub gif_loops: Option<u32>,
}

/// Merge every confirmed chunk blob and finish the render.
///
/// Steps: gate on the listing, fetch chunks in ascending index order,
/// concatenate, upload, aggregate timings and errors, clean up
/// intermediates (kept in verbose mode), write the post-render record, and
/// only then delete the initialized marker. The record-before-marker order
/// keeps a concurrent status reader from ever observing both absent.
pub async fn merge_chunks_and_finish(
    params: MergeParams<'_>,
) -> CoordinatorResult<PostRenderData> {
    let metadata = params.metadata;
    let render_id = &metadata.render_id;

    // 1. Only a fresh listing can trigger the merge.
    wait_for_all_chunks(
        params.store.as_ref(),
        render_id,
        metadata.total_chunks,
        params.chunk_timeout,
        params.poll_interval,
    )
    .await?;

    info!(
        render_id = %render_id,
        "All {} chunks confirmed, merging",
        metadata.total_chunks
    );

    // 2. Fetch chunk blobs into an ordered local file list. Concurrent
    // fetches of the same key share one download.
    let render_dir = params.work_dir.join(render_id.as_str());
    let chunk_dir = render_dir.join("chunks");
    tokio::fs::create_dir_all(&chunk_dir).await?;

    let fetcher: Arc<SingleFlight<PathBuf>> = Arc::new(SingleFlight::new());
    let mut fetches = Vec::with_capacity(metadata.total_chunks as usize);
    for index in 0..metadata.total_chunks {
        let key = keys::chunk_key(render_id, index);
        let local = chunk_dir.join(format!(
            "chunk-{:08}.{}",
            index,
            metadata.codec.file_extension()
        ));
        let store = Arc::clone(&params.store);
        let fetcher = Arc::clone(&fetcher);

        fetches.push(async move {
            let flight_key = key.clone();
            fetcher
                .run(&flight_key, move || async move {
                    store.get_to_file(&key, &local).await?;
                    Ok::<_, CoordinatorError>(local)
                })
                .await
        });
    }
    let segments: Vec<PathBuf> = futures::future::try_join_all(fetches).await?;

    // 3. Concatenate with throttled progress republish.
    let output_local = render_dir.join(format!("out.{}", metadata.codec.file_extension()));
    let encode_started = Utc::now();

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<u64>();
    let publisher = {
        let store = Arc::clone(&params.store);
        let render_id = render_id.clone();
        let total_frames = metadata.total_frames.max(1) as u64;
        tokio::spawn(async move {
            let mut throttle = ProgressThrottle::new();
            while let Some(frames) = progress_rx.recv().await {
                let fraction = frames as f64 / total_frames as f64;
                if throttle.advance(fraction) {
                    if let Err(e) =
                        records::write_encoding_progress(store.as_ref(), &render_id, frames).await
                    {
                        warn!("Could not publish encoding progress: {}", e);
                    }
                }
            }
        })
    };

    let concat_params = ConcatParams {
        segments,
        output: output_local,
        codec: metadata.codec,
        fps: metadata.fps,
        gif_loops: params.gif_loops,
    };
    let outfile = params
        .concatenator
        .concat(
            &concat_params,
            Box::new(move |progress: EncodingProgress| {
                let _ = progress_tx.send(progress.frame);
            }),
        )
        .await?;

    let _ = publisher.await;
    let encode_finished = Utc::now();
    records::write_encoding_progress(
        params.store.as_ref(),
        render_id,
        metadata.total_frames as u64,
    )
    .await?;

    // 4. Upload the merged result under the configured policy.
    let size_bytes = tokio::fs::metadata(&outfile).await?.len();
    let put_options = PutOptions {
        content_type: Some(metadata.codec.content_type().to_string()),
        privacy: metadata.privacy,
        download_behavior: Some(params.download_behavior.clone()),
    };
    params
        .store
        .put_file(&metadata.output_key, &outfile, &put_options)
        .await?;

    // 5. Timing breakdown and structured error explanations.
    let timings = records::read_chunk_timings(params.store.as_ref(), render_id).await?;
    let errors = records::inspect_errors(params.store.as_ref(), render_id).await?;
    let retried = errors.iter().filter(|e| e.will_retry).count() as u32;
    let invocations = metadata.total_chunks + retried;

    // 6. Delete intermediates, skipped entirely in verbose mode.
    let cleanup_started = Utc::now();
    if metadata.verbose {
        info!("Verbose render: keeping intermediate blobs for inspection");
    } else {
        let mut to_delete: Vec<String> = (0..metadata.total_chunks)
            .map(|i| keys::chunk_key(render_id, i))
            .collect();
        to_delete.push(keys::input_props_key(render_id));
        params.store.delete_many(&to_delete).await?;
    }
    let time_to_cleanup_ms =
        (Utc::now() - cleanup_started).num_milliseconds().max(0) as u64;

    let billed_ms: u64 = timings.iter().map(|t| t.duration_ms()).sum();
    let cost = estimate_cost(
        &metadata.region,
        billed_ms,
        metadata.memory_size_mb,
        metadata.disk_size_mb,
        invocations,
    );

    let finished_at = Utc::now();
    let post_render_data = PostRenderData {
        render_id: render_id.clone(),
        output_file: OutputFile {
            key: metadata.output_key.clone(),
            url: None,
            size_bytes,
            last_modified_ms: finished_at.timestamp_millis(),
        },
        cost,
        time_to_finish_ms: (finished_at - metadata.started_at).num_milliseconds().max(0) as u64,
        time_to_encode_ms: (encode_finished - encode_started).num_milliseconds().max(0) as u64,
        time_to_cleanup_ms,
        timings,
        errors,
        started_at: metadata.started_at,
        finished_at,
    };

    // 7. Record first, marker last: a status reader must never see both gone.
    records::write_post_render_data(params.store.as_ref(), &post_render_data).await?;
    records::delete_initialized_marker(params.store.as_ref(), render_id).await?;

    let _ = tokio::fs::remove_dir_all(&render_dir).await;

    info!(
        render_id = %render_id,
        "Render finished: {} bytes at {}",
        size_bytes,
        metadata.output_key
    );
    Ok(post_render_data)
}
