//! Fan-out dispatcher: one invocation per chunk.
//!
//! All chunk invocations run concurrently under a semaphore cap. Each chunk
//! is an independent failure unit and no ordering is imposed between chunk
//! completions; ordering exists only at merge time, by chunk index.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use vfarm_invoke::{call_function, FunctionInvoker, InvokeOptions};
use vfarm_models::{
    Chunk, ChunkOutcome, ChunkStatus, ChunkTiming, InvocationPayload, RenderJob,
};
use vfarm_protocol::{StreamFrame, StreamingMessage};
use vfarm_storage::{keys, records, ObjectStore, PutOptions};

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::governor::{invoke_with_retry, RetryPolicy};
use crate::progress::ProgressTracker;

/// Final JSON reply of one chunk invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReply {
    pub chunk_index: u32,
    #[serde(default)]
    pub frames_rendered: u64,
    /// Key the worker wrote its output to, when it used the store directly
    /// instead of streaming the bytes back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
}

/// Dispatch every chunk concurrently and wait for all of them.
///
/// Any chunk reporting an error is fatal to the whole render: sibling
/// invocations are aborted best-effort and the chunk's failure is returned.
/// There is no partial-success mode.
pub async fn dispatch_chunks(
    invoker: Arc<dyn FunctionInvoker>,
    store: Arc<dyn ObjectStore>,
    config: &CoordinatorConfig,
    job: &RenderJob,
    chunks: &[Chunk],
    tracker: Arc<ProgressTracker>,
    cancel_rx: watch::Receiver<bool>,
) -> CoordinatorResult<Vec<ChunkOutcome>> {
    let concurrency = job.concurrency.max(1);
    info!(
        render_id = %job.render_id,
        "Dispatching {} chunks with concurrency {}",
        chunks.len(),
        concurrency
    );

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let (abort_tx, abort_rx) = watch::channel(false);
    let abort_tx = Arc::new(abort_tx);

    // Fold the caller's cancellation into the internal abort signal.
    let forwarder = {
        let abort_tx = Arc::clone(&abort_tx);
        let mut cancel_rx = cancel_rx.clone();
        tokio::spawn(async move {
            loop {
                if *cancel_rx.borrow() {
                    let _ = abort_tx.send(true);
                    return;
                }
                if cancel_rx.changed().await.is_err() {
                    return;
                }
            }
        })
    };

    let mut join_set = JoinSet::new();
    for chunk in chunks {
        join_set.spawn(run_chunk(
            Arc::clone(&invoker),
            Arc::clone(&store),
            config.clone(),
            job.clone(),
            *chunk,
            Arc::clone(&tracker),
            abort_rx.clone(),
            Arc::clone(&semaphore),
        ));
    }

    let mut outcomes = Vec::with_capacity(chunks.len());
    let mut fatal: Option<CoordinatorError> = None;

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(outcome)) => outcomes.push(outcome),
            Ok(Err(e)) => {
                // A real failure outranks the cancellations it triggers.
                let outranks = match &fatal {
                    None => true,
                    Some(CoordinatorError::Cancelled) => {
                        !matches!(e, CoordinatorError::Cancelled)
                    }
                    Some(_) => false,
                };
                if outranks {
                    fatal = Some(e);
                }
                let _ = abort_tx.send(true);
            }
            Err(join_err) => {
                fatal.get_or_insert(CoordinatorError::Transport(format!(
                    "dispatch task failed: {}",
                    join_err
                )));
                let _ = abort_tx.send(true);
            }
        }
    }

    forwarder.abort();

    if let Some(e) = fatal {
        return Err(e);
    }

    outcomes.sort_by_key(|o| o.chunk_index);
    Ok(outcomes)
}

/// Execute one chunk invocation, including retries and timing persistence.
#[allow(clippy::too_many_arguments)]
async fn run_chunk(
    invoker: Arc<dyn FunctionInvoker>,
    store: Arc<dyn ObjectStore>,
    config: CoordinatorConfig,
    job: RenderJob,
    chunk: Chunk,
    tracker: Arc<ProgressTracker>,
    abort_rx: watch::Receiver<bool>,
    semaphore: Arc<Semaphore>,
) -> CoordinatorResult<ChunkOutcome> {
    let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|_| CoordinatorError::Cancelled)?;

    if *abort_rx.borrow() {
        return Err(CoordinatorError::Cancelled);
    }

    let chunk_key = keys::chunk_key(&job.render_id, chunk.index);
    let streamed_path = config
        .work_dir
        .join(job.render_id.as_str())
        .join("streams")
        .join(format!("chunk-{:08}.bin", chunk.index));

    let started_at_ms = Utc::now().timestamp_millis();
    let policy = RetryPolicy::new(job.max_retries);

    let reply = invoke_with_retry(&policy, store.as_ref(), &job.render_id, chunk.index, |attempt| {
        run_attempt(
            invoker.as_ref(),
            store.as_ref(),
            &config,
            &job,
            chunk,
            &chunk_key,
            &streamed_path,
            tracker.as_ref(),
            abort_rx.clone(),
            attempt,
        )
    })
    .await?;

    let timing = ChunkTiming {
        chunk: chunk.index,
        started_at_ms,
        rendered_at_ms: Utc::now().timestamp_millis(),
    };
    if let Err(e) = records::write_chunk_timing(store.as_ref(), &job.render_id, &timing).await {
        warn!("Failed to persist timing for chunk {}: {}", chunk.index, e);
    }

    tracker.chunk_done();
    debug!(
        render_id = %job.render_id,
        "Chunk {} done in {}ms ({} frames reported)",
        chunk.index,
        timing.duration_ms(),
        reply.frames_rendered
    );

    Ok(ChunkOutcome {
        chunk_index: chunk.index,
        status: ChunkStatus::Done,
        output_key: Some(reply.output_key.unwrap_or(chunk_key)),
        timing: Some(timing),
        error: None,
    })
}

/// One invocation attempt: stream handling plus upload of directly-streamed
/// chunk bytes.
#[allow(clippy::too_many_arguments)]
async fn run_attempt(
    invoker: &dyn FunctionInvoker,
    store: &dyn ObjectStore,
    config: &CoordinatorConfig,
    job: &RenderJob,
    chunk: Chunk,
    chunk_key: &str,
    streamed_path: &Path,
    tracker: &ProgressTracker,
    abort_rx: watch::Receiver<bool>,
    attempt: u32,
) -> CoordinatorResult<ChunkReply> {
    let payload = InvocationPayload::RenderChunk {
        render_id: Some(job.render_id.clone()),
        chunk_index: chunk.index,
        frame_range: chunk.frame_range,
        serve_url: job.serve_url.clone(),
        composition: job.composition.clone(),
        codec: job.codec,
        output_key: chunk_key.to_string(),
        attempt,
    };

    if let Some(parent) = streamed_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut streamed_file: Option<std::fs::File> = None;
    let mut streamed_bytes: u64 = 0;
    let mut stream_io_error: Option<std::io::Error> = None;
    let mut chunk_error: Option<(String, Option<String>)> = None;
    let mut determined_render_id: Option<String> = None;

    let on_message = |frame: StreamFrame| match frame.message {
        StreamingMessage::FramesRendered { frames } => {
            tracker.add_frames(frames);
        }
        StreamingMessage::ChunkRendered(bytes) => {
            if stream_io_error.is_some() {
                return;
            }
            let result = (|| -> std::io::Result<()> {
                if streamed_file.is_none() {
                    streamed_file = Some(std::fs::File::create(streamed_path)?);
                }
                if let Some(file) = streamed_file.as_mut() {
                    file.write_all(&bytes)?;
                    streamed_bytes += bytes.len() as u64;
                }
                Ok(())
            })();
            if let Err(e) = result {
                stream_io_error = Some(e);
            }
        }
        StreamingMessage::ErrorOccurred { error, stack } => {
            chunk_error = Some((error, stack));
        }
        StreamingMessage::RenderIdDetermined { render_id } => {
            determined_render_id = Some(render_id);
        }
    };

    let options = InvokeOptions {
        timeout: config.invoke_timeout,
    };

    let call = call_function::<ChunkReply, _>(
        invoker,
        &config.function_name,
        &payload,
        options,
        on_message,
    );

    let call_result = {
        let aborted = wait_for_abort(abort_rx);
        tokio::select! {
            _ = aborted => None,
            result = call => Some(result),
        }
    };

    let Some(call_result) = call_result else {
        return Err(CoordinatorError::Cancelled);
    };

    // An explicit chunk error outranks whatever the reply channel did next.
    if let Some((message, stack)) = chunk_error {
        return Err(CoordinatorError::chunk_failure(chunk.index, message, stack));
    }

    if let Some(io_error) = stream_io_error {
        return Err(io_error.into());
    }

    let reply = call_result?;

    if let Some(determined) = determined_render_id {
        if determined != job.render_id.as_str() {
            warn!(
                "Worker for chunk {} reported render id '{}', keeping '{}'",
                chunk.index, determined, job.render_id
            );
        }
    }

    // Chunk bytes streamed over the channel become the chunk's store blob,
    // so the merge step finds every chunk through one listing.
    if streamed_bytes > 0 {
        drop(streamed_file);
        store
            .put_file(
                chunk_key,
                streamed_path,
                &PutOptions::with_content_type(job.codec.content_type()),
            )
            .await?;
        let _ = tokio::fs::remove_file(streamed_path).await;
        debug!(
            "Uploaded {} streamed bytes for chunk {} to {}",
            streamed_bytes, chunk.index, chunk_key
        );
    }

    Ok(reply)
}

/// Resolve once the abort signal fires; never resolves otherwise.
async fn wait_for_abort(mut abort_rx: watch::Receiver<bool>) {
    loop {
        if *abort_rx.borrow() {
            return;
        }
        if abort_rx.changed().await.is_err() {
            // Sender dropped without aborting.
            std::future::pending::<()>().await;
        }
    }
}
