//! Persisted render records over any [`ObjectStore`].

use tracing::debug;

use vfarm_models::{ChunkTiming, ErrorInfo, PostRenderData, RenderId, RenderMetadata};

use crate::error::{StorageError, StorageResult};
use crate::keys;
use crate::store::{ObjectStore, PutOptions};

/// Write the render metadata record. Done once, before any chunk dispatch.
pub async fn write_render_metadata(
    store: &dyn ObjectStore,
    metadata: &RenderMetadata,
) -> StorageResult<()> {
    let key = keys::render_metadata_key(&metadata.render_id);
    let body = serde_json::to_vec(metadata)?;
    store.put(&key, body, &PutOptions::json()).await
}

/// Read the render metadata record, or `None` if the render is unknown.
pub async fn read_render_metadata(
    store: &dyn ObjectStore,
    render_id: &RenderId,
) -> StorageResult<Option<RenderMetadata>> {
    match store.get(&keys::render_metadata_key(render_id)).await {
        Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write the "render initialized" marker blob.
pub async fn write_initialized_marker(
    store: &dyn ObjectStore,
    render_id: &RenderId,
) -> StorageResult<()> {
    let key = keys::initialized_marker_key(render_id);
    store
        .put(&key, render_id.as_str().as_bytes().to_vec(), &PutOptions::default())
        .await
}

/// Delete the initialized marker. Must happen strictly after the post-render
/// record is written so a status reader never observes both absent.
pub async fn delete_initialized_marker(
    store: &dyn ObjectStore,
    render_id: &RenderId,
) -> StorageResult<()> {
    store
        .delete_many(&[keys::initialized_marker_key(render_id)])
        .await?;
    Ok(())
}

pub async fn is_initialized(store: &dyn ObjectStore, render_id: &RenderId) -> StorageResult<bool> {
    store.exists(&keys::initialized_marker_key(render_id)).await
}

/// Publish the encoding progress counter (frames encoded so far).
pub async fn write_encoding_progress(
    store: &dyn ObjectStore,
    render_id: &RenderId,
    frames_encoded: u64,
) -> StorageResult<()> {
    let key = keys::encoding_progress_key(render_id);
    debug!("Publishing encoding progress: {} frames", frames_encoded);
    store
        .put(&key, frames_encoded.to_string().into_bytes(), &PutOptions::default())
        .await
}

/// Read the encoding progress counter, if published yet.
pub async fn read_encoding_progress(
    store: &dyn ObjectStore,
    render_id: &RenderId,
) -> StorageResult<Option<u64>> {
    match store.get(&keys::encoding_progress_key(render_id)).await {
        Ok(body) => {
            let text = String::from_utf8_lossy(&body);
            text.trim()
                .parse()
                .map(Some)
                .map_err(|_| StorageError::InvalidKey(format!("bad progress counter '{}'", text)))
        }
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Persist one chunk's timing.
pub async fn write_chunk_timing(
    store: &dyn ObjectStore,
    render_id: &RenderId,
    timing: &ChunkTiming,
) -> StorageResult<()> {
    let key = keys::chunk_timing_key(render_id, timing.chunk);
    let body = serde_json::to_vec(timing)?;
    store.put(&key, body, &PutOptions::json()).await
}

/// Read every persisted chunk timing, sorted by chunk index.
pub async fn read_chunk_timings(
    store: &dyn ObjectStore,
    render_id: &RenderId,
) -> StorageResult<Vec<ChunkTiming>> {
    let listed = store.list(&keys::timing_prefix(render_id)).await?;

    let mut timings = Vec::with_capacity(listed.len());
    for object in listed {
        let body = store.get(&object.key).await?;
        timings.push(serde_json::from_slice::<ChunkTiming>(&body)?);
    }

    timings.sort_by_key(|t| t.chunk);
    Ok(timings)
}

/// Persist one error report.
pub async fn write_error_report(
    store: &dyn ObjectStore,
    render_id: &RenderId,
    error: &ErrorInfo,
) -> StorageResult<()> {
    let key = keys::error_report_key(render_id, error.chunk, error.attempt);
    let body = serde_json::to_vec(error)?;
    store.put(&key, body, &PutOptions::json()).await
}

/// Aggregate every recorded error report into a structured explanation,
/// sorted by chunk then attempt.
pub async fn inspect_errors(
    store: &dyn ObjectStore,
    render_id: &RenderId,
) -> StorageResult<Vec<ErrorInfo>> {
    let listed = store.list(&keys::error_prefix(render_id)).await?;

    let mut errors = Vec::with_capacity(listed.len());
    for object in listed {
        let body = store.get(&object.key).await?;
        errors.push(serde_json::from_slice::<ErrorInfo>(&body)?);
    }

    errors.sort_by_key(|e| (e.chunk, e.attempt));
    Ok(errors)
}

/// Persist the serialized input props for workers to fetch by key.
pub async fn write_input_props(
    store: &dyn ObjectStore,
    render_id: &RenderId,
    props: &serde_json::Value,
) -> StorageResult<()> {
    let key = keys::input_props_key(render_id);
    let body = serde_json::to_vec(props)?;
    store.put(&key, body, &PutOptions::json()).await
}

/// Read the serialized input props, if any were persisted.
pub async fn read_input_props(
    store: &dyn ObjectStore,
    render_id: &RenderId,
) -> StorageResult<Option<serde_json::Value>> {
    match store.get(&keys::input_props_key(render_id)).await {
        Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write the final post-render record. Written exactly once on success.
pub async fn write_post_render_data(
    store: &dyn ObjectStore,
    data: &PostRenderData,
) -> StorageResult<()> {
    let key = keys::post_render_data_key(&data.render_id);
    let body = serde_json::to_vec(data)?;
    store.put(&key, body, &PutOptions::json()).await
}

/// Read the final post-render record, if the render has finished.
pub async fn read_post_render_data(
    store: &dyn ObjectStore,
    render_id: &RenderId,
) -> StorageResult<Option<PostRenderData>> {
    match store.get(&keys::post_render_data_key(render_id)).await {
        Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::Utc;
    use vfarm_models::{Codec, Privacy};

    fn metadata(render_id: &RenderId) -> RenderMetadata {
        RenderMetadata {
            render_id: render_id.clone(),
            started_at: Utc::now(),
            total_chunks: 3,
            total_frames: 60,
            fps: 30.0,
            codec: Codec::H264,
            composition_id: "main".to_string(),
            output_key: "renders/r1/out.mp4".to_string(),
            privacy: Privacy::Private,
            frames_per_chunk: 20,
            memory_size_mb: 2_048,
            disk_size_mb: 512,
            region: "us-east-1".to_string(),
            verbose: false,
        }
    }

    #[tokio::test]
    async fn test_render_metadata_roundtrip() {
        let store = MemoryStore::new();
        let render_id = RenderId::from_string("r1");

        assert!(read_render_metadata(&store, &render_id).await.unwrap().is_none());

        write_render_metadata(&store, &metadata(&render_id)).await.unwrap();
        let read = read_render_metadata(&store, &render_id).await.unwrap().unwrap();
        assert_eq!(read.total_chunks, 3);
        assert_eq!(read.render_id, render_id);
    }

    #[tokio::test]
    async fn test_initialized_marker_lifecycle() {
        let store = MemoryStore::new();
        let render_id = RenderId::from_string("r1");

        assert!(!is_initialized(&store, &render_id).await.unwrap());
        write_initialized_marker(&store, &render_id).await.unwrap();
        assert!(is_initialized(&store, &render_id).await.unwrap());
        delete_initialized_marker(&store, &render_id).await.unwrap();
        assert!(!is_initialized(&store, &render_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_encoding_progress_roundtrip() {
        let store = MemoryStore::new();
        let render_id = RenderId::from_string("r1");

        assert_eq!(read_encoding_progress(&store, &render_id).await.unwrap(), None);
        write_encoding_progress(&store, &render_id, 150).await.unwrap();
        assert_eq!(read_encoding_progress(&store, &render_id).await.unwrap(), Some(150));
    }

    #[tokio::test]
    async fn test_chunk_timings_sorted_by_index() {
        let store = MemoryStore::new();
        let render_id = RenderId::from_string("r1");

        for chunk in [2, 0, 1] {
            let timing = ChunkTiming {
                chunk,
                started_at_ms: 1_000,
                rendered_at_ms: 2_000 + chunk as i64,
            };
            write_chunk_timing(&store, &render_id, &timing).await.unwrap();
        }

        let timings = read_chunk_timings(&store, &render_id).await.unwrap();
        let chunks: Vec<_> = timings.iter().map(|t| t.chunk).collect();
        assert_eq!(chunks, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_inspect_errors_aggregates_reports() {
        let store = MemoryStore::new();
        let render_id = RenderId::from_string("r1");

        for (chunk, attempt, will_retry) in [(Some(1u32), 1u32, true), (Some(1), 2, false), (Some(0), 1, false)] {
            let error = ErrorInfo {
                chunk,
                message: format!("attempt {} failed", attempt),
                stack: None,
                is_fatal: !will_retry,
                attempt,
                total_attempts: 2,
                will_retry,
            };
            write_error_report(&store, &render_id, &error).await.unwrap();
        }

        let errors = inspect_errors(&store, &render_id).await.unwrap();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].chunk, Some(0));
        assert_eq!(errors[1].chunk, Some(1));
        assert_eq!(errors[1].attempt, 1);
        assert_eq!(errors[2].attempt, 2);
    }
}
