//! Object-store key layout.
//!
//! Every artifact of a render lives under `renders/<renderId>/`. Chunk keys
//! embed a zero-padded index so a plain listing returns them in merge order.

use vfarm_models::RenderId;

/// Width of the zero-padded chunk index in keys.
const CHUNK_INDEX_WIDTH: usize = 8;

/// Prefix of every blob belonging to one render.
pub fn renders_prefix(render_id: &RenderId) -> String {
    format!("renders/{}", render_id)
}

/// Prefix of the chunk output blobs.
pub fn chunk_prefix(render_id: &RenderId) -> String {
    format!("{}/chunks/", renders_prefix(render_id))
}

/// Key of one chunk output blob.
pub fn chunk_key(render_id: &RenderId, chunk_index: u32) -> String {
    format!(
        "{}chunk:{:0width$}",
        chunk_prefix(render_id),
        chunk_index,
        width = CHUNK_INDEX_WIDTH
    )
}

/// Parse the chunk index back out of a chunk key.
pub fn parse_chunk_index(key: &str) -> Option<u32> {
    key.rsplit_once("chunk:")?.1.parse().ok()
}

/// Key of the persisted render metadata record.
pub fn render_metadata_key(render_id: &RenderId) -> String {
    format!("{}/pre-render-metadata.json", renders_prefix(render_id))
}

/// Key of the "render initialized" marker blob (liveness/ownership
/// indicator, deleted last during finalization).
pub fn initialized_marker_key(render_id: &RenderId) -> String {
    format!("{}/initialized.txt", renders_prefix(render_id))
}

/// Key of the encoding progress counter blob.
pub fn encoding_progress_key(render_id: &RenderId) -> String {
    format!("{}/encoding-progress.txt", renders_prefix(render_id))
}

/// Prefix of the per-chunk timing blobs.
pub fn timing_prefix(render_id: &RenderId) -> String {
    format!("{}/timings/", renders_prefix(render_id))
}

/// Key of one chunk's timing blob.
pub fn chunk_timing_key(render_id: &RenderId, chunk_index: u32) -> String {
    format!(
        "{}chunk:{:0width$}.json",
        timing_prefix(render_id),
        chunk_index,
        width = CHUNK_INDEX_WIDTH
    )
}

/// Prefix of the per-attempt error reports.
pub fn error_prefix(render_id: &RenderId) -> String {
    format!("{}/errors/", renders_prefix(render_id))
}

/// Key of one error report.
pub fn error_report_key(render_id: &RenderId, chunk: Option<u32>, attempt: u32) -> String {
    match chunk {
        Some(chunk) => format!("{}chunk-{}-attempt-{}.json", error_prefix(render_id), chunk, attempt),
        None => format!("{}render-attempt-{}.json", error_prefix(render_id), attempt),
    }
}

/// Key of the serialized input props blob.
pub fn input_props_key(render_id: &RenderId) -> String {
    format!("{}/input-props.json", renders_prefix(render_id))
}

/// Key of the final post-render record.
pub fn post_render_data_key(render_id: &RenderId) -> String {
    format!("{}/post-render-metadata.json", renders_prefix(render_id))
}

/// Default key of the merged output when the caller does not choose one.
pub fn default_output_key(render_id: &RenderId, extension: &str) -> String {
    format!("{}/out.{}", renders_prefix(render_id), extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_id() -> RenderId {
        RenderId::from_string("abc123")
    }

    #[test]
    fn test_all_keys_share_render_prefix() {
        let id = render_id();
        let prefix = renders_prefix(&id);

        for key in [
            chunk_key(&id, 0),
            render_metadata_key(&id),
            initialized_marker_key(&id),
            encoding_progress_key(&id),
            chunk_timing_key(&id, 3),
            error_report_key(&id, Some(1), 2),
            error_report_key(&id, None, 1),
            input_props_key(&id),
            post_render_data_key(&id),
            default_output_key(&id, "mp4"),
        ] {
            assert!(key.starts_with(&prefix), "{} missing prefix {}", key, prefix);
        }
    }

    #[test]
    fn test_chunk_keys_sort_in_index_order() {
        let id = render_id();
        let mut keys: Vec<_> = [9, 100, 0, 11, 2].iter().map(|i| chunk_key(&id, *i)).collect();
        keys.sort();

        let indices: Vec<_> = keys.iter().map(|k| parse_chunk_index(k).unwrap()).collect();
        assert_eq!(indices, vec![0, 2, 9, 11, 100]);
    }

    #[test]
    fn test_parse_chunk_index() {
        let id = render_id();
        assert_eq!(parse_chunk_index(&chunk_key(&id, 42)), Some(42));
        assert_eq!(parse_chunk_index("renders/abc123/pre-render-metadata.json"), None);
    }
}
