//! Ordered segment concatenation.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use vfarm_models::Codec;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::progress::EncodingProgress;

/// Parameters for one concatenation run.
#[derive(Debug, Clone)]
pub struct ConcatParams {
    /// Segment files in concatenation order
    pub segments: Vec<PathBuf>,
    /// Output file path
    pub output: PathBuf,
    /// Output codec (segments are stream-copied, the codec selects container
    /// handling)
    pub codec: Codec,
    /// Output frame rate
    pub fps: f64,
    /// GIF loop count (0 = forever); ignored for video codecs
    pub gif_loops: Option<u32>,
}

/// Concatenate ordered segment files into one continuous output.
///
/// Writes a concat demuxer list next to the output, stream-copies every
/// segment, and reports frame progress through `on_progress`. The caller
/// decides how often to republish progress.
pub async fn concat_segments<F>(
    params: &ConcatParams,
    runner: &FfmpegRunner,
    on_progress: F,
) -> MediaResult<PathBuf>
where
    F: Fn(EncodingProgress) + Send + 'static,
{
    if params.segments.is_empty() {
        return Err(MediaError::NoSegments);
    }

    for segment in &params.segments {
        if !segment.exists() {
            return Err(MediaError::SegmentNotFound(segment.clone()));
        }
    }

    let list_path = params.output.with_extension("segments.txt");
    write_concat_list(&list_path, &params.segments).await?;

    let mut cmd = FfmpegCommand::new(&params.output)
        .concat_list(&list_path)
        .stream_copy();

    match params.codec {
        Codec::Gif => {
            if let Some(loops) = params.gif_loops {
                cmd = cmd.gif_loops(loops);
            }
        }
        Codec::H264 | Codec::H265 => {
            cmd = cmd.fps(params.fps).faststart();
        }
        Codec::Vp8 | Codec::Vp9 => {
            cmd = cmd.fps(params.fps);
        }
    }

    debug!(
        "Concatenating {} segments into {}",
        params.segments.len(),
        params.output.display()
    );

    runner.run_with_progress(&cmd, on_progress).await?;

    let _ = tokio::fs::remove_file(&list_path).await;

    info!(
        "Concatenated {} segments into {}",
        params.segments.len(),
        params.output.display()
    );
    Ok(params.output.clone())
}

/// Write a concat demuxer list file. Single quotes in paths are escaped per
/// the demuxer's quoting rules.
async fn write_concat_list(list_path: &Path, segments: &[PathBuf]) -> MediaResult<()> {
    let mut contents = String::new();
    for segment in segments {
        let escaped = segment.to_string_lossy().replace('\'', "'\\''");
        contents.push_str(&format!("file '{}'\n", escaped));
    }

    tokio::fs::write(list_path, contents).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_segment_list_is_rejected() {
        let params = ConcatParams {
            segments: vec![],
            output: PathBuf::from("/tmp/out.mp4"),
            codec: Codec::H264,
            fps: 30.0,
            gif_loops: None,
        };

        let err = concat_segments(&params, &FfmpegRunner::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NoSegments));
    }

    #[tokio::test]
    async fn test_missing_segment_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let params = ConcatParams {
            segments: vec![dir.path().join("missing.mp4")],
            output: dir.path().join("out.mp4"),
            codec: Codec::H264,
            fps: 30.0,
            gif_loops: None,
        };

        let err = concat_segments(&params, &FfmpegRunner::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::SegmentNotFound(_)));
    }

    #[tokio::test]
    async fn test_concat_list_preserves_order_and_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let list_path = dir.path().join("list.txt");
        let segments = vec![
            dir.path().join("chunk-1.mp4"),
            dir.path().join("it's.mp4"),
            dir.path().join("chunk-0.mp4"),
        ];

        write_concat_list(&list_path, &segments).await.unwrap();
        let contents = tokio::fs::read_to_string(&list_path).await.unwrap();
        let lines: Vec<_> = contents.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("chunk-1.mp4"));
        assert!(lines[1].contains("it'\\''s.mp4"));
        assert!(lines[2].contains("chunk-0.mp4"));
    }
}
