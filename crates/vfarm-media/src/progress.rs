//! FFmpeg progress parsing.

use serde::{Deserialize, Serialize};

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncodingProgress {
    /// Frames encoded so far
    pub frame: u64,
    /// Current encoding FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl EncodingProgress {
    /// Progress as a fraction of the total frame count, 0.0 to 1.0.
    pub fn fraction(&self, total_frames: u64) -> f64 {
        if total_frames == 0 {
            return 0.0;
        }
        (self.frame as f64 / total_frames as f64).min(1.0)
    }

    /// Estimate time remaining in seconds.
    pub fn eta_seconds(&self, total_frames: u64) -> Option<f64> {
        if self.fps <= 0.0 || self.frame == 0 {
            return None;
        }

        let remaining = total_frames.saturating_sub(self.frame);
        Some(remaining as f64 / self.fps)
    }
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(EncodingProgress) + Send + 'static>;
