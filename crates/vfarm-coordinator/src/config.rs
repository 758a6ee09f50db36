//! Coordinator configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Name of the worker function to invoke per chunk
    pub function_name: String,
    /// Maximum concurrent chunk invocations
    pub concurrency: usize,
    /// Retries per chunk beyond the first attempt (transport failures only)
    pub max_retries: u32,
    /// Deadline for every chunk output blob to appear
    pub chunk_timeout: Duration,
    /// Store listing poll interval while waiting for chunk blobs
    pub poll_interval: Duration,
    /// Caller-side timeout per invocation, independent of the platform's own
    pub invoke_timeout: Option<Duration>,
    /// Work directory for fetched chunk files and the merged output
    pub work_dir: PathBuf,
    /// Pricing region of the worker fleet
    pub region: String,
    /// Memory tier of the worker fleet, megabytes
    pub memory_size_mb: u32,
    /// Ephemeral disk tier of the worker fleet, megabytes
    pub disk_size_mb: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            function_name: "vfarm-render-chunk".to_string(),
            concurrency: 16,
            max_retries: 1,
            chunk_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_millis(500),
            invoke_timeout: None,
            work_dir: PathBuf::from("/tmp/vfarm"),
            region: "us-east-1".to_string(),
            memory_size_mb: 2_048,
            disk_size_mb: 2_048,
        }
    }
}

impl CoordinatorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            function_name: std::env::var("VFARM_FUNCTION_NAME")
                .unwrap_or(defaults.function_name),
            concurrency: std::env::var("VFARM_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.concurrency),
            max_retries: std::env::var("VFARM_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            chunk_timeout: Duration::from_secs(
                std::env::var("VFARM_CHUNK_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            poll_interval: Duration::from_millis(
                std::env::var("VFARM_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            invoke_timeout: std::env::var("VFARM_INVOKE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
            work_dir: std::env::var("VFARM_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            region: std::env::var("VFARM_REGION").unwrap_or(defaults.region),
            memory_size_mb: std::env::var("VFARM_MEMORY_SIZE_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.memory_size_mb),
            disk_size_mb: std::env::var("VFARM_DISK_SIZE_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.disk_size_mb),
        }
    }
}
