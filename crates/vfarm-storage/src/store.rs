//! Object store abstraction.

use std::path::Path;

use async_trait::async_trait;

use vfarm_models::{DownloadBehavior, Privacy};

use crate::error::{StorageError, StorageResult};

/// Options applied when writing an object.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// MIME type of the object
    pub content_type: Option<String>,
    /// Access level of the object
    pub privacy: Privacy,
    /// Content-Disposition policy, for browser-facing outputs
    pub download_behavior: Option<DownloadBehavior>,
}

impl PutOptions {
    /// Private JSON blob, the default for internal records.
    pub fn json() -> Self {
        Self {
            content_type: Some("application/json".to_string()),
            ..Default::default()
        }
    }

    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Default::default()
        }
    }
}

/// Render a `Content-Disposition` header value for a download policy.
/// Inline playback needs no header.
pub fn content_disposition_header(behavior: &DownloadBehavior) -> Option<String> {
    match behavior {
        DownloadBehavior::PlayInBrowser => None,
        DownloadBehavior::Download { file_name: None } => Some("attachment".to_string()),
        DownloadBehavior::Download {
            file_name: Some(name),
        } => Some(format!("attachment; filename=\"{}\"", name)),
    }
}

/// Information about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modified timestamp (milliseconds since epoch)
    pub last_modified_ms: Option<i64>,
}

/// Key-based blob storage with strong read-after-write consistency.
///
/// The production implementation is [`crate::S3Store`]; tests and local
/// development run against [`crate::MemoryStore`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object.
    async fn put(&self, key: &str, body: Vec<u8>, options: &PutOptions) -> StorageResult<()>;

    /// Read an object fully into memory.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// List objects under a prefix, in key order.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;

    /// Delete multiple objects. Missing keys are not an error.
    async fn delete_many(&self, keys: &[String]) -> StorageResult<u32>;

    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Upload a local file.
    async fn put_file(&self, key: &str, path: &Path, options: &PutOptions) -> StorageResult<()> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", path.display(), e)))?;
        self.put(key, body, options).await
    }

    /// Download an object to a local file, creating parent directories.
    async fn get_to_file(&self, key: &str, path: &Path) -> StorageResult<()> {
        let body = self.get(key).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::DownloadFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        tokio::fs::write(path, body)
            .await
            .map_err(|e| StorageError::DownloadFailed(format!("Failed to write file: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_header() {
        assert_eq!(
            content_disposition_header(&DownloadBehavior::PlayInBrowser),
            None
        );
        assert_eq!(
            content_disposition_header(&DownloadBehavior::Download { file_name: None }).unwrap(),
            "attachment"
        );
        assert_eq!(
            content_disposition_header(&DownloadBehavior::Download {
                file_name: Some("final.mp4".to_string())
            })
            .unwrap(),
            "attachment; filename=\"final.mp4\""
        );
    }
}
