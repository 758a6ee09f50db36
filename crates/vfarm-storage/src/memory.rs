//! In-memory store for tests and local development.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::store::{ObjectInfo, ObjectStore, PutOptions};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    last_modified_ms: i64,
}

/// Listing-faithful in-memory object store. Keys are returned in
/// lexicographic order, matching S3 listing semantics.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects, for test assertions.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, body: Vec<u8>, _options: &PutOptions) -> StorageResult<()> {
        let mut objects = self.objects.lock().await;
        objects.insert(
            key.to_string(),
            StoredObject {
                body,
                last_modified_ms: Utc::now().timestamp_millis(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let objects = self.objects.lock().await;
        objects
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let objects = self.objects.lock().await;
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                size: object.body.len() as u64,
                last_modified_ms: Some(object.last_modified_ms),
            })
            .collect())
    }

    async fn delete_many(&self, keys: &[String]) -> StorageResult<u32> {
        let mut objects = self.objects.lock().await;
        let mut deleted = 0;
        for key in keys {
            if objects.remove(key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let objects = self.objects.lock().await;
        Ok(objects.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryStore::new();
        store
            .put("renders/r1/a", b"hello".to_vec(), &PutOptions::default())
            .await
            .unwrap();

        assert_eq!(store.get("renders/r1/a").await.unwrap(), b"hello");
        assert!(store.exists("renders/r1/a").await.unwrap());
        assert!(!store.exists("renders/r1/b").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_is_prefix_scoped_and_ordered() {
        let store = MemoryStore::new();
        for key in ["renders/r1/c", "renders/r1/a", "renders/r2/b", "renders/r1/b"] {
            store
                .put(key, b"x".to_vec(), &PutOptions::default())
                .await
                .unwrap();
        }

        let listed = store.list("renders/r1/").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["renders/r1/a", "renders/r1/b", "renders/r1/c"]);
    }

    #[tokio::test]
    async fn test_delete_many_ignores_missing() {
        let store = MemoryStore::new();
        store
            .put("renders/r1/a", b"x".to_vec(), &PutOptions::default())
            .await
            .unwrap();

        let deleted = store
            .delete_many(&["renders/r1/a".to_string(), "renders/r1/missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_helpers_use_default_impls() {
        let store = MemoryStore::new();
        let dir = tempfile::tempdir().unwrap();

        let source = dir.path().join("in.bin");
        tokio::fs::write(&source, b"payload").await.unwrap();
        store
            .put_file("renders/r1/in.bin", &source, &PutOptions::default())
            .await
            .unwrap();

        let target = dir.path().join("nested/out.bin");
        store
            .get_to_file("renders/r1/in.bin", &target)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"payload");
    }
}
