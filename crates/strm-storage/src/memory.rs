//! In-memory object store.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{StorageError, StorageResult};
use crate::store::{ObjectInfo, ObjectStore};

/// A stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Object store held in process memory.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> StorageResult<std::sync::MutexGuard<'_, BTreeMap<(String, String), StoredObject>>> {
        self.objects
            .lock()
            .map_err(|_| StorageError::AwsSdk("object map lock poisoned".to_string()))
    }

    /// Fetch an object with its metadata.
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .ok()?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys stored in a bucket, in order.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| {
                objects
                    .keys()
                    .filter(|(b, _)| b == bucket)
                    .map(|(_, k)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        self.object(bucket, key)
            .map(|o| o.data)
            .ok_or_else(|| StorageError::not_found(format!("{}/{}", bucket, key)))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()> {
        self.objects()?.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn download_to(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> StorageResult<u64> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let data = self.get(bucket, key).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &data).await?;
        Ok(data.len() as u64)
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let data = tokio::fs::read(path).await?;
        self.put(bucket, key, data, content_type).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.objects()?
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        Ok(self
            .objects()?
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, key), object)| ObjectInfo {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: None,
            })
            .collect())
    }
}
