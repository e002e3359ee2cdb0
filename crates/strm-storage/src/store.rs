//! Object store interface.

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::StorageResult;

/// Information about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modified timestamp (milliseconds since epoch)
    pub last_modified: Option<u64>,
}

/// Bucket/key addressed blob storage.
///
/// File transfers take a cancellation token; cancelling it abandons the
/// transfer with [`StorageError::Cancelled`](crate::StorageError::Cancelled).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read a whole object.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;

    /// Write a whole object.
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>, content_type: &str)
        -> StorageResult<()>;

    /// Stream an object into a local file. Returns the number of bytes written.
    async fn download_to(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> StorageResult<u64>;

    /// Upload a local file.
    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<()>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// List objects under a prefix.
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;

    /// Delete every object under a prefix. Returns the number deleted.
    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<usize> {
        let objects = self.list(bucket, prefix).await?;
        for object in &objects {
            self.delete(bucket, &object.key).await?;
        }
        Ok(objects.len())
    }
}
