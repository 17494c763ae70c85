//! Object store access.
//!
//! The pipeline only talks to [`ObjectStore`]. [`s3::S3Store`] is the
//! production client for MinIO/S3, [`memory::InMemoryStore`] backs tests.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

pub mod config;
pub mod memory;
pub mod s3;

pub use config::StorageConfig;
pub use memory::InMemoryStore;
pub use s3::S3Store;

/// Operations the worker needs from an object store.
///
/// Errors carry an `anyhow` context chain naming the bucket and key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()>;

    async fn copy(&self, bucket: &str, dest_key: &str, src_bucket: &str, src_key: &str)
        -> Result<()>;

    /// Removing a missing key is not an error.
    async fn remove(&self, bucket: &str, key: &str) -> Result<()>;

    /// Keys under `prefix`. Without `recursive` only direct children are
    /// returned (nothing past the next `/`).
    async fn list(&self, bucket: &str, prefix: &str, recursive: bool) -> Result<Vec<String>>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn make_bucket(&self, bucket: &str) -> Result<()>;

    /// Publish created/removed events for every object to `queue_arn`.
    async fn set_notification_config(&self, bucket: &str, queue_arn: &str) -> Result<()>;

    /// Copy then delete the source. Not atomic: a failure after the copy
    /// leaves the object in both places.
    async fn move_object(&self, bucket: &str, src_key: &str, dest_key: &str) -> Result<()> {
        debug!(bucket, src_key, dest_key, "Moving object");
        self.copy(bucket, dest_key, bucket, src_key).await?;
        self.remove(bucket, src_key).await
    }
}
