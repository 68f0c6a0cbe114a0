//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;

/// A freshly written object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBlob {
    /// Object key, including the random suffix the store appended.
    pub key: String,
    /// Durable public URL of the object.
    pub url: String,
}

/// Durable blob storage addressed by public URL.
///
/// Writers hand in a logical path; the store appends a random suffix before
/// the extension so repeated uploads of the same path never collide. Deletes
/// take the URL returned by [`BlobStore::put`].
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Write `data` under `path` and return where it now lives.
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> StorageResult<StoredBlob>;

    /// Delete the object behind `url`.
    ///
    /// Deleting an object that no longer exists succeeds. A URL that this store
    /// does not serve fails with [`crate::StorageError::ForeignUrl`].
    async fn delete(&self, url: &str) -> StorageResult<()>;

    /// Delete several objects concurrently. Results line up with `urls`.
    async fn delete_many(&self, urls: &[String]) -> Vec<StorageResult<()>> {
        join_all(urls.iter().map(|url| self.delete(url))).await
    }

    /// Whether `url` points into this store.
    fn owns_url(&self, url: &str) -> bool;

    /// Static backend identifier used in logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable and writable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
