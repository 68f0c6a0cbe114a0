//! Blob storage abstraction and backends for shelfsheet media.
//!
//! This crate provides:
//! - The [`BlobStore`] trait: path-addressed writes, URL-addressed deletes
//! - Random key suffixing and the key <-> public URL mapping
//! - Backends: local filesystem and S3-compatible

pub mod backends;
pub mod error;
pub mod keys;
pub mod traits;

pub use backends::{
    filesystem::FilesystemBackend,
    s3::{S3Backend, S3Settings},
};
pub use error::{StorageError, StorageResult};
pub use traits::{BlobStore, StoredBlob};

use shelfsheet_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem {
            path,
            public_base_url,
        } => {
            let backend = FilesystemBackend::new(path, public_base_url).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
            public_base_url,
        } => {
            let backend = S3Backend::new(S3Settings {
                bucket: bucket.clone(),
                endpoint: endpoint.clone(),
                region: region.clone(),
                prefix: prefix.clone(),
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                force_path_style: *force_path_style,
                public_base_url: public_base_url.clone(),
            })
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
