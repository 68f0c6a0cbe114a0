//! Local filesystem blob backend.
//!
//! Objects are written below a root directory that some web server publishes
//! at `public_base_url`.

use crate::error::{StorageError, StorageResult};
use crate::keys::{PublicBase, suffixed_key, validate_key};
use crate::traits::{BlobStore, StoredBlob};
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// Local filesystem blob store.
#[derive(Debug)]
pub struct FilesystemBackend {
    root: PathBuf,
    public: PublicBase,
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating `root` if needed.
    pub async fn new(root: impl AsRef<Path>, public_base_url: &str) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        let public = PublicBase::parse(public_base_url)?;
        fs::create_dir_all(&root).await?;
        Ok(Self { root, public })
    }

    /// Filesystem location of `key`, with path traversal protection.
    ///
    /// Runs on the blocking pool because it canonicalizes paths.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Rejects keys that would resolve outside the root, including through
    /// symlinked ancestors.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        if Path::new(key)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize()?;

        // Nearest existing ancestor (or the path itself) must stay inside root.
        let mut ancestor = Some(path.as_path());
        while let Some(candidate) = ancestor {
            match std::fs::symlink_metadata(candidate) {
                Ok(meta) => {
                    let canonical = candidate.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(e)
                        }
                    })?;
                    if !canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    return Ok(path);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    ancestor = candidate.parent();
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(path)
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Temp file next to the target, fsync, then rename.
        let temp_name = format!(".tmp.{:016x}", rand::rng().random::<u64>());
        let temp_path = path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, path: &str, data: Bytes, _content_type: &str) -> StorageResult<StoredBlob> {
        let key = suffixed_key(path)?;
        let target = self.key_path(&key).await?;
        self.write_atomic(&target, &data).await?;

        let url = self.public.url_for(&key);
        tracing::debug!(key = %key, url = %url, "stored blob");
        Ok(StoredBlob { key, url })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, url: &str) -> StorageResult<()> {
        let key = self
            .public
            .key_for(url)
            .ok_or_else(|| StorageError::ForeignUrl(url.to_string()))?;
        let path = self.key_path(&key).await?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn owns_url(&self, url: &str) -> bool {
        self.public.key_for(url).is_some()
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    async fn health_check(&self) -> StorageResult<()> {
        let marker = self.root.join(".shelfsheet-health-check");
        self.write_atomic(&marker, b"health-check").await?;
        fs::remove_file(&marker).await?;
        Ok(())
    }
}
