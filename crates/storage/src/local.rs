//! Local filesystem blob store

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::blob::{validate_blob_name, validate_container, BlobStore};
use crate::error::{StorageError, StorageResult};

/// Stores each blob at `{root}/{container}/{name}`
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    /// File permissions (Unix only)
    #[cfg(unix)]
    file_permissions: Option<u32>,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            #[cfg(unix)]
            file_permissions: Some(0o640),
        }
    }

    #[cfg(unix)]
    pub fn with_file_permissions(mut self, mode: Option<u32>) -> Self {
        self.file_permissions = mode;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path a blob is stored at
    pub fn blob_path(&self, container: &str, name: &str) -> StorageResult<PathBuf> {
        validate_container(container)?;
        validate_blob_name(name)?;
        Ok(name
            .split('/')
            .fold(self.root.join(container), |path, segment| path.join(segment)))
    }

    #[cfg(unix)]
    async fn set_file_permissions(&self, path: &Path) -> StorageResult<()> {
        if let Some(mode) = self.file_permissions {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn set_file_permissions(&self, _path: &Path) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn upload_blob(&self, contents: Bytes, container: &str, name: &str) -> StorageResult<()> {
        let path = self.blob_path(container, name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create directory {}: {}", parent.display(), e),
                ))
            })?;
        }

        // Readers never observe a partially written blob
        let staging = path.with_extension("partial");
        fs::write(&staging, &contents).await?;
        self.set_file_permissions(&staging).await?;
        fs::rename(&staging, &path).await?;

        tracing::debug!(
            container,
            blob = name,
            bytes = contents.len(),
            "blob written to {}",
            path.display()
        );
        Ok(())
    }
}
