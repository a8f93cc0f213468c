//! Uploaded file storage
//!
//! Files are stored under a root directory with generated names and addressed by a
//! relative path (`<directory>/<uuid>.<ext>`). The HTTP layer serves the root at
//! `/uploads`, so public URLs are `<base_url>/uploads/<path>`.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// File storage errors
#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("File storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store `bytes` under `directory`; returns the relative path
    async fn save(
        &self,
        bytes: &[u8],
        directory: &str,
        extension: &str,
    ) -> Result<String, FileStoreError>;

    /// Remove a stored file; `Ok(false)` when it did not exist
    async fn delete(&self, path: &str) -> Result<bool, FileStoreError>;

    fn url_for(&self, path: &str) -> String;
}

/// Reject absolute paths and anything that could escape the storage root
fn relative_path(path: &str) -> Result<PathBuf, FileStoreError> {
    let candidate = Path::new(path);
    let clean = !path.is_empty()
        && candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

    if clean {
        Ok(candidate.to_path_buf())
    } else {
        Err(FileStoreError::InvalidPath(path.to_string()))
    }
}

/// Build the stored name for a new upload
pub fn unique_file_name(extension: &str) -> String {
    format!("{}.{}", Uuid::new_v4().simple(), extension)
}

/// Public URL for a stored path
pub fn public_url(base_url: &str, path: &str) -> String {
    format!("{}/uploads/{}", base_url.trim_end_matches('/'), path)
}

/// Local filesystem storage
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
    base_url: String,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn save(
        &self,
        bytes: &[u8],
        directory: &str,
        extension: &str,
    ) -> Result<String, FileStoreError> {
        let dir = relative_path(directory)?;
        let file_name = unique_file_name(extension);
        relative_path(&file_name)?;

        let target_dir = self.root.join(&dir);
        tokio::fs::create_dir_all(&target_dir).await?;
        tokio::fs::write(target_dir.join(&file_name), bytes).await?;

        let path = format!("{}/{}", directory.trim_end_matches('/'), file_name);
        tracing::debug!(path = %path, size = bytes.len(), "Stored upload");
        Ok(path)
    }

    async fn delete(&self, path: &str) -> Result<bool, FileStoreError> {
        let relative = relative_path(path)?;

        match tokio::fs::remove_file(self.root.join(relative)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn url_for(&self, path: &str) -> String {
        public_url(&self.base_url, path)
    }
}
