//! Profile photo storage with bounded calls and best-effort cleanup

use std::sync::Arc;
use std::time::Duration;

use crate::core::auth::service::{AuthError, bounded};
use crate::core::files::FileStore;
use crate::core::users::commands::PhotoUpload;
use crate::core::users::fields::check_photo;

/// Storage directory for profile photos
pub const PHOTO_DIRECTORY: &str = "users";

#[derive(Clone)]
pub struct PhotoStorage {
    files: Arc<dyn FileStore>,
    timeout: Duration,
}

impl PhotoStorage {
    pub fn new(files: Arc<dyn FileStore>, timeout: Duration) -> Self {
        Self { files, timeout }
    }

    /// Store an accepted photo; returns its storage path
    pub async fn save(&self, photo: &PhotoUpload) -> Result<String, AuthError> {
        let extension = match (check_photo(photo), photo.extension()) {
            (None, Some(extension)) => extension,
            (issue, _) => return Err(AuthError::Validation(issue.into_iter().collect())),
        };

        bounded(
            self.timeout,
            "file store",
            self.files.save(&photo.bytes, PHOTO_DIRECTORY, extension),
        )
        .await
    }

    /// Delete a stored photo, logging rather than returning failures
    pub async fn discard(&self, path: &str) {
        match bounded(self.timeout, "file store", self.files.delete(path)).await {
            Ok(true) => tracing::debug!(path, "Discarded photo"),
            Ok(false) => tracing::debug!(path, "Photo already gone"),
            Err(e) => tracing::warn!(path, error = %e, "Failed to delete photo"),
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        self.files.url_for(path)
    }
}
