//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::chat::Turn;
use crate::config::AppConfig;
use crate::error::{ChatError, ChatResult};
use crate::service::ChatService;

use super::uploads::UploadStore;

/// Shared application state.
pub struct AppState {
    /// Chat service.
    pub service: ChatService,
    /// Effective configuration.
    pub config: AppConfig,
    /// Attachment storage.
    pub uploads: UploadStore,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    /// Returns an error if the upload store cannot be created.
    pub fn new(service: ChatService, config: AppConfig) -> ChatResult<Arc<Self>> {
        let uploads = UploadStore::new(config.upload_dir.clone())?;
        Ok(Arc::new(Self {
            service,
            config,
            uploads,
        }))
    }

    /// Resolve a client-supplied attachment path.
    ///
    /// Only existing files under the upload or media directory are accepted;
    /// the canonical path is returned.
    ///
    /// # Errors
    /// Returns [`ChatError::Upload`] for missing files and for paths outside
    /// both directories.
    pub async fn resolve_attachment(&self, file: &str) -> ChatResult<String> {
        let rejected = || ChatError::Upload(format!("{file} is not an uploaded or example file"));
        let path = tokio::fs::canonicalize(file).await.map_err(|_| rejected())?;

        for root in [&self.config.upload_dir, &self.config.media_dir] {
            let Ok(root) = tokio::fs::canonicalize(root).await else {
                continue;
            };
            if path.starts_with(&root) {
                return Ok(path.display().to_string());
            }
        }

        tracing::warn!(file, "Attachment outside upload and media directories");
        Err(rejected())
    }

    /// Example turns pointing at media shipped in the media directory.
    #[must_use]
    pub fn examples(&self) -> Vec<Turn> {
        [
            ("Describe the image", "image.jpg"),
            ("Extract text from the image", "image_with_text.png"),
            ("Describe the video", "video.mp4"),
        ]
        .into_iter()
        .map(|(text, file)| Turn::text(text).with_file(self.config.media_path(file)))
        .collect()
    }
}
