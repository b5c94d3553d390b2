//! Storage of uploaded attachments.

use std::path::{Path, PathBuf};

use regex::Regex;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

/// Writes uploaded files under a single directory with collision-free names.
pub struct UploadStore {
    dir: PathBuf,
    unsafe_chars: Regex,
}

impl UploadStore {
    /// Create a store rooted at `dir`.
    ///
    /// # Errors
    /// Returns an error if the name filter cannot be compiled.
    pub fn new(dir: impl Into<PathBuf>) -> ChatResult<Self> {
        Ok(Self {
            dir: dir.into(),
            unsafe_chars: Regex::new(r"[^A-Za-z0-9._-]")?,
        })
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reduce a client-supplied name to a safe basename. The extension is
    /// kept as-is so classification still sees it.
    #[must_use]
    pub fn sanitize(&self, name: &str) -> String {
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let cleaned = self.unsafe_chars.replace_all(base, "_");
        let cleaned = cleaned.trim_start_matches('.');
        if cleaned.is_empty() {
            "upload".to_string()
        } else {
            cleaned.to_string()
        }
    }

    /// Persist `bytes` and return the stored path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub async fn store(&self, name: &str, bytes: &[u8]) -> ChatResult<PathBuf> {
        if bytes.is_empty() {
            return Err(ChatError::Upload(format!("{name} is empty")));
        }
        let path = self
            .dir
            .join(format!("{}-{}", Uuid::new_v4().simple(), self.sanitize(name)));
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "Stored upload");
        Ok(path)
    }

    /// Remove files written for a request that did not complete.
    pub async fn discard(&self, paths: &[PathBuf]) {
        for path in paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed upload"),
                Err(err) => tracing::warn!(path = %path.display(), "Failed to remove upload: {err}"),
            }
        }
    }
}
