//! Environment-sourced configuration, read once at startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::{MediaKinds, MemoryScope};
use crate::engine::{Device, ModelSize};
use crate::error::{ChatError, ChatResult};

/// Default bind port.
pub const DEFAULT_PORT: u16 = 7860;

/// Upload size limit in bytes.
pub const MAX_FILE_SIZE: usize = 15 * 1024 * 1024;

const DEFAULT_MEDIA_DIR: &str = "/home/docker_user/smolvlm2/media";
const DEFAULT_CACHE_DIR: &str = "/home/docker_user/smolvlm2/cache";
const DEFAULT_MODEL_DIR: &str = "/home/docker_user/smolvlm2/models";
const DEFAULT_INFERENCE_URL: &str = "http://127.0.0.1:8000";

/// Application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Device requested at startup.
    pub device: Device,
    /// Model size loaded at startup.
    pub model_size: ModelSize,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Directory holding example media.
    pub media_dir: PathBuf,
    /// Model download cache.
    pub cache_dir: PathBuf,
    /// Local model store.
    pub model_dir: PathBuf,
    /// Where uploaded attachments are written.
    pub upload_dir: PathBuf,
    /// Static assets of the chat page.
    pub static_dir: PathBuf,
    /// Base URL of the inference sidecar.
    pub inference_url: String,
    /// Sharing of the remembered media context.
    pub memory_scope: MemoryScope,
    /// Accepted attachment extensions.
    pub media_kinds: MediaKinds,
    /// Request body limit for uploads.
    pub max_file_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let cache_dir = PathBuf::from(DEFAULT_CACHE_DIR);
        Self {
            device: Device::Cpu,
            model_size: ModelSize::M256,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            media_dir: PathBuf::from(DEFAULT_MEDIA_DIR),
            upload_dir: cache_dir.join("uploads"),
            cache_dir,
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            static_dir: PathBuf::from("static"),
            inference_url: DEFAULT_INFERENCE_URL.to_string(),
            memory_scope: MemoryScope::Global,
            media_kinds: MediaKinds::default(),
            max_file_size: MAX_FILE_SIZE,
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    /// Returns an error if a value is present but malformed.
    pub fn from_env() -> ChatResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults.
    ///
    /// An unknown `MODEL_SIZE` falls back to the default size with a warning.
    ///
    /// # Errors
    /// Returns an error if a value is present but malformed.
    pub fn from_lookup<F>(lookup: F) -> ChatResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(device) = lookup("DEVICE") {
            config.device = device.parse()?;
        }
        if let Some(size) = lookup("MODEL_SIZE") {
            config.model_size = size.parse().unwrap_or_else(|err| {
                tracing::warn!("{err}, using {}", ModelSize::default());
                ModelSize::default()
            });
        }
        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = port
                .parse()
                .map_err(|_| ChatError::Config(format!("PORT must be a port number, got {port}")))?;
        }
        if let Some(dir) = lookup("MEDIA_DIR") {
            config.media_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("TRANSFORMERS_CACHE") {
            config.cache_dir = PathBuf::from(dir);
            config.upload_dir = config.cache_dir.join("uploads");
        }
        if let Some(dir) = lookup("MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("STATIC_DIR") {
            config.static_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("INFERENCE_URL") {
            config.inference_url = url;
        }
        if let Some(scope) = lookup("MEMORY_SCOPE") {
            config.memory_scope = scope.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        if self.port == 0 {
            return Err(ChatError::Config("PORT must be > 0".to_string()));
        }

        if self.max_file_size == 0 {
            return Err(ChatError::Config("max_file_size must be > 0".to_string()));
        }

        if self.media_kinds.image.is_empty() && self.media_kinds.video.is_empty() {
            return Err(ChatError::Config(
                "at least one media extension must be accepted".to_string(),
            ));
        }

        Url::parse(&self.inference_url)?;
        Ok(())
    }

    /// Create the cache, model and upload directories if absent.
    ///
    /// # Errors
    /// Returns an error if a directory cannot be created.
    pub fn ensure_directories(&self) -> ChatResult<()> {
        for dir in [&self.cache_dir, &self.model_dir, &self.upload_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// `host:port` to bind.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Example path inside the media directory.
    #[must_use]
    pub fn media_path(&self, name: &str) -> String {
        self.media_dir.join(name).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(|_| None);
        assert!(config.is_ok());
        let config = config.unwrap_or_default();
        assert_eq!(config.device, Device::Cpu);
        assert_eq!(config.model_size, ModelSize::M256);
        assert_eq!(config.port, 7860);
        assert_eq!(config.memory_scope, MemoryScope::Global);
        assert_eq!(config.upload_dir, PathBuf::from(DEFAULT_CACHE_DIR).join("uploads"));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DEVICE", "cuda"),
            ("MODEL_SIZE", "500M"),
            ("PORT", "9000"),
            ("TRANSFORMERS_CACHE", "/tmp/c"),
            ("MEMORY_SCOPE", "session"),
        ]))
        .unwrap_or_default();

        assert_eq!(config.device, Device::Cuda);
        assert_eq!(config.model_size, ModelSize::M500);
        assert_eq!(config.port, 9000);
        assert_eq!(config.upload_dir, PathBuf::from("/tmp/c/uploads"));
        assert_eq!(config.memory_scope, MemoryScope::Session);
    }

    #[test]
    fn test_unknown_model_size_falls_back() {
        let config = AppConfig::from_lookup(lookup_from(&[("MODEL_SIZE", "7B")]));
        assert_eq!(config.map(|c| c.model_size).ok(), Some(ModelSize::M256));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_lookup(lookup_from(&[("PORT", "http")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("PORT", "0")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("DEVICE", "tpu")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("INFERENCE_URL", "::")])).is_err());
    }

    #[test]
    fn test_media_path() {
        let config = AppConfig::default();
        assert_eq!(
            config.media_path("image.jpg"),
            "/home/docker_user/smolvlm2/media/image.jpg"
        );
    }
}
