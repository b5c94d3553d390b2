//! Classification of attached files into typed content items.

use serde::{Deserialize, Serialize};

/// Text substituted for attachments whose extension is not recognised.
pub const CONTENT_ERROR_TEXT: &str = "Error while loading content";

/// A classified unit of conversation content.
///
/// Serialized in the shape the inference pipeline expects, e.g.
/// `{"type": "image", "image": "dog.jpg"}`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    /// Free text.
    Text {
        /// The text itself.
        text: String,
    },
    /// Reference to an image file.
    Image {
        /// Path or URL of the image.
        image: String,
    },
    /// Reference to a video file.
    Video {
        /// Path or URL of the video.
        video: String,
    },
}

impl ContentItem {
    /// Build a text item.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Build an image item.
    #[must_use]
    pub fn image(image: impl Into<String>) -> Self {
        Self::Image {
            image: image.into(),
        }
    }

    /// Build a video item.
    #[must_use]
    pub fn video(video: impl Into<String>) -> Self {
        Self::Video {
            video: video.into(),
        }
    }

    /// True for image and video items.
    #[must_use]
    pub const fn is_media(&self) -> bool {
        match self {
            Self::Text { .. } => false,
            Self::Image { .. } | Self::Video { .. } => true,
        }
    }

    /// Text payload, if this is a text item.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { .. } | Self::Video { .. } => None,
        }
    }
}

/// Extension sets used to recognise media attachments.
///
/// Matching is case-sensitive and includes the leading dot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaKinds {
    /// Extensions classified as images.
    pub image: Vec<String>,
    /// Extensions classified as videos.
    pub video: Vec<String>,
}

impl Default for MediaKinds {
    fn default() -> Self {
        Self {
            image: vec![".png".to_string(), ".jpg".to_string(), ".jpeg".to_string()],
            video: vec![".mp4".to_string()],
        }
    }
}

impl MediaKinds {
    /// All accepted extensions, images first.
    #[must_use]
    pub fn accepted(&self) -> Vec<String> {
        self.image.iter().chain(&self.video).cloned().collect()
    }

    /// Whether `file` has an image or video extension.
    #[must_use]
    pub fn accepts(&self, file: &str) -> bool {
        let ext = extension(file);
        self.image.iter().chain(&self.video).any(|e| *e == ext)
    }

    /// Classify a file reference by its extension.
    ///
    /// Unknown extensions degrade to a text item carrying
    /// [`CONTENT_ERROR_TEXT`] so the turn still goes through.
    #[must_use]
    pub fn classify(&self, file: &str) -> ContentItem {
        let ext = extension(file);
        if self.image.iter().any(|e| *e == ext) {
            ContentItem::image(file)
        } else if self.video.iter().any(|e| *e == ext) {
            ContentItem::video(file)
        } else {
            tracing::error!(file, extension = %ext, "Error while loading content");
            ContentItem::text(CONTENT_ERROR_TEXT)
        }
    }
}

/// Everything after the last '.', with the dot re-attached.
///
/// A name without any dot yields the whole name prefixed by '.', which never
/// matches a configured extension.
fn extension(file: &str) -> String {
    let tail = file.rsplit('.').next().unwrap_or(file);
    format!(".{tail}")
}
