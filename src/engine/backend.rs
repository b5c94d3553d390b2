//! Contract of the inference collaborator.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::device::{Device, Precision};
use super::model::ModelSize;
use crate::chat::{ContentItem, Message, Role};
use crate::error::{ChatError, ChatResult};

/// Everything needed to construct an engine instance.
#[derive(Clone, Debug, Serialize)]
pub struct EngineSpec {
    /// Size key the model was selected by.
    pub model_size: ModelSize,
    /// Hub identifier of the model.
    pub model_id: String,
    /// Device to load onto.
    pub device: Device,
    /// Weight precision.
    pub precision: Precision,
    /// Download cache.
    pub cache_dir: PathBuf,
    /// Local model store.
    pub model_dir: PathBuf,
}

impl EngineSpec {
    /// Spec for `size` on `device`, with the precision that device implies.
    #[must_use]
    pub fn new(size: ModelSize, device: Device, cache_dir: PathBuf, model_dir: PathBuf) -> Self {
        Self {
            model_size: size,
            model_id: size.model_id().to_string(),
            device,
            precision: device.precision(),
            cache_dir,
            model_dir,
        }
    }
}

/// Message content as returned by the pipeline: either a bare string or a
/// list of content items.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeneratedContent {
    /// Plain string.
    Plain(String),
    /// Structured items.
    Items(Vec<ContentItem>),
}

/// A message in the pipeline's output transcript.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct GeneratedMessage {
    /// Speaker.
    pub role: Role,
    /// Content.
    pub content: GeneratedContent,
}

impl GeneratedMessage {
    /// Assistant message with plain text content.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: GeneratedContent::Plain(text.into()),
        }
    }

    /// Text of the message.
    #[must_use]
    pub fn text(&self) -> String {
        match &self.content {
            GeneratedContent::Plain(text) => text.clone(),
            GeneratedContent::Items(items) => Message {
                role: self.role,
                content: items.clone(),
            }
            .text(),
        }
    }
}

/// One pipeline result: the prompt transcript extended with the reply.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// Full transcript, last element is the reply.
    pub generated_text: Vec<GeneratedMessage>,
}

/// Extract the reply: content of the last message of the first result.
///
/// # Errors
/// Returns [`ChatError::EmptyGeneration`] when there is nothing to read.
pub fn reply_text(generations: &[Generation]) -> ChatResult<String> {
    generations
        .first()
        .and_then(|g| g.generated_text.last())
        .map(GeneratedMessage::text)
        .ok_or(ChatError::EmptyGeneration)
}

/// An image/video + text to text engine.
///
/// Implementations are not expected to be safe for concurrent mutation; the
/// service only touches them through [`super::ExclusiveEngine`].
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Run the model over a prompt sequence.
    ///
    /// # Errors
    /// Returns an error if the collaborator fails.
    async fn generate(&self, messages: &[Message]) -> ChatResult<Vec<Generation>>;

    /// Move weights to `device`.
    ///
    /// # Errors
    /// Returns an error if the move fails; the engine stays where it was.
    async fn move_to(&mut self, device: Device) -> ChatResult<()>;

    /// Identifier of the loaded model.
    fn model_id(&self) -> &str;
}

/// Builds engine instances.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Construct a ready-to-use engine.
    ///
    /// # Errors
    /// Returns an error if the model cannot be loaded.
    async fn load(&self, spec: &EngineSpec) -> ChatResult<Box<dyn InferenceEngine>>;
}
