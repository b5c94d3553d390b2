//! Conversation turns and the messages built from them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::content::{ContentItem, MediaKinds};

/// Role of a message in a prompt sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// User input.
    User,
    /// Remembered media context.
    System,
    /// Model output.
    Assistant,
}

impl Role {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A role plus an ordered list of content items.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who the message is attributed to.
    pub role: Role,
    /// Ordered content.
    pub content: Vec<ContentItem>,
}

impl Message {
    /// Build a user message.
    #[must_use]
    pub const fn user(content: Vec<ContentItem>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    /// Build a system message.
    #[must_use]
    pub const fn system(content: Vec<ContentItem>) -> Self {
        Self {
            role: Role::System,
            content,
        }
    }

    /// Concatenated text items, separated by newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentItem::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One user submission: free text plus attached file references.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Prompt text.
    pub text: String,
    /// Attached file paths, in submission order.
    #[serde(default)]
    pub files: Vec<String>,
}

impl Turn {
    /// Text-only turn.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            files: Vec::new(),
        }
    }

    /// Attach a file.
    #[must_use]
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.files.push(file.into());
        self
    }
}

/// Format a turn into a user message: the text item first, then each file
/// classified in submission order.
#[must_use]
pub fn format_message(turn: &Turn, kinds: &MediaKinds) -> Message {
    let mut content = Vec::with_capacity(turn.files.len() + 1);
    content.push(ContentItem::text(turn.text.clone()));
    content.extend(turn.files.iter().map(|file| kinds.classify(file)));

    let message = Message::user(content);
    tracing::info!(?message, "Formatted message");
    message
}

/// Non-text items of a message, order preserved.
#[must_use]
pub fn attached_media(message: &Message) -> Vec<ContentItem> {
    message
        .content
        .iter()
        .filter(|item| item.is_media())
        .cloned()
        .collect()
}
