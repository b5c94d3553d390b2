//! Conversation model: content classification, message formatting and the
//! remembered media context.

pub mod content;
pub mod memory;
pub mod message;

pub use content::{CONTENT_ERROR_TEXT, ContentItem, MediaKinds};
pub use memory::{ConversationMemory, MemoryKey, MemoryScope, assemble_prompt};
pub use message::{Message, Role, Turn, attached_media, format_message};
