//! Single-slot memory of the most recently attached media.
//!
//! A turn that carries media replaces the remembered context wholesale. A
//! text-only turn is sent with the remembered context prepended as a system
//! message, so follow-up questions work without re-uploading.

use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::content::ContentItem;
use super::message::Message;
use crate::error::ChatError;

/// How memory slots are shared between clients.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    /// One slot for the whole process; every client sees the last upload.
    #[default]
    Global,
    /// One slot per client session id.
    Session,
}

impl MemoryScope {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MemoryScope {
    type Err = ChatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "global" => Ok(Self::Global),
            "session" => Ok(Self::Session),
            other => Err(ChatError::Config(format!("unknown memory scope: {other}"))),
        }
    }
}

/// Key of a memory slot.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum MemoryKey {
    /// The process-wide slot.
    Global,
    /// A per-session slot.
    Session(String),
}

/// Remembered media context, keyed according to a [`MemoryScope`].
pub struct ConversationMemory {
    scope: MemoryScope,
    slots: DashMap<MemoryKey, Message>,
}

impl ConversationMemory {
    /// Create an empty memory.
    #[must_use]
    pub fn new(scope: MemoryScope) -> Self {
        Self {
            scope,
            slots: DashMap::new(),
        }
    }

    /// Configured scope.
    #[must_use]
    pub const fn scope(&self) -> MemoryScope {
        self.scope
    }

    /// Resolve the slot a client session maps to.
    ///
    /// Under [`MemoryScope::Global`] the session id is ignored. Clients that
    /// send no session id share the global slot.
    #[must_use]
    pub fn key_for(&self, session: Option<&str>) -> MemoryKey {
        match (self.scope, session) {
            (MemoryScope::Session, Some(id)) if !id.is_empty() => {
                MemoryKey::Session(id.to_string())
            }
            _ => MemoryKey::Global,
        }
    }

    /// Replace the slot with `{system, media}`. Never merges with the old value.
    pub fn remember(&self, key: MemoryKey, media: Vec<ContentItem>) {
        let message = Message::system(media);
        tracing::info!(?key, ?message, "Updated system prompt");
        self.slots.insert(key, message);
    }

    /// Current remembered context for a slot.
    #[must_use]
    pub fn recall(&self, key: &MemoryKey) -> Option<Message> {
        self.slots.get(key).map(|entry| entry.value().clone())
    }

    /// Drop a slot. Only reached through an explicit client request.
    pub fn forget(&self, key: &MemoryKey) -> bool {
        self.slots.remove(key).is_some()
    }

    /// Number of populated slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when nothing has been remembered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Build the prompt sequence sent to the engine.
///
/// Media-bearing turns go alone; text-only turns get the recalled context
/// prepended when there is one.
#[must_use]
pub fn assemble_prompt(recalled: Option<Message>, user: Message, has_media: bool) -> Vec<Message> {
    match recalled {
        Some(system) if !has_media => vec![system, user],
        _ => vec![user],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remember_replaces_instead_of_merging() {
        let memory = ConversationMemory::new(MemoryScope::Global);
        let key = memory.key_for(None);

        memory.remember(key.clone(), vec![ContentItem::image("a.png")]);
        memory.remember(key.clone(), vec![ContentItem::video("b.mp4")]);

        assert_eq!(
            memory.recall(&key),
            Some(Message::system(vec![ContentItem::video("b.mp4")]))
        );
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_recall_empty() {
        let memory = ConversationMemory::new(MemoryScope::Global);
        assert!(memory.recall(&MemoryKey::Global).is_none());
        assert!(memory.is_empty());
    }

    #[test]
    fn test_global_scope_ignores_session() {
        let memory = ConversationMemory::new(MemoryScope::Global);
        assert_eq!(memory.key_for(Some("abc")), MemoryKey::Global);
    }

    #[test]
    fn test_session_scope_keys() {
        let memory = ConversationMemory::new(MemoryScope::Session);
        assert_eq!(
            memory.key_for(Some("abc")),
            MemoryKey::Session("abc".to_string())
        );
        assert_eq!(memory.key_for(Some("")), MemoryKey::Global);
        assert_eq!(memory.key_for(None), MemoryKey::Global);
    }

    #[test]
    fn test_forget() {
        let memory = ConversationMemory::new(MemoryScope::Global);
        memory.remember(MemoryKey::Global, vec![ContentItem::image("a.png")]);
        assert!(memory.forget(&MemoryKey::Global));
        assert!(!memory.forget(&MemoryKey::Global));
    }

    #[test]
    fn test_assemble_prompt() {
        let system = Message::system(vec![ContentItem::image("a.png")]);
        let user = Message::user(vec![ContentItem::text("q")]);

        assert_eq!(
            assemble_prompt(Some(system.clone()), user.clone(), false),
            vec![system.clone(), user.clone()]
        );
        assert_eq!(
            assemble_prompt(Some(system), user.clone(), true),
            vec![user.clone()]
        );
        assert_eq!(assemble_prompt(None, user.clone(), false), vec![user]);
    }

    #[test]
    fn test_parse_scope() {
        assert_eq!("session".parse::<MemoryScope>().ok(), Some(MemoryScope::Session));
        assert!("per-user".parse::<MemoryScope>().is_err());
    }
}
