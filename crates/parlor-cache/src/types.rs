//! Chat-domain item types stored by the cache.

use parlor_cache_core::Keyed;
use parlor_cache_history::MsgId;
use serde::{Deserialize, Serialize};

/// Conversation key. Opaque; ordering carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub type UserId = i64;

/// One message. Keyed by `(peer, id)`: ids are unique per conversation only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub peer: PeerId,
    pub id: MsgId,
    pub sender: UserId,
    pub text: String,
    /// Unix timestamp, seconds.
    pub date: i64,
}

impl Keyed for Message {
    type Key = (PeerId, MsgId);

    fn key(&self) -> Self::Key {
        (self.peer.clone(), self.id)
    }
}

/// A user record. `min` marks a partial record received as a side reference
/// (e.g. the sender block embedded in someone else's payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub username: Option<String>,
    #[serde(default)]
    pub min: bool,
}

impl Keyed for User {
    type Key = UserId;

    fn key(&self) -> Self::Key {
        self.id
    }

    fn is_min(&self) -> bool {
        self.min
    }
}

/// A conversation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub peer: PeerId,
    pub title: String,
    /// Zero means "not known", not "empty chat".
    #[serde(default)]
    pub participant_count: u32,
    /// Activity timestamp used for the chat-list order.
    pub last_message_date: i64,
    #[serde(default)]
    pub min: bool,
}

impl Keyed for Chat {
    type Key = PeerId;

    fn key(&self) -> Self::Key {
        self.peer.clone()
    }

    fn is_min(&self) -> bool {
        self.min
    }
}

/// Merge override for [`Chat`]: many server payloads omit the participant
/// count, and a known non-zero count must survive such updates.
pub(crate) fn merge_chats(stored: &Chat, incoming: &Chat) -> Option<Chat> {
    if incoming.is_min() && !stored.is_min() {
        return None;
    }
    let mut merged = incoming.clone();
    if merged.participant_count == 0 && stored.participant_count > 0 {
        merged.participant_count = stored.participant_count;
    }
    if merged == *stored {
        return None;
    }
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(count: u32, min: bool) -> Chat {
        Chat {
            peer: PeerId::from("p1"),
            title: "general".into(),
            participant_count: count,
            last_message_date: 100,
            min,
        }
    }

    #[test]
    fn test_chat_merge_preserves_known_count() {
        let stored = chat(42, false);
        let incoming = chat(0, false);
        let merged = merge_chats(&stored, &incoming).unwrap();
        assert_eq!(merged.participant_count, 42);
    }

    #[test]
    fn test_chat_merge_accepts_new_count() {
        let stored = chat(42, false);
        let incoming = chat(43, false);
        assert_eq!(merge_chats(&stored, &incoming).unwrap().participant_count, 43);
    }

    #[test]
    fn test_chat_merge_keeps_full_over_min() {
        let stored = chat(42, false);
        let incoming = chat(0, true);
        assert_eq!(merge_chats(&stored, &incoming), None);
    }

    #[test]
    fn test_chat_merge_identical_is_noop() {
        let stored = chat(42, false);
        assert_eq!(merge_chats(&stored, &stored.clone()), None);
    }
}
