//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use parlor_cache::{Anchor, Cache, Chat, ChunkRef, Message, MsgId, PageResult, PeerId, User};

/// A message with deterministic filler content.
pub fn message(peer: &str, id: MsgId) -> Message {
    Message {
        peer: PeerId::from(peer),
        id,
        sender: 1,
        text: format!("message {id}"),
        date: 1_700_000_000 + id,
    }
}

/// A page of consecutive messages, newest first.
pub fn page(peer: &str, newest: MsgId, oldest: MsgId, newest_reached: bool) -> PageResult {
    PageResult {
        messages: (oldest..=newest).rev().map(|id| message(peer, id)).collect(),
        oldest_reached: false,
        newest_reached,
    }
}

/// A full (non-min) user record.
pub fn user(id: i64, name: &str) -> User {
    User {
        id,
        name: name.to_owned(),
        username: Some(name.to_lowercase()),
        min: false,
    }
}

/// A full (non-min) chat record.
pub fn chat(peer: &str, last_message_date: i64) -> Chat {
    Chat {
        peer: PeerId::from(peer),
        title: peer.to_owned(),
        participant_count: 2,
        last_message_date,
        min: false,
    }
}

/// A cache pre-wired for one conversation.
pub struct CacheFixture {
    pub cache: Cache,
    pub peer: PeerId,
}

impl CacheFixture {
    pub fn new(peer: &str) -> Self {
        let cache = Cache::new();
        cache.chats().put(chat(peer, 0));
        Self {
            cache,
            peer: PeerId::from(peer),
        }
    }

    /// Open a window at the newest end.
    pub fn open_newest(&self) -> ChunkRef<PeerId> {
        self.cache.open_history(&self.peer, Anchor::Newest)
    }

    /// Open a window anchored at a concrete id.
    pub fn open_at(&self, id: MsgId) -> ChunkRef<PeerId> {
        self.cache.open_history(&self.peer, Anchor::Id(id))
    }

    /// Load one consecutive page through `reference`.
    pub fn load_page(
        &self,
        reference: &ChunkRef<PeerId>,
        newest: MsgId,
        oldest: MsgId,
        newest_reached: bool,
    ) {
        let peer = self.peer.0.as_str();
        let result = self
            .cache
            .put_history_page(reference, &self.peer, page(peer, newest, oldest, newest_reached));
        assert!(result.is_ok(), "fixture page load failed: {result:?}");
    }
}
