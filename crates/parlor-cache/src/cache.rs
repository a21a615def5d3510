//! The cache context object: collections, indices, and history wiring.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use parlor_cache_core::{
    Action, Collection, ListIndex, OrderIndex, Subscription,
};
use parlor_cache_history::{Anchor, Chunk, ChunkRef, HistoryEngine, MsgId, PeerTimeline};

use crate::error::{CacheError, Result};
use crate::types::{merge_chats, Chat, Message, PeerId, User, UserId};

/// One fetched page of history, as handed back by the network caller.
#[derive(Debug, Clone, Default)]
pub struct PageResult {
    pub messages: Vec<Message>,
    /// The page ends at the oldest message that exists.
    pub oldest_reached: bool,
    /// The page starts at the newest message that exists.
    pub newest_reached: bool,
}

/// The in-memory data layer of a chat client.
///
/// Owns the item collections, the standard derived indices, and the history
/// engine, wired together: deleting a message from the message collection
/// also forgets its id in the history engine and timelines. Built explicitly
/// by the application's composition root; there are no global instances.
pub struct Cache {
    users: Collection<User>,
    chats: Collection<Chat>,
    messages: Collection<Message>,
    history: HistoryEngine<PeerId>,
    timelines: Rc<RefCell<HashMap<PeerId, PeerTimeline>>>,
    chat_list: OrderIndex<Chat>,
    pinned: ListIndex<Chat>,
    writing_history: Rc<Cell<bool>>,
    _bridge: Subscription,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        let users = Collection::new();
        let chats = Collection::with_merge(Box::new(merge_chats));
        let messages: Collection<Message> = Collection::new();

        // Newest activity first; ties broken by peer so the list is stable.
        let chat_list = chats.order_index(
            Box::new(|a: &Chat, b: &Chat| {
                b.last_message_date
                    .cmp(&a.last_message_date)
                    .then_with(|| a.peer.cmp(&b.peer))
            }),
            Some(Box::new(|chat: &Chat| !chat.min)),
        );
        let pinned = chats.list_index();

        let history: HistoryEngine<PeerId> = HistoryEngine::new();
        let timelines: Rc<RefCell<HashMap<PeerId, PeerTimeline>>> =
            Rc::new(RefCell::new(HashMap::new()));
        let writing_history = Rc::new(Cell::new(false));

        // Message removals flow into the history engine so chunks never keep
        // ids of deleted messages. Suppressed while the cache itself is
        // writing a history page, so those batches cannot echo back.
        let bridge = {
            let history = history.clone();
            let timelines = Rc::clone(&timelines);
            let writing = Rc::clone(&writing_history);
            messages.changes().subscribe(move |batch| {
                if writing.get() {
                    return;
                }
                for event in batch {
                    if event.action != Action::Remove {
                        continue;
                    }
                    let (peer, id) = &event.key;
                    history.remove_id(peer, *id);
                    if let Some(timeline) = timelines.borrow_mut().get_mut(peer) {
                        timeline.remove_id(*id);
                    }
                }
            })
        };

        Self {
            users,
            chats,
            messages,
            history,
            timelines,
            chat_list,
            pinned,
            writing_history,
            _bridge: bridge,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Collections and indices
    // ─────────────────────────────────────────────────────────────────────

    pub fn users(&self) -> &Collection<User> {
        &self.users
    }

    pub fn chats(&self) -> &Collection<Chat> {
        &self.chats
    }

    pub fn messages(&self) -> &Collection<Message> {
        &self.messages
    }

    /// Chats ordered by activity, newest first. Partial records are hidden.
    pub fn chat_list(&self) -> &OrderIndex<Chat> {
        &self.chat_list
    }

    /// The manually curated pinned-chat list.
    pub fn pinned(&self) -> &ListIndex<Chat> {
        &self.pinned
    }

    pub fn user(&self, id: UserId) -> Option<User> {
        self.users.get(&id)
    }

    pub fn chat(&self, peer: &PeerId) -> Option<Chat> {
        self.chats.get(peer)
    }

    pub fn message(&self, peer: &PeerId, id: MsgId) -> Option<Message> {
        self.messages.get(&(peer.clone(), id))
    }

    // ─────────────────────────────────────────────────────────────────────
    // History
    // ─────────────────────────────────────────────────────────────────────

    /// Open a live history window into `peer`'s conversation.
    pub fn open_history(&self, peer: &PeerId, anchor: Anchor) -> ChunkRef<PeerId> {
        self.history.reference(peer.clone(), anchor)
    }

    /// Write one fetched history page: the messages into the message
    /// collection (as one batch), the id range into the chunk store through
    /// `reference`, and the range into the peer's timeline.
    pub fn put_history_page(
        &self,
        reference: &ChunkRef<PeerId>,
        peer: &PeerId,
        page: PageResult,
    ) -> Result<()> {
        if page.messages.iter().any(|m| m.peer != *peer) {
            tracing::warn!(%peer, "history page contains a message for another peer");
            return Err(CacheError::ForeignMessage {
                peer: peer.to_string(),
            });
        }

        let mut ids: Vec<MsgId> = page.messages.iter().map(|m| m.id).collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.dedup();

        {
            let _writing = ScopedFlag::raise(&self.writing_history);
            self.messages.put_many(page.messages);
        }

        reference.put_chunk(Chunk::new(
            ids.clone(),
            page.oldest_reached,
            page.newest_reached,
        ))?;

        self.timelines
            .borrow_mut()
            .entry(peer.clone())
            .or_default()
            .merge_range(&ids);
        Ok(())
    }

    /// Delete one message everywhere: collection, chunk store, timeline.
    pub fn delete_message(&self, peer: &PeerId, id: MsgId) {
        self.messages.remove(&(peer.clone(), id));
    }

    /// The known history of `peer` as message values, newest first, with
    /// gaps between chunks preserved as discontinuities.
    pub fn history_messages(&self, peer: &PeerId) -> Vec<Message> {
        self.history
            .chunks(peer)
            .iter()
            .flat_map(|chunk| chunk.ids.iter())
            .filter_map(|&id| self.messages.get(&(peer.clone(), id)))
            .collect()
    }

    /// Every id known for `peer`, positioned or vagrant, newest first.
    pub fn known_ids(&self, peer: &PeerId) -> Vec<MsgId> {
        self.timelines
            .borrow()
            .get(peer)
            .map(PeerTimeline::known_ids)
            .unwrap_or_default()
    }

    /// Record an id known to exist (e.g. a reply target) whose position in
    /// `peer`'s history is not proven yet.
    pub fn note_message_id(&self, peer: &PeerId, id: MsgId) {
        self.timelines
            .borrow_mut()
            .entry(peer.clone())
            .or_default()
            .add_vagrant(id);
    }
}

/// Sets the flag for the enclosing scope, restoring it on every exit path.
struct ScopedFlag {
    flag: Rc<Cell<bool>>,
}

impl ScopedFlag {
    fn raise(flag: &Rc<Cell<bool>>) -> Self {
        flag.set(true);
        Self {
            flag: Rc::clone(flag),
        }
    }
}

impl Drop for ScopedFlag {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}
