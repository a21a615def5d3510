//! Parlor cache: the in-memory data layer of a chat client.
//!
//! Reactive keyed collections with merge-on-write and batched change
//! notification, derived order/list indices, and a gap-aware paginated
//! history engine, composed behind one [`Cache`] context object. All
//! mutation and notification is synchronous and single-threaded; network
//! fetching lives with the caller, which feeds results back via
//! [`Cache::put_history_page`] and the collection `put` methods.
//!
//! Re-exports the building blocks so applications can depend on this crate
//! alone.

mod cache;
mod error;
mod types;

pub use cache::{Cache, PageResult};
pub use error::{CacheError, Result};
pub use types::{Chat, Message, PeerId, User, UserId};

pub use parlor_cache_core::{
    Action, ChangeBatch, ChangeEvent, Collection, Keyed, ListIndex, OrderDiff, OrderIndex,
    Placement, Stream, Subscription,
};
pub use parlor_cache_history::{
    Anchor, Chunk, ChunkRef, Edge, HistoryEngine, HistoryError, MergeOutcome, MsgId, PeerTimeline,
};
