//! Gap-aware paginated history for the Parlor cache.
//!
//! Per partition (one conversation), the canonical state is an ordered set
//! of disjoint [`Chunk`]s: contiguous, gap-free runs of known message ids
//! with sentinel knowledge of the absolute newest/oldest ends. Consumers
//! never mutate chunks directly; they open a [`ChunkRef`] anchored at an
//! [`Anchor`] and contribute fetched pages through it. The engine merges
//! each page into canonical storage, combining every chunk the page
//! overlaps or touches, and notifies all affected references with the
//! merged snapshot.
//!
//! [`PeerTimeline`] is the lighter single-window sibling for callers that
//! only ever track one contiguous run per peer.

mod chunk;
mod engine;
mod error;
pub mod merge;
mod reference;
mod timeline;

/// Message identifier. Ordered; ids are opaque otherwise.
pub type MsgId = i64;

pub use chunk::{Chunk, Edge};
pub use engine::{Anchor, HistoryEngine, PartitionKey};
pub use error::{HistoryError, Result};
pub use reference::ChunkRef;
pub use timeline::{MergeOutcome, PeerTimeline};
