//! Chunks: contiguous, gap-free runs of known message ids.

use serde::{Deserialize, Serialize};

use crate::merge::is_strictly_descending;
use crate::MsgId;

/// A logical position in the id order, with sentinels for the absolute ends.
///
/// `NegInf < Id(n) < PosInf` for every concrete `n`, so boundary chunks
/// compare against concrete ids without special-casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Edge {
    /// The absolute oldest position.
    NegInf,
    /// A concrete message id.
    Id(MsgId),
    /// The absolute newest position.
    PosInf,
}

impl Edge {
    /// The position one step newer. Sentinels are fixed points.
    pub fn succ(self) -> Edge {
        match self {
            Edge::Id(n) => Edge::Id(n.saturating_add(1)),
            other => other,
        }
    }

    /// The position one step older. Sentinels are fixed points.
    pub fn pred(self) -> Edge {
        match self {
            Edge::Id(n) => Edge::Id(n.saturating_sub(1)),
            other => other,
        }
    }
}

/// A contiguous run of known ids for one partition, newest first.
///
/// Within one chunk, every id between two members that exists server-side is
/// also a member: the chunk is gap-free over the range it claims. The
/// sentinel flags mean the chunk's head/tail *is* the absolute end of the
/// sequence; they are meaningful even with empty `ids` (an empty chunk with
/// both flags set represents "this conversation has zero messages").
///
/// An empty chunk with neither flag set carries no knowledge and is invalid
/// everywhere except as the `put_chunk`-level "nothing fetched" no-op
/// payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Known ids, strictly descending.
    pub ids: Vec<MsgId>,
    /// The tail of `ids` is the oldest message that exists.
    pub oldest_reached: bool,
    /// The head of `ids` is the newest message that exists.
    pub newest_reached: bool,
}

impl Chunk {
    /// A chunk of concrete ids with boundary knowledge.
    pub fn new(ids: Vec<MsgId>, oldest_reached: bool, newest_reached: bool) -> Self {
        Self {
            ids,
            oldest_reached,
            newest_reached,
        }
    }

    /// An empty chunk anchored at the newest end.
    pub fn at_newest() -> Self {
        Self {
            ids: Vec::new(),
            oldest_reached: false,
            newest_reached: true,
        }
    }

    /// An empty chunk anchored at the oldest end.
    pub fn at_oldest() -> Self {
        Self {
            ids: Vec::new(),
            oldest_reached: true,
            newest_reached: false,
        }
    }

    /// Whether the chunk carries no ids and no boundary knowledge.
    pub fn is_vacant(&self) -> bool {
        self.ids.is_empty() && !self.oldest_reached && !self.newest_reached
    }

    /// Whether `ids` is strictly descending and the chunk is not vacant.
    pub fn is_valid(&self) -> bool {
        !self.is_vacant() && is_strictly_descending(&self.ids)
    }

    /// Newest covered position. `None` for a vacant chunk.
    pub fn newest_edge(&self) -> Option<Edge> {
        if self.newest_reached {
            Some(Edge::PosInf)
        } else if let Some(&head) = self.ids.first() {
            Some(Edge::Id(head))
        } else if self.oldest_reached {
            Some(Edge::NegInf)
        } else {
            None
        }
    }

    /// Oldest covered position. `None` for a vacant chunk.
    pub fn oldest_edge(&self) -> Option<Edge> {
        if self.oldest_reached {
            Some(Edge::NegInf)
        } else if let Some(&tail) = self.ids.last() {
            Some(Edge::Id(tail))
        } else if self.newest_reached {
            Some(Edge::PosInf)
        } else {
            None
        }
    }

    /// Whether `id` lies within the chunk's covered range.
    pub fn covers(&self, id: MsgId) -> bool {
        match (self.oldest_edge(), self.newest_edge()) {
            (Some(oldest), Some(newest)) => oldest <= Edge::Id(id) && Edge::Id(id) <= newest,
            _ => false,
        }
    }

    /// Whether `id` is a member of `ids`.
    pub fn contains(&self, id: MsgId) -> bool {
        crate::merge::find_descending(&self.ids, id).is_some()
    }

    /// Number of known ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether `ids` is empty (the chunk may still carry sentinel knowledge).
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
