//! Chunk references: windowed handles into a partition's chunk store.

use std::cell::RefCell;
use std::rc::Rc;

use parlor_cache_core::Stream;

use crate::chunk::Chunk;
use crate::engine::{self, EngineInner, PartitionKey, RefId};
use crate::error::Result;

/// A live handle onto one chunk of a partition's history.
///
/// A reference follows its chunk through merges: when the chunk it is
/// attached to is combined with neighbours, the reference transparently
/// attaches to the merged result and [`ChunkRef::history`] delivers the new
/// snapshot. Dropping the reference releases it; [`ChunkRef::revoke`] keeps
/// the handle alive but makes further contributions fail.
pub struct ChunkRef<P: PartitionKey> {
    inner: Rc<RefCell<EngineInner<P>>>,
    id: RefId,
}

impl<P: PartitionKey> ChunkRef<P> {
    pub(crate) fn new(inner: Rc<RefCell<EngineInner<P>>>, id: RefId) -> Self {
        Self { inner, id }
    }

    /// Stream of chunk snapshots. Fires once per engine mutation that
    /// affects this reference's chunk, after the store is consistent.
    pub fn history(&self) -> Stream<Chunk> {
        engine::reference_stream(&self.inner, self.id)
    }

    /// The chunk this reference is currently attached to, if any.
    pub fn current(&self) -> Option<Chunk> {
        engine::reference_current(&self.inner, self.id)
    }

    /// Whether the reference is attached to a stored chunk.
    pub fn is_attached(&self) -> bool {
        self.current().is_some()
    }

    /// Contribute a fetched page through this reference.
    ///
    /// The payload merges with every stored chunk it overlaps or touches;
    /// if this reference was not yet attached, it attaches to the result and
    /// receives an initial snapshot even when the store did not change.
    pub fn put_chunk(&self, payload: Chunk) -> Result<()> {
        engine::put_chunk_impl(&self.inner, self.id, payload)
    }

    /// Permanently disable the reference. It detaches from its chunk and
    /// every later [`ChunkRef::put_chunk`] fails with
    /// [`crate::HistoryError::Revoked`]. Stored chunks are unaffected.
    pub fn revoke(&self) {
        engine::reference_revoke(&self.inner, self.id, false);
    }
}

impl<P: PartitionKey> Drop for ChunkRef<P> {
    fn drop(&mut self) {
        engine::reference_revoke(&self.inner, self.id, true);
    }
}
