//! Canonical per-partition chunk storage and the merge algorithm.
//!
//! Each partition (one conversation) holds an ordered sequence of disjoint,
//! non-touching chunks, newest first. All growth goes through the reference
//! merge path: a [`crate::reference::ChunkRef`] contributes a fetched page,
//! the engine locates every stored chunk the page overlaps or touches,
//! combines the whole run with the page into a single chunk, and notifies
//! every reference attached to the result exactly once.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;

use parlor_cache_core::Stream;

use crate::chunk::{Chunk, Edge};
use crate::error::{HistoryError, Result};
use crate::merge::{find_descending, is_strictly_descending, merge_descending};
use crate::reference::ChunkRef;
use crate::MsgId;

/// Key identifying one logical partition (e.g. one conversation).
pub trait PartitionKey: Clone + Eq + Hash + Debug + 'static {}

impl<P: Clone + Eq + Hash + Debug + 'static> PartitionKey for P {}

/// Where a new reference is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The newest known messages (+∞). Always resolves to some chunk:
    /// creating the reference seeds an empty `newest_reached` chunk.
    Newest,
    /// The oldest known messages (−∞), analogous.
    Oldest,
    /// A concrete message id. Attaches immediately only if an existing chunk
    /// already covers it; otherwise the reference attaches on its first
    /// `put_chunk`.
    Id(MsgId),
}

pub(crate) type RefId = u64;

pub(crate) struct RefState<P> {
    pub(crate) partition: P,
    pub(crate) anchor: Anchor,
    pub(crate) attached: bool,
    pub(crate) revoked: bool,
    pub(crate) stream: Stream<Chunk>,
}

impl<P> RefState<P> {
    /// Whether `chunk` covers this reference's anchor position.
    fn anchor_covered_by(&self, chunk: &Chunk) -> bool {
        match self.anchor {
            Anchor::Newest => chunk.newest_reached,
            Anchor::Oldest => chunk.oldest_reached,
            Anchor::Id(target) => chunk.covers(target),
        }
    }
}

struct Slot {
    chunk: Chunk,
    /// References attached to this chunk. A reference is attached to at most
    /// one slot at a time.
    refs: Vec<RefId>,
}

impl Slot {
    fn oldest(&self) -> Edge {
        self.chunk.oldest_edge().unwrap_or_else(|| {
            tracing::error!("vacant chunk in store; treating as covering nothing");
            Edge::PosInf
        })
    }

    fn newest(&self) -> Edge {
        self.chunk.newest_edge().unwrap_or_else(|| {
            tracing::error!("vacant chunk in store; treating as covering nothing");
            Edge::NegInf
        })
    }
}

#[derive(Default)]
struct Partition {
    /// Disjoint, non-touching chunks, newest first.
    chunks: Vec<Slot>,
}

pub(crate) struct EngineInner<P> {
    partitions: HashMap<P, Partition>,
    refs: HashMap<RefId, RefState<P>>,
    next_ref: RefId,
}

/// The history-chunk engine: per-partition chunk stores plus the registry of
/// live chunk references.
///
/// The engine exclusively owns all chunk and reference lifetime; a
/// [`ChunkRef`] is a handle, never copied ownership.
pub struct HistoryEngine<P: PartitionKey> {
    inner: Rc<RefCell<EngineInner<P>>>,
}

impl<P: PartitionKey> Clone for HistoryEngine<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: PartitionKey> Default for HistoryEngine<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PartitionKey> HistoryEngine<P> {
    /// Create an engine with no partitions and no references.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(EngineInner {
                partitions: HashMap::new(),
                refs: HashMap::new(),
                next_ref: 0,
            })),
        }
    }

    /// Open a reference into `partition` anchored at `anchor`.
    pub fn reference(&self, partition: P, anchor: Anchor) -> ChunkRef<P> {
        let ref_id = {
            let mut inner = self.inner.borrow_mut();
            let ref_id = inner.next_ref;
            inner.next_ref += 1;
            inner.refs.insert(
                ref_id,
                RefState {
                    partition: partition.clone(),
                    anchor,
                    attached: false,
                    revoked: false,
                    stream: Stream::new(),
                },
            );
            ref_id
        };

        match anchor {
            Anchor::Newest => {
                if let Err(err) = put_chunk_impl(&self.inner, ref_id, Chunk::at_newest()) {
                    tracing::error!(%err, "seeding newest-anchored reference failed");
                }
            }
            Anchor::Oldest => {
                if let Err(err) = put_chunk_impl(&self.inner, ref_id, Chunk::at_oldest()) {
                    tracing::error!(%err, "seeding oldest-anchored reference failed");
                }
            }
            Anchor::Id(target) => {
                let mut inner = self.inner.borrow_mut();
                let EngineInner {
                    partitions, refs, ..
                } = &mut *inner;
                if let Some(part) = partitions.get_mut(&partition) {
                    prune_invalid(part, refs);
                    let idx = part
                        .chunks
                        .partition_point(|s| s.oldest() > Edge::Id(target));
                    if idx < part.chunks.len() && part.chunks[idx].chunk.covers(target) {
                        part.chunks[idx].refs.push(ref_id);
                        if let Some(state) = refs.get_mut(&ref_id) {
                            state.attached = true;
                        }
                    }
                }
            }
        }

        ChunkRef::new(Rc::clone(&self.inner), ref_id)
    }

    /// Remove one id from the partition's chunk store.
    ///
    /// If the containing chunk ends up with no ids and no sentinel knowledge
    /// it is deleted entirely; its references detach. Attached references are
    /// notified regardless.
    pub fn remove_id(&self, partition: &P, id: MsgId) {
        let notifications: Vec<(Stream<Chunk>, Chunk)> = {
            let mut inner = self.inner.borrow_mut();
            let EngineInner {
                partitions, refs, ..
            } = &mut *inner;
            let Some(part) = partitions.get_mut(partition) else {
                return;
            };
            prune_invalid(part, refs);

            let idx = part.chunks.partition_point(|s| s.oldest() > Edge::Id(id));
            if idx >= part.chunks.len() || !part.chunks[idx].chunk.covers(id) {
                return;
            }
            let slot = &mut part.chunks[idx];
            let Some(pos) = find_descending(&slot.chunk.ids, id) else {
                // Covered but not a member: the id provably does not exist.
                return;
            };
            slot.chunk.ids.remove(pos);

            let snapshot = slot.chunk.clone();
            let slot_refs = slot.refs.clone();
            if slot.chunk.is_vacant() {
                part.chunks.remove(idx);
                for rid in &slot_refs {
                    if let Some(state) = refs.get_mut(rid) {
                        state.attached = false;
                    }
                }
            }
            slot_refs
                .iter()
                .filter_map(|rid| {
                    refs.get(rid)
                        .map(|state| (state.stream.clone(), snapshot.clone()))
                })
                .collect()
        };

        for (stream, snapshot) in notifications {
            stream.emit(&snapshot);
        }
    }

    /// Snapshot of the partition's chunks, newest first. Read-only; used by
    /// persistence collaborators and tests.
    pub fn chunks(&self, partition: &P) -> Vec<Chunk> {
        self.inner
            .borrow()
            .partitions
            .get(partition)
            .map(|part| part.chunks.iter().map(|s| s.chunk.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of live (non-revoked) references across all partitions.
    pub fn reference_count(&self) -> usize {
        self.inner
            .borrow()
            .refs
            .values()
            .filter(|state| !state.revoked)
            .count()
    }
}

/// Drop stored chunks that violate the "never vacant, always descending"
/// invariant. This is a defensive fallback, not a documented success path.
fn prune_invalid<P>(part: &mut Partition, refs: &mut HashMap<RefId, RefState<P>>) {
    part.chunks.retain(|slot| {
        if slot.chunk.is_valid() {
            return true;
        }
        tracing::error!("dropping invalid chunk from store");
        for rid in &slot.refs {
            if let Some(state) = refs.get_mut(rid) {
                state.attached = false;
            }
        }
        false
    });
}

/// The central merge: contribute `payload` through reference `ref_id`.
///
/// Steps: validate; locate the contiguous run of stored chunks whose ranges
/// overlap or touch the payload (widened to include the reference's own chunk
/// if attached); combine the run and the payload into one chunk; splice it
/// back; notify every attached reference once; attach the contributing
/// reference if it was not attached yet.
pub(crate) fn put_chunk_impl<P: PartitionKey>(
    inner: &Rc<RefCell<EngineInner<P>>>,
    ref_id: RefId,
    payload: Chunk,
) -> Result<()> {
    let notifications: Vec<(Stream<Chunk>, Chunk)> = {
        let mut inner = inner.borrow_mut();

        let state = inner
            .refs
            .get(&ref_id)
            .ok_or(HistoryError::UnknownReference)?;
        if state.revoked {
            tracing::warn!("put_chunk on a revoked chunk reference");
            return Err(HistoryError::Revoked);
        }
        // Nothing fetched: not an error, nothing to do.
        if payload.is_vacant() {
            return Ok(());
        }
        if !is_strictly_descending(&payload.ids) {
            tracing::warn!("put_chunk payload ids are not strictly descending");
            return Err(HistoryError::InvalidChunk("ids must be strictly descending"));
        }
        let partition = state.partition.clone();
        let was_attached = state.attached;

        let EngineInner {
            partitions, refs, ..
        } = &mut *inner;
        let part = partitions.entry(partition.clone()).or_default();
        prune_invalid(part, refs);

        let (Some(new_newest), Some(new_oldest)) = (payload.newest_edge(), payload.oldest_edge())
        else {
            // Unreachable: non-vacant chunks always have edges.
            tracing::error!("non-vacant payload without edges");
            return Ok(());
        };

        // Locate the run of chunks intersecting [new_oldest, new_newest],
        // widened by one id on each concrete end so touching chunks merge.
        let chunks = &mut part.chunks;
        let mut start = chunks.partition_point(|s| s.oldest() > new_newest.succ());
        let mut end = chunks.partition_point(|s| s.newest() >= new_oldest.pred());

        // A reference's own chunk is always part of the merge target, even
        // if the new data no longer overlaps it spatially. This prevents
        // orphaning the reference.
        if was_attached {
            if let Some(idx) = chunks.iter().position(|s| s.refs.contains(&ref_id)) {
                start = start.min(idx);
                end = end.max(idx + 1);
            }
        }

        // Combine the run without touching the store yet, to detect no-ops.
        let mut combined: Vec<MsgId> = Vec::new();
        let mut oldest = false;
        let mut newest = false;
        for slot in &chunks[start..end] {
            combined = merge_descending(&combined, &slot.chunk.ids);
            oldest |= slot.chunk.oldest_reached;
            newest |= slot.chunk.newest_reached;
        }
        let known = combined.len();
        let merged = merge_descending(&combined, &payload.ids);
        let flags_flip =
            (payload.oldest_reached && !oldest) || (payload.newest_reached && !newest);
        let changed = end - start != 1 || merged.len() != known || flags_flip;

        if !changed {
            if was_attached {
                return Ok(());
            }
            // First contribution that adds nothing new: attach to the single
            // run chunk and deliver the initial snapshot.
            let slot = &mut chunks[start];
            slot.refs.push(ref_id);
            let snapshot = slot.chunk.clone();
            let stream = match refs.get_mut(&ref_id) {
                Some(state) => {
                    state.attached = true;
                    state.stream.clone()
                }
                None => return Err(HistoryError::UnknownReference),
            };
            vec![(stream, snapshot)]
        } else {
            let chunk = Chunk::new(
                merged,
                oldest | payload.oldest_reached,
                newest | payload.newest_reached,
            );
            let mut attached_refs: Vec<RefId> = chunks[start..end]
                .iter()
                .flat_map(|s| s.refs.iter().copied())
                .collect();
            if !was_attached {
                attached_refs.push(ref_id);
                if let Some(state) = refs.get_mut(&ref_id) {
                    state.attached = true;
                }
            }

            // The merged chunk may now cover anchors of references that were
            // opened before their target id was loaded; they attach here and
            // get the same single notification as everyone else.
            for (rid, state) in refs.iter_mut() {
                if state.attached
                    || state.revoked
                    || *rid == ref_id
                    || state.partition != partition
                    || !state.anchor_covered_by(&chunk)
                {
                    continue;
                }
                state.attached = true;
                attached_refs.push(*rid);
            }

            let slot = Slot {
                chunk: chunk.clone(),
                refs: attached_refs,
            };
            chunks.splice(start..end, std::iter::once(slot));

            debug_assert!(
                chunks
                    .windows(2)
                    .all(|w| w[0].oldest() > w[1].newest().succ()),
                "chunk store must stay disjoint and non-touching"
            );

            chunks[start]
                .refs
                .iter()
                .filter_map(|rid| {
                    refs.get(rid)
                        .map(|state| (state.stream.clone(), chunk.clone()))
                })
                .collect()
        }
    };

    for (stream, snapshot) in notifications {
        stream.emit(&snapshot);
    }
    Ok(())
}

// Reference-side plumbing, kept here so `EngineInner` stays private to the
// module pair.

pub(crate) fn reference_stream<P: PartitionKey>(
    inner: &Rc<RefCell<EngineInner<P>>>,
    ref_id: RefId,
) -> Stream<Chunk> {
    inner
        .borrow()
        .refs
        .get(&ref_id)
        .map(|state| state.stream.clone())
        .unwrap_or_default()
}

pub(crate) fn reference_current<P: PartitionKey>(
    inner: &Rc<RefCell<EngineInner<P>>>,
    ref_id: RefId,
) -> Option<Chunk> {
    let inner = inner.borrow();
    let state = inner.refs.get(&ref_id)?;
    if !state.attached {
        return None;
    }
    let part = inner.partitions.get(&state.partition)?;
    part.chunks
        .iter()
        .find(|slot| slot.refs.contains(&ref_id))
        .map(|slot| slot.chunk.clone())
}

pub(crate) fn reference_revoke<P: PartitionKey>(
    inner: &Rc<RefCell<EngineInner<P>>>,
    ref_id: RefId,
    forget: bool,
) {
    let mut inner = inner.borrow_mut();
    let EngineInner {
        partitions, refs, ..
    } = &mut *inner;
    if let Some(state) = refs.get_mut(&ref_id) {
        state.revoked = true;
        state.attached = false;
        if let Some(part) = partitions.get_mut(&state.partition) {
            for slot in &mut part.chunks {
                slot.refs.retain(|rid| *rid != ref_id);
            }
        }
    }
    if forget {
        refs.remove(&ref_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc as StdRc;

    fn desc(hi: MsgId, lo: MsgId) -> Vec<MsgId> {
        (lo..=hi).rev().collect()
    }

    #[test]
    fn test_newest_anchor_always_resolves() {
        let engine: HistoryEngine<&str> = HistoryEngine::new();
        let r = engine.reference("chat", Anchor::Newest);

        let current = r.current().unwrap();
        assert!(current.newest_reached);
        assert!(current.ids.is_empty());
        assert_eq!(engine.chunks(&"chat").len(), 1);
    }

    #[test]
    fn test_two_page_load_builds_one_chunk() {
        let engine: HistoryEngine<&str> = HistoryEngine::new();
        let r = engine.reference("chat", Anchor::Newest);

        r.put_chunk(Chunk::new(desc(50, 31), false, true)).unwrap();
        r.put_chunk(Chunk::new(desc(30, 11), false, false)).unwrap();

        let chunks = engine.chunks(&"chat");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ids, desc(50, 11));
        assert!(chunks[0].newest_reached);
        assert!(!chunks[0].oldest_reached);
    }

    #[test]
    fn test_disjoint_pages_stay_separate_until_bridged() {
        let engine: HistoryEngine<&str> = HistoryEngine::new();
        let a = engine.reference("chat", Anchor::Newest);
        let b = engine.reference("chat", Anchor::Id(10));

        a.put_chunk(Chunk::new(desc(50, 40), false, true)).unwrap();
        b.put_chunk(Chunk::new(desc(15, 5), false, false)).unwrap();
        assert_eq!(engine.chunks(&"chat").len(), 2);

        // Bridge the gap; everything collapses into one chunk.
        a.put_chunk(Chunk::new(desc(42, 13), false, false)).unwrap();
        let chunks = engine.chunks(&"chat");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ids, desc(50, 5));
    }

    #[test]
    fn test_touching_chunks_merge() {
        let engine: HistoryEngine<&str> = HistoryEngine::new();
        let a = engine.reference("chat", Anchor::Id(9));
        let b = engine.reference("chat", Anchor::Id(6));

        a.put_chunk(Chunk::new(vec![10, 9, 8], false, false)).unwrap();
        // 7 touches 8: no integer id can exist between them.
        b.put_chunk(Chunk::new(vec![7, 6, 5], false, false)).unwrap();

        let chunks = engine.chunks(&"chat");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ids, vec![10, 9, 8, 7, 6, 5]);
    }

    #[test]
    fn test_put_chunk_is_idempotent() {
        let engine: HistoryEngine<&str> = HistoryEngine::new();
        let r = engine.reference("chat", Anchor::Newest);

        let notified = StdRc::new(StdRefCell::new(0));
        let n = StdRc::clone(&notified);
        let _sub = r.history().subscribe(move |_| *n.borrow_mut() += 1);

        let page = Chunk::new(desc(20, 11), false, true);
        r.put_chunk(page.clone()).unwrap();
        let after_first = *notified.borrow();
        let chunks_first = engine.chunks(&"chat");

        r.put_chunk(page).unwrap();
        assert_eq!(*notified.borrow(), after_first, "second put must not notify");
        assert_eq!(engine.chunks(&"chat"), chunks_first);
    }

    #[test]
    fn test_late_reference_attaches_on_coverage() {
        let engine: HistoryEngine<&str> = HistoryEngine::new();
        let a = engine.reference("chat", Anchor::Newest);
        let b = engine.reference("chat", Anchor::Id(25));
        assert_eq!(b.current(), None);

        let seen = StdRc::new(StdRefCell::new(Vec::new()));
        let s = StdRc::clone(&seen);
        let _sub = b.history().subscribe(move |c: &Chunk| s.borrow_mut().push(c.clone()));

        a.put_chunk(Chunk::new(desc(50, 31), false, true)).unwrap();
        assert_eq!(b.current(), None, "25 not covered yet");

        a.put_chunk(Chunk::new(desc(30, 11), false, false)).unwrap();
        // The merge covering id 25 attaches B and notifies it with the
        // merged chunk.
        let current = b.current().unwrap();
        assert_eq!(current.ids, desc(50, 11));
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].ids, desc(50, 11));
    }

    #[test]
    fn test_merge_notifies_each_reference_once() {
        let engine: HistoryEngine<&str> = HistoryEngine::new();
        let a = engine.reference("chat", Anchor::Id(40));
        let b = engine.reference("chat", Anchor::Id(10));

        a.put_chunk(Chunk::new(desc(45, 35), false, false)).unwrap();
        b.put_chunk(Chunk::new(desc(15, 5), false, false)).unwrap();

        let count = StdRc::new(StdRefCell::new(0));
        let c = StdRc::clone(&count);
        let _sub = b.history().subscribe(move |_| *c.borrow_mut() += 1);

        // One merge consumes both stored chunks; B gets exactly one
        // notification reflecting the final state, not one per step.
        a.put_chunk(Chunk::new(desc(36, 14), false, false)).unwrap();
        assert_eq!(*count.borrow(), 1);
        assert_eq!(b.current().unwrap().ids, desc(45, 5));
    }

    #[test]
    fn test_remove_id_keeps_chunk_and_notifies() {
        let engine: HistoryEngine<&str> = HistoryEngine::new();
        let r = engine.reference("chat", Anchor::Newest);
        r.put_chunk(Chunk::new(desc(10, 5), false, true)).unwrap();

        let seen = StdRc::new(StdRefCell::new(Vec::new()));
        let s = StdRc::clone(&seen);
        let _sub = r.history().subscribe(move |c: &Chunk| s.borrow_mut().push(c.ids.clone()));

        engine.remove_id(&"chat", 7);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0], vec![10, 9, 8, 6, 5]);
        // The chunk still claims the same range; 7 provably does not exist.
        assert!(engine.chunks(&"chat")[0].covers(7));
    }

    #[test]
    fn test_remove_last_id_collapses_sentinel_free_chunk() {
        let engine: HistoryEngine<&str> = HistoryEngine::new();
        let r = engine.reference("chat", Anchor::Id(5));
        r.put_chunk(Chunk::new(vec![5], false, false)).unwrap();
        assert_eq!(engine.chunks(&"chat").len(), 1);

        engine.remove_id(&"chat", 5);
        assert!(engine.chunks(&"chat").is_empty());
        assert_eq!(r.current(), None, "reference detached from deleted chunk");

        // A later put near id 5 starts a fresh chunk, not stale state.
        r.put_chunk(Chunk::new(vec![6, 4], false, false)).unwrap();
        let chunks = engine.chunks(&"chat");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ids, vec![6, 4]);
    }

    #[test]
    fn test_remove_id_in_gap_is_noop() {
        let engine: HistoryEngine<&str> = HistoryEngine::new();
        let r = engine.reference("chat", Anchor::Newest);
        r.put_chunk(Chunk::new(vec![50, 49], false, true)).unwrap();

        engine.remove_id(&"chat", 30);
        engine.remove_id(&"other", 1);
        assert_eq!(engine.chunks(&"chat")[0].ids, vec![50, 49]);
    }

    #[test]
    fn test_vacant_payload_is_noop() {
        let engine: HistoryEngine<&str> = HistoryEngine::new();
        let r = engine.reference("chat", Anchor::Id(5));
        r.put_chunk(Chunk::default()).unwrap();
        assert!(engine.chunks(&"chat").is_empty());
        assert_eq!(r.current(), None);
    }

    #[test]
    fn test_ascending_payload_is_rejected() {
        let engine: HistoryEngine<&str> = HistoryEngine::new();
        let r = engine.reference("chat", Anchor::Newest);
        let err = r.put_chunk(Chunk::new(vec![1, 2, 3], false, false));
        assert_eq!(
            err,
            Err(HistoryError::InvalidChunk("ids must be strictly descending"))
        );
    }

    #[test]
    fn test_empty_conversation_is_representable() {
        let engine: HistoryEngine<&str> = HistoryEngine::new();
        let r = engine.reference("chat", Anchor::Newest);
        r.put_chunk(Chunk::new(vec![], true, true)).unwrap();

        let current = r.current().unwrap();
        assert!(current.ids.is_empty());
        assert!(current.oldest_reached && current.newest_reached);
    }
}
