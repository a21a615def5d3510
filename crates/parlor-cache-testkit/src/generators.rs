//! Proptest generators for property-based testing.

use proptest::prelude::*;

use parlor_cache::{Message, MsgId, PeerId};

/// Generate a message id from a deliberately small space so that scripts
/// revisit the same ids often.
pub fn msg_id() -> impl Strategy<Value = MsgId> {
    0i64..200
}

/// Generate a strictly descending id vector (not necessarily contiguous).
pub fn descending_ids(max_len: usize) -> impl Strategy<Value = Vec<MsgId>> {
    prop::collection::btree_set(0i64..1000, 0..=max_len).prop_map(|set| {
        let mut ids: Vec<MsgId> = set.into_iter().collect();
        ids.reverse();
        ids
    })
}

/// Generate a contiguous descending id range, the shape of a fetched page.
pub fn contiguous_range() -> impl Strategy<Value = Vec<MsgId>> {
    (0i64..200, 1i64..=30).prop_map(|(start, len)| (start..start + len).rev().collect())
}

/// Generate a message in `peer` from the small id space.
pub fn message(peer: &str) -> impl Strategy<Value = Message> {
    let peer = PeerId::from(peer);
    (msg_id(), 0i64..100, ".{0,12}").prop_map(move |(id, date, text)| Message {
        peer: peer.clone(),
        id,
        sender: 1,
        text,
        date,
    })
}

/// One step of a randomized store script.
#[derive(Debug, Clone)]
pub enum StoreOp {
    Put(Message),
    Remove(MsgId),
}

fn store_op(peer: &'static str) -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        3 => message(peer).prop_map(StoreOp::Put),
        1 => msg_id().prop_map(StoreOp::Remove),
    ]
}

/// Generate a script of puts and removes over one peer's messages.
pub fn store_script(peer: &'static str, max_len: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    prop::collection::vec(store_op(peer), 0..=max_len)
}

/// Generate a script of change batches over one peer's messages. Each step
/// holds one or more ops applied inside a single batch scope, so observers
/// see them as one change batch.
pub fn batched_store_script(
    peer: &'static str,
    max_batches: usize,
) -> impl Strategy<Value = Vec<Vec<StoreOp>>> {
    prop::collection::vec(
        prop::collection::vec(store_op(peer), 1..=5),
        0..=max_batches,
    )
}

/// One step of a randomized history script. Reference indices are taken
/// modulo the number of open references.
#[derive(Debug, Clone)]
pub enum HistoryOp {
    /// Contribute a page through reference `reference % live_refs`.
    Put {
        reference: usize,
        ids: Vec<MsgId>,
        oldest_reached: bool,
        newest_reached: bool,
    },
    /// Delete one id from the partition.
    Remove(MsgId),
}

/// Generate a script of page contributions and deletions.
pub fn history_script(max_len: usize) -> impl Strategy<Value = Vec<HistoryOp>> {
    let op = prop_oneof![
        4 => (0usize..4, contiguous_range(), prop::bool::weighted(0.2), prop::bool::weighted(0.2)).prop_map(
            |(reference, ids, oldest_reached, newest_reached)| HistoryOp::Put {
                reference,
                ids,
                oldest_reached,
                newest_reached,
            }
        ),
        1 => (0i64..230).prop_map(HistoryOp::Remove),
    ];
    prop::collection::vec(op, 1..=max_len)
}
