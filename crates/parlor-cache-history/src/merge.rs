//! Ordered-array merge primitive.
//!
//! Shared by the chunk engine and the peer timeline so the two history
//! representations cannot drift apart in merge semantics.

use crate::MsgId;

/// Merge two strictly descending id slices into one strictly descending,
/// de-duplicated vector.
pub fn merge_descending(a: &[MsgId], b: &[MsgId]) -> Vec<MsgId> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let next = if a[i] > b[j] {
            let v = a[i];
            i += 1;
            v
        } else if b[j] > a[i] {
            let v = b[j];
            j += 1;
            v
        } else {
            let v = a[i];
            i += 1;
            j += 1;
            v
        };
        if out.last() != Some(&next) {
            out.push(next);
        }
    }
    for &v in &a[i..] {
        if out.last() != Some(&v) {
            out.push(v);
        }
    }
    for &v in &b[j..] {
        if out.last() != Some(&v) {
            out.push(v);
        }
    }
    out
}

/// Whether `ids` is strictly descending (the canonical chunk order).
pub fn is_strictly_descending(ids: &[MsgId]) -> bool {
    ids.windows(2).all(|w| w[0] > w[1])
}

/// Position of `id` in a strictly descending slice, if present.
pub fn find_descending(ids: &[MsgId], id: MsgId) -> Option<usize> {
    ids.binary_search_by(|probe| id.cmp(probe)).ok()
}
