//! Comparator-ordered index maintained incrementally from a change stream.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::{Bound, RangeBounds};
use std::rc::{Rc, Weak};

use crate::item::{Action, ChangeBatch, Keyed};
use crate::store::KeyedStore;
use crate::stream::{Stream, Subscription};

/// Total order over items. Ties keep stable relative order only to the extent
/// the binary search happens to preserve it — comparators intended for UI
/// lists should break ties deterministically (e.g. by key) to avoid jitter.
pub type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering>;

/// Membership predicate. Items failing the filter are absent from the index.
pub type FilterFn<T> = Box<dyn Fn(&T) -> bool>;

/// A positional change to an ordered index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderDiff<K> {
    /// `key` was inserted at `pos`.
    Add { pos: usize, key: K },
    /// `key` was removed from `pos`.
    Remove { pos: usize, key: K },
    /// `key` moved from `from` to `to` (positions after the move).
    Move { from: usize, to: usize, key: K },
}

struct OrderShared<T: Keyed> {
    store: Rc<KeyedStore<T>>,
    ids: RefCell<Vec<T::Key>>,
    cmp: Comparator<T>,
    filter: Option<FilterFn<T>>,
    changes: Stream<Vec<OrderDiff<T::Key>>>,
    subscription: RefCell<Option<Subscription>>,
}

/// A derived index keeping keys sorted by a comparator, restricted by an
/// optional filter, updated incrementally as store changes arrive.
///
/// Invariant: the sequence contains exactly the keys of filter-passing items
/// currently in the store, in comparator order, one entry per key.
pub struct OrderIndex<T: Keyed> {
    shared: Rc<OrderShared<T>>,
}

impl<T: Keyed> Clone for OrderIndex<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: Keyed + 'static> OrderIndex<T> {
    /// Build the index: seed from current store contents, then follow the
    /// store's change stream. Lives until the last handle is dropped.
    pub(crate) fn new(
        store: Rc<KeyedStore<T>>,
        cmp: Comparator<T>,
        filter: Option<FilterFn<T>>,
    ) -> Self {
        let mut seed: Vec<T> = store.get_all();
        if let Some(f) = &filter {
            seed.retain(|item| f(item));
        }
        seed.sort_by(|a, b| cmp(a, b));
        let ids = seed.into_iter().map(|item| item.key()).collect();

        let shared = Rc::new(OrderShared {
            store: Rc::clone(&store),
            ids: RefCell::new(ids),
            cmp,
            filter,
            changes: Stream::new(),
            subscription: RefCell::new(None),
        });

        let weak: Weak<OrderShared<T>> = Rc::downgrade(&shared);
        let sub = store.changes().subscribe(move |batch: &ChangeBatch<T>| {
            if let Some(shared) = weak.upgrade() {
                Self::apply(&shared, batch);
            }
        });
        *shared.subscription.borrow_mut() = Some(sub);

        Self { shared }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Number of keys currently in the index.
    pub fn len(&self) -> usize {
        self.shared.ids.borrow().len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.shared.ids.borrow().is_empty()
    }

    /// Key at `index`, if in bounds.
    pub fn id_at(&self, index: usize) -> Option<T::Key> {
        self.shared.ids.borrow().get(index).cloned()
    }

    /// Item at `index`, if in bounds and still resolvable in the store.
    pub fn item_at(&self, index: usize) -> Option<T> {
        self.id_at(index).and_then(|key| self.shared.store.get(&key))
    }

    /// Keys in `range` (clamped to the index length).
    pub fn ids(&self, range: impl RangeBounds<usize>) -> Vec<T::Key> {
        let ids = self.shared.ids.borrow();
        let (start, end) = clamp_range(range, ids.len());
        ids[start..end].to_vec()
    }

    /// Items in `range`, skipping keys no longer resolvable in the store.
    pub fn items(&self, range: impl RangeBounds<usize>) -> Vec<T> {
        self.ids(range)
            .iter()
            .filter_map(|key| self.shared.store.get(key))
            .collect()
    }

    /// Positional diff stream. One batch per incoming store change batch.
    pub fn changes(&self) -> Stream<Vec<OrderDiff<T::Key>>> {
        self.shared.changes.clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Incremental maintenance
    // ─────────────────────────────────────────────────────────────────────

    fn apply(shared: &OrderShared<T>, batch: &ChangeBatch<T>) {
        let mut diffs = Vec::new();
        {
            let mut ids = shared.ids.borrow_mut();
            // The store already holds every post-batch value, so a key whose
            // event has not been processed yet may sit at a stale position
            // while resolving to its new item. Such keys must not steer the
            // binary search; they are re-placed when their own event runs.
            let mut pending: HashMap<T::Key, usize> = HashMap::new();
            for ev in batch {
                *pending.entry(ev.key.clone()).or_insert(0) += 1;
            }
            for ev in batch {
                match pending.get_mut(&ev.key) {
                    Some(n) if *n > 1 => *n -= 1,
                    _ => {
                        pending.remove(&ev.key);
                    }
                }
                let passes = match ev.action {
                    Action::Remove => false,
                    Action::Add | Action::Update => shared
                        .filter
                        .as_ref()
                        .map_or(true, |f| f(&ev.item)),
                };
                let current = ids.iter().position(|k| *k == ev.key);

                match (current, passes) {
                    (None, true) => {
                        let pos = Self::insertion_pos(shared, &ids, &ev.item, &pending);
                        ids.insert(pos, ev.key.clone());
                        diffs.push(OrderDiff::Add {
                            pos,
                            key: ev.key.clone(),
                        });
                    }
                    (Some(pos), false) => {
                        ids.remove(pos);
                        diffs.push(OrderDiff::Remove {
                            pos,
                            key: ev.key.clone(),
                        });
                    }
                    (Some(old_pos), true) => {
                        ids.remove(old_pos);
                        let new_pos = Self::insertion_pos(shared, &ids, &ev.item, &pending);
                        ids.insert(new_pos, ev.key.clone());
                        if new_pos != old_pos {
                            diffs.push(OrderDiff::Move {
                                from: old_pos,
                                to: new_pos,
                                key: ev.key.clone(),
                            });
                        }
                    }
                    (None, false) => {}
                }
            }
        }
        if !diffs.is_empty() {
            shared.changes.emit(&diffs);
        }
    }

    /// Binary-search insertion point for `item` among keys whose positions
    /// are consistent with their store values. A probe is unusable when its
    /// key no longer resolves in the store or still has an unprocessed event
    /// in `pending`; the search then falls back to the nearest usable probe
    /// at or left of the midpoint. Unusable keys are re-placed by their own
    /// events, so `item` only has to land correctly relative to the rest.
    fn insertion_pos(
        shared: &OrderShared<T>,
        ids: &[T::Key],
        item: &T,
        pending: &HashMap<T::Key, usize>,
    ) -> usize {
        let mut lo = 0;
        let mut hi = ids.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let probe = (lo..=mid).rev().find_map(|p| {
                if pending.contains_key(&ids[p]) {
                    return None;
                }
                shared.store.get(&ids[p]).map(|other| (p, other))
            });
            match probe {
                None => lo = mid + 1,
                Some((p, other)) => match (shared.cmp)(item, &other) {
                    Ordering::Greater => lo = mid + 1,
                    Ordering::Less | Ordering::Equal => hi = p,
                },
            }
        }
        lo
    }
}

pub(crate) fn clamp_range(range: impl RangeBounds<usize>, len: usize) -> (usize, usize) {
    let start = match range.start_bound() {
        Bound::Included(&s) => s,
        Bound::Excluded(&s) => s.saturating_add(1),
        Bound::Unbounded => 0,
    }
    .min(len);
    let end = match range.end_bound() {
        Bound::Included(&e) => e.saturating_add(1),
        Bound::Excluded(&e) => e,
        Bound::Unbounded => len,
    }
    .min(len);
    (start, end.max(start))
}
