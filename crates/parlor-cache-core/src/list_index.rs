//! Manually curated ordered unique key set.

use std::cell::RefCell;
use std::ops::RangeBounds;
use std::rc::{Rc, Weak};

use crate::item::{Action, ChangeBatch, Keyed};
use crate::order_index::{clamp_range, OrderDiff};
use crate::store::KeyedStore;
use crate::stream::{Stream, Subscription};

/// Where to insert keys in a [`ListIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Insert before everything, preserving the given relative order.
    /// Keys already listed stay where they are.
    Start,
    /// Append after everything. Keys already listed move to the end.
    End,
}

struct ListShared<T: Keyed> {
    ids: RefCell<Vec<T::Key>>,
    changes: Stream<Vec<OrderDiff<T::Key>>>,
    subscription: RefCell<Option<Subscription>>,
}

/// An ordered unique set maintained by explicit inserts and removes, used
/// where order is not derived from item content (e.g. pinned items).
///
/// Unlike [`crate::order_index::OrderIndex`] it never re-orders or filters by
/// item value. It drops a key only when told to, or when the underlying
/// store emits a `Remove` for it. A listed key may legitimately be absent
/// from the store (e.g. pinned but not yet fetched), so readers of [`ids`]
/// must tolerate unknown keys.
///
/// [`ids`]: ListIndex::ids
pub struct ListIndex<T: Keyed> {
    shared: Rc<ListShared<T>>,
}

impl<T: Keyed> Clone for ListIndex<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: Keyed + 'static> ListIndex<T> {
    pub(crate) fn new(store: &Rc<KeyedStore<T>>) -> Self {
        let shared = Rc::new(ListShared {
            ids: RefCell::new(Vec::new()),
            changes: Stream::new(),
            subscription: RefCell::new(None),
        });

        let weak: Weak<ListShared<T>> = Rc::downgrade(&shared);
        let sub = store.changes().subscribe(move |batch: &ChangeBatch<T>| {
            let Some(shared) = weak.upgrade() else { return };
            let removed: Vec<T::Key> = batch
                .iter()
                .filter(|ev| ev.action == Action::Remove)
                .map(|ev| ev.key.clone())
                .collect();
            if !removed.is_empty() {
                Self::remove_keys(&shared, &removed);
            }
        });
        *shared.subscription.borrow_mut() = Some(sub);

        Self { shared }
    }

    /// Insert `keys` at the given placement.
    pub fn add(&self, placement: Placement, keys: Vec<T::Key>) {
        let mut diffs = Vec::new();
        {
            let mut ids = self.shared.ids.borrow_mut();
            match placement {
                Placement::Start => {
                    // Only keys not yet listed are inserted, first mention
                    // wins; they keep their relative order at the front.
                    let mut fresh: Vec<T::Key> = Vec::new();
                    for key in keys {
                        if !ids.contains(&key) && !fresh.contains(&key) {
                            fresh.push(key);
                        }
                    }
                    for (offset, key) in fresh.into_iter().enumerate() {
                        ids.insert(offset, key.clone());
                        diffs.push(OrderDiff::Add { pos: offset, key });
                    }
                }
                Placement::End => {
                    for key in keys {
                        if let Some(pos) = ids.iter().position(|k| *k == key) {
                            if pos == ids.len() - 1 {
                                continue;
                            }
                            ids.remove(pos);
                            ids.push(key.clone());
                            diffs.push(OrderDiff::Move {
                                from: pos,
                                to: ids.len() - 1,
                                key,
                            });
                        } else {
                            ids.push(key.clone());
                            diffs.push(OrderDiff::Add {
                                pos: ids.len() - 1,
                                key,
                            });
                        }
                    }
                }
            }
        }
        if !diffs.is_empty() {
            self.shared.changes.emit(&diffs);
        }
    }

    /// Remove `keys` wherever listed. Unlisted keys are ignored.
    pub fn remove(&self, keys: &[T::Key]) {
        Self::remove_keys(&self.shared, keys);
    }

    /// Whether `key` is listed.
    pub fn has(&self, key: &T::Key) -> bool {
        self.shared.ids.borrow().contains(key)
    }

    /// Keys in `range` (clamped).
    pub fn ids(&self, range: impl RangeBounds<usize>) -> Vec<T::Key> {
        let ids = self.shared.ids.borrow();
        let (start, end) = clamp_range(range, ids.len());
        ids[start..end].to_vec()
    }

    /// Number of listed keys.
    pub fn len(&self) -> usize {
        self.shared.ids.borrow().len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.shared.ids.borrow().is_empty()
    }

    /// Positional diff stream.
    pub fn changes(&self) -> Stream<Vec<OrderDiff<T::Key>>> {
        self.shared.changes.clone()
    }

    fn remove_keys(shared: &ListShared<T>, keys: &[T::Key]) {
        let mut diffs = Vec::new();
        {
            let mut ids = shared.ids.borrow_mut();
            for key in keys {
                if let Some(pos) = ids.iter().position(|k| k == key) {
                    ids.remove(pos);
                    diffs.push(OrderDiff::Remove {
                        pos,
                        key: key.clone(),
                    });
                }
            }
        }
        if !diffs.is_empty() {
            shared.changes.emit(&diffs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Collection;

    #[derive(Debug, Clone)]
    struct Pin {
        id: u32,
    }

    impl Keyed for Pin {
        type Key = u32;

        fn key(&self) -> u32 {
            self.id
        }
    }

    #[test]
    fn test_start_insert_keeps_relative_order() {
        let coll: Collection<Pin> = Collection::new();
        let list = coll.list_index();

        list.add(Placement::Start, vec![1, 2, 3]);
        assert_eq!(list.ids(..), vec![1, 2, 3]);

        list.add(Placement::Start, vec![4, 5]);
        assert_eq!(list.ids(..), vec![4, 5, 1, 2, 3]);

        // Already-listed keys are not re-ordered by a start insert.
        list.add(Placement::Start, vec![3, 6]);
        assert_eq!(list.ids(..), vec![6, 4, 5, 1, 2, 3]);
    }

    #[test]
    fn test_start_insert_dedups_within_one_call() {
        let coll: Collection<Pin> = Collection::new();
        let list = coll.list_index();

        list.add(Placement::Start, vec![1, 2, 1, 3, 2]);
        assert_eq!(list.ids(..), vec![1, 2, 3]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_end_insert_moves_existing_to_end() {
        let coll: Collection<Pin> = Collection::new();
        let list = coll.list_index();

        list.add(Placement::End, vec![1, 2, 3]);
        list.add(Placement::End, vec![1]);
        assert_eq!(list.ids(..), vec![2, 3, 1]);
    }

    #[test]
    fn test_remove_and_has() {
        let coll: Collection<Pin> = Collection::new();
        let list = coll.list_index();

        list.add(Placement::End, vec![1, 2, 3]);
        list.remove(&[2, 9]);
        assert_eq!(list.ids(..), vec![1, 3]);
        assert!(list.has(&1));
        assert!(!list.has(&2));
    }

    #[test]
    fn test_listed_key_may_be_unknown_to_store() {
        let coll: Collection<Pin> = Collection::new();
        let list = coll.list_index();

        // Pinned before fetched: nothing in the store yet.
        list.add(Placement::Start, vec![42]);
        assert!(list.has(&42));
        assert!(!coll.has(&42));
    }

    #[test]
    fn test_store_remove_drops_key_from_list() {
        let coll: Collection<Pin> = Collection::new();
        let list = coll.list_index();

        coll.put(Pin { id: 1 });
        coll.put(Pin { id: 2 });
        list.add(Placement::End, vec![1, 2]);

        coll.remove(&1);
        assert_eq!(list.ids(..), vec![2]);

        // A store update does not touch the list.
        coll.put(Pin { id: 2 });
        assert_eq!(list.ids(..), vec![2]);
    }
}
