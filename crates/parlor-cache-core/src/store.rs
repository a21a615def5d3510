//! Keyed store with merge-on-write and batched change notification.
//!
//! [`KeyedStore`] holds at most one item per key. Every mutation produces a
//! batch of [`ChangeEvent`]s delivered synchronously, first to the global
//! [`KeyedStore::changes`] stream and then to per-key watchers, before the
//! mutating call returns. A batch raised while another batch is being
//! delivered is queued, never interleaved: each subscriber sees whole batches
//! in mutation order.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::item::{Action, ChangeBatch, ChangeEvent, Keyed};
use crate::stream::{Stream, Subscription};

/// Per-collection merge override.
///
/// Called with `(stored, incoming)` when a key is already present. Returning
/// `Some(item)` stores that item and emits an update; returning `None` keeps
/// the stored item and emits nothing. When no override is registered the
/// default policy applies: the incoming item wins unless it is partial
/// ([`Keyed::is_min`]) and the stored one is full.
pub type MergeFn<T> = Box<dyn Fn(&T, &T) -> Option<T>>;

struct StoreInner<T: Keyed> {
    items: HashMap<T::Key, T>,
    watchers: HashMap<T::Key, Stream<Option<T>>>,
    merge: Option<MergeFn<T>>,
    batch_depth: usize,
    pending: ChangeBatch<T>,
}

/// In-memory keyed item store.
///
/// Single-threaded: all mutation and notification happens synchronously
/// within the call that triggered it.
pub struct KeyedStore<T: Keyed> {
    inner: RefCell<StoreInner<T>>,
    changes: Stream<ChangeBatch<T>>,
    queue: RefCell<VecDeque<ChangeBatch<T>>>,
    delivering: Cell<bool>,
}

impl<T: Keyed + 'static> Default for KeyedStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed + 'static> KeyedStore<T> {
    /// Create an empty store with the default merge policy.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an empty store with a custom merge override.
    pub fn with_merge(merge: MergeFn<T>) -> Self {
        Self::build(Some(merge))
    }

    fn build(merge: Option<MergeFn<T>>) -> Self {
        Self {
            inner: RefCell::new(StoreInner {
                items: HashMap::new(),
                watchers: HashMap::new(),
                merge,
                batch_depth: 0,
                pending: Vec::new(),
            }),
            changes: Stream::new(),
            queue: RefCell::new(VecDeque::new()),
            delivering: Cell::new(false),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Whether `key` is present. Unknown keys are not an error.
    pub fn has(&self, key: &T::Key) -> bool {
        self.inner.borrow().items.contains_key(key)
    }

    /// Current item for `key`, if any.
    pub fn get(&self, key: &T::Key) -> Option<T> {
        self.inner.borrow().items.get(key).cloned()
    }

    /// All items, in unspecified order.
    pub fn get_all(&self) -> Vec<T> {
        self.inner.borrow().items.values().cloned().collect()
    }

    /// All keys, in unspecified order.
    pub fn keys(&self) -> Vec<T::Key> {
        self.inner.borrow().items.keys().cloned().collect()
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    /// Handle to the global batched change stream.
    pub fn changes(&self) -> Stream<ChangeBatch<T>> {
        self.changes.clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────

    /// Insert or merge one item.
    pub fn put(&self, item: T) {
        let batch = {
            let mut inner = self.inner.borrow_mut();
            let mut out = Vec::new();
            Self::apply_put(&mut inner, item, &mut out);
            Self::take_or_defer(&mut inner, out)
        };
        self.dispatch(batch);
    }

    /// Insert or merge several items as one batch.
    pub fn put_many(&self, items: Vec<T>) {
        let batch = {
            let mut inner = self.inner.borrow_mut();
            let mut out = Vec::new();
            for item in items {
                Self::apply_put(&mut inner, item, &mut out);
            }
            Self::take_or_defer(&mut inner, out)
        };
        self.dispatch(batch);
    }

    /// Remove `key` if present. Removing an absent key is a no-op.
    pub fn remove(&self, key: &T::Key) {
        let batch = {
            let mut inner = self.inner.borrow_mut();
            let mut out = Vec::new();
            if let Some(item) = inner.items.remove(key) {
                out.push(ChangeEvent {
                    action: Action::Remove,
                    key: key.clone(),
                    item,
                });
            }
            Self::take_or_defer(&mut inner, out)
        };
        self.dispatch(batch);
    }

    /// Replace the whole contents with `items`.
    ///
    /// Emits `Remove` for keys no longer present and `Add`/`Update` for the
    /// rest, all as one batch. Kept keys still go through the merge policy,
    /// so a partial item in `items` does not clobber a stored full one.
    pub fn replace_all(&self, items: Vec<T>) {
        let batch = {
            let mut inner = self.inner.borrow_mut();
            let mut out = Vec::new();

            let new_keys: HashSet<T::Key> = items.iter().map(Keyed::key).collect();
            let dropped: Vec<T::Key> = inner
                .items
                .keys()
                .filter(|k| !new_keys.contains(*k))
                .cloned()
                .collect();
            for key in dropped {
                if let Some(item) = inner.items.remove(&key) {
                    out.push(ChangeEvent {
                        action: Action::Remove,
                        key,
                        item,
                    });
                }
            }
            for item in items {
                Self::apply_put(&mut inner, item, &mut out);
            }
            Self::take_or_defer(&mut inner, out)
        };
        self.dispatch(batch);
    }

    /// Run `f` in a batch scope: all mutations performed inside produce
    /// exactly one emitted change batch. Scopes nest; only the outermost
    /// scope flushes.
    pub fn batch(&self, f: impl FnOnce(&Self)) {
        self.inner.borrow_mut().batch_depth += 1;
        f(self);
        let batch = {
            let mut inner = self.inner.borrow_mut();
            inner.batch_depth -= 1;
            if inner.batch_depth == 0 {
                std::mem::take(&mut inner.pending)
            } else {
                Vec::new()
            }
        };
        self.dispatch(batch);
    }

    /// Watch one key.
    ///
    /// Fires immediately with the current value, then on every future change
    /// to that key. Removal is signalled as `None`, never as a partial item.
    pub fn watch(&self, key: &T::Key, mut f: impl FnMut(Option<&T>) + 'static) -> Subscription {
        let current = self.get(key);
        f(current.as_ref());

        let stream = {
            let mut inner = self.inner.borrow_mut();
            inner
                .watchers
                .entry(key.clone())
                .or_insert_with(Stream::new)
                .clone()
        };
        stream.subscribe(move |value: &Option<T>| f(value.as_ref()))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn apply_put(inner: &mut StoreInner<T>, item: T, out: &mut ChangeBatch<T>) {
        let key = item.key();
        match inner.items.get(&key) {
            None => {
                inner.items.insert(key.clone(), item.clone());
                out.push(ChangeEvent {
                    action: Action::Add,
                    key,
                    item,
                });
            }
            Some(old) => {
                let replacement = match &inner.merge {
                    Some(merge) => merge(old, &item),
                    // Default: new wins unless it is partial and old is full.
                    None if item.is_min() && !old.is_min() => None,
                    None => Some(item),
                };
                if let Some(new_item) = replacement {
                    inner.items.insert(key.clone(), new_item.clone());
                    out.push(ChangeEvent {
                        action: Action::Update,
                        key,
                        item: new_item,
                    });
                }
            }
        }
    }

    fn take_or_defer(inner: &mut StoreInner<T>, out: ChangeBatch<T>) -> ChangeBatch<T> {
        if inner.batch_depth > 0 {
            inner.pending.extend(out);
            Vec::new()
        } else {
            out
        }
    }

    /// Deliver a batch, queueing batches raised during delivery so that one
    /// batch finishes its full subscriber round before the next starts.
    fn dispatch(&self, batch: ChangeBatch<T>) {
        if batch.is_empty() {
            return;
        }
        self.queue.borrow_mut().push_back(batch);
        if self.delivering.get() {
            return;
        }
        self.delivering.set(true);
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(batch) = next else { break };

            self.changes.emit(&batch);

            let targets: Vec<(Stream<Option<T>>, Option<T>)> = {
                let mut inner = self.inner.borrow_mut();
                inner.watchers.retain(|_, s| s.subscriber_count() > 0);
                batch
                    .iter()
                    .filter_map(|ev| {
                        inner.watchers.get(&ev.key).map(|stream| {
                            let payload = match ev.action {
                                Action::Remove => None,
                                Action::Add | Action::Update => Some(ev.item.clone()),
                            };
                            (stream.clone(), payload)
                        })
                    })
                    .collect()
            };
            for (stream, payload) in targets {
                stream.emit(&payload);
            }
        }
        self.delivering.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Rec {
        id: u32,
        body: String,
        min: bool,
    }

    impl Rec {
        fn full(id: u32, body: &str) -> Self {
            Self {
                id,
                body: body.into(),
                min: false,
            }
        }

        fn partial(id: u32, body: &str) -> Self {
            Self {
                id,
                body: body.into(),
                min: true,
            }
        }
    }

    impl Keyed for Rec {
        type Key = u32;

        fn key(&self) -> u32 {
            self.id
        }

        fn is_min(&self) -> bool {
            self.min
        }
    }

    #[test]
    fn test_put_and_get() {
        let store: KeyedStore<Rec> = KeyedStore::new();
        assert!(!store.has(&1));
        assert_eq!(store.get(&1), None);

        store.put(Rec::full(1, "hello"));
        assert!(store.has(&1));
        assert_eq!(store.get(&1).unwrap().body, "hello");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_one_item_per_key() {
        let store: KeyedStore<Rec> = KeyedStore::new();
        store.put(Rec::full(1, "a"));
        store.put(Rec::full(1, "b"));
        store.put(Rec::full(1, "c"));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&1).unwrap().body, "c");
    }

    #[test]
    fn test_min_merge_full_wins_either_order() {
        // full then partial: full stays
        let store: KeyedStore<Rec> = KeyedStore::new();
        store.put(Rec::full(1, "full"));
        store.put(Rec::partial(1, "partial"));
        assert_eq!(store.get(&1).unwrap().body, "full");

        // partial then full: full replaces
        let store: KeyedStore<Rec> = KeyedStore::new();
        store.put(Rec::partial(1, "partial"));
        store.put(Rec::full(1, "full"));
        assert_eq!(store.get(&1).unwrap().body, "full");

        // partial then partial: latest partial wins
        let store: KeyedStore<Rec> = KeyedStore::new();
        store.put(Rec::partial(1, "p1"));
        store.put(Rec::partial(1, "p2"));
        assert_eq!(store.get(&1).unwrap().body, "p2");
    }

    #[test]
    fn test_rejected_partial_emits_nothing() {
        let store: KeyedStore<Rec> = KeyedStore::new();
        store.put(Rec::full(1, "full"));

        let batches = Rc::new(RefCell::new(0));
        let b = Rc::clone(&batches);
        let _sub = store.changes().subscribe(move |_| *b.borrow_mut() += 1);

        store.put(Rec::partial(1, "partial"));
        assert_eq!(*batches.borrow(), 0);
    }

    #[test]
    fn test_custom_merge_overrides_default() {
        // Keep the longer body regardless of min flags.
        let store: KeyedStore<Rec> = KeyedStore::with_merge(Box::new(|old, new| {
            if new.body.len() >= old.body.len() {
                Some(new.clone())
            } else {
                None
            }
        }));

        store.put(Rec::full(1, "longer body"));
        store.put(Rec::full(1, "short"));
        assert_eq!(store.get(&1).unwrap().body, "longer body");

        store.put(Rec::partial(1, "even longer body"));
        assert_eq!(store.get(&1).unwrap().body, "even longer body");
    }

    #[test]
    fn test_remove_emits_last_value() {
        let store: KeyedStore<Rec> = KeyedStore::new();
        store.put(Rec::full(1, "x"));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = store.changes().subscribe(move |batch: &ChangeBatch<Rec>| {
            for ev in batch {
                s.borrow_mut().push((ev.action, ev.item.clone()));
            }
        });

        store.remove(&1);
        store.remove(&1); // absent: no-op

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, Action::Remove);
        assert_eq!(seen[0].1.body, "x");
        assert!(!store.has(&1));
    }

    #[test]
    fn test_batch_scope_emits_once() {
        let store: KeyedStore<Rec> = KeyedStore::new();
        let batches = Rc::new(RefCell::new(Vec::new()));
        let b = Rc::clone(&batches);
        let _sub = store
            .changes()
            .subscribe(move |batch: &ChangeBatch<Rec>| b.borrow_mut().push(batch.len()));

        store.batch(|s| {
            s.put(Rec::full(1, "a"));
            s.put(Rec::full(2, "b"));
            s.batch(|s| s.put(Rec::full(3, "c")));
            s.remove(&2);
        });

        // One batch: add 1, add 2, add 3, remove 2.
        assert_eq!(*batches.borrow(), vec![4]);
    }

    #[test]
    fn test_replace_all_diffs_against_current() {
        let store: KeyedStore<Rec> = KeyedStore::new();
        store.put_many(vec![Rec::full(1, "a"), Rec::full(2, "b"), Rec::full(3, "c")]);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = store.changes().subscribe(move |batch: &ChangeBatch<Rec>| {
            s.borrow_mut()
                .push(batch.iter().map(|ev| (ev.action, ev.key)).collect::<Vec<_>>());
        });

        store.replace_all(vec![Rec::full(2, "b2"), Rec::full(4, "d")]);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1, "replace_all must emit a single batch");
        let batch = &seen[0];
        assert!(batch.contains(&(Action::Remove, 1)));
        assert!(batch.contains(&(Action::Remove, 3)));
        assert!(batch.contains(&(Action::Update, 2)));
        assert!(batch.contains(&(Action::Add, 4)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_watch_fires_immediately_and_on_removal() {
        let store: KeyedStore<Rec> = KeyedStore::new();
        store.put(Rec::full(7, "first"));

        let seen: Rc<RefCell<Vec<Option<String>>>> = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let sub = store.watch(&7, move |item| {
            s.borrow_mut().push(item.map(|r| r.body.clone()));
        });

        store.put(Rec::full(7, "second"));
        store.remove(&7);
        sub.unsubscribe();
        store.put(Rec::full(7, "after-unsubscribe"));

        assert_eq!(
            *seen.borrow(),
            vec![
                Some("first".to_string()),
                Some("second".to_string()),
                None
            ]
        );
    }

    #[test]
    fn test_mutation_during_delivery_is_not_interleaved() {
        let store: Rc<KeyedStore<Rec>> = Rc::new(KeyedStore::new());

        // First subscriber reacts to the add of key 1 by putting key 2.
        let log = Rc::new(RefCell::new(Vec::new()));
        let st = Rc::clone(&store);
        let l1 = Rc::clone(&log);
        let _s1 = store.changes().subscribe(move |batch: &ChangeBatch<Rec>| {
            l1.borrow_mut().push(("first", batch[0].key));
            if batch[0].key == 1 {
                st.put(Rec::full(2, "reaction"));
            }
        });
        let l2 = Rc::clone(&log);
        let _s2 = store.changes().subscribe(move |batch: &ChangeBatch<Rec>| {
            l2.borrow_mut().push(("second", batch[0].key));
        });

        store.put(Rec::full(1, "trigger"));

        // Batch for key 1 reaches both subscribers before the reactive batch
        // for key 2 reaches either.
        assert_eq!(
            *log.borrow(),
            vec![("first", 1), ("second", 1), ("first", 2), ("second", 2)]
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn rec() -> impl Strategy<Value = Rec> {
            (0u32..8, "[a-z]{0,6}", any::<bool>()).prop_map(|(id, body, min)| Rec {
                id,
                body,
                min,
            })
        }

        proptest! {
            /// Once a full item is stored for a key, no sequence of partial
            /// puts can displace it under the default policy.
            #[test]
            fn full_item_survives_partial_puts(seed in rec(), later in prop::collection::vec(rec(), 0..20)) {
                let store: KeyedStore<Rec> = KeyedStore::new();
                let mut seed = seed;
                seed.min = false;
                let key = seed.key();
                store.put(seed);

                for mut item in later {
                    item.min = true;
                    store.put(item);
                }
                prop_assert!(!store.get(&key).map_or(true, |r| r.min));
            }

            /// The store holds exactly one item per distinct key.
            #[test]
            fn one_item_per_key(items in prop::collection::vec(rec(), 0..30)) {
                let store: KeyedStore<Rec> = KeyedStore::new();
                let mut keys = std::collections::HashSet::new();
                for item in items {
                    keys.insert(item.key());
                    store.put(item);
                }
                prop_assert_eq!(store.len(), keys.len());
            }
        }
    }
}
