//! A keyed store plus its derived indices.

use std::ops::Deref;
use std::rc::Rc;

use crate::item::Keyed;
use crate::list_index::ListIndex;
use crate::order_index::{Comparator, FilterFn, OrderIndex};
use crate::store::{KeyedStore, MergeFn};

/// A [`KeyedStore`] with constructors for the closed set of index kinds.
///
/// Indices are built from the collection's change stream and seeded from its
/// current contents; each index lives until its last handle is dropped.
/// `Collection` derefs to the underlying store, so all store operations
/// (`put`, `remove`, `watch`, `batch`, ...) are available directly.
pub struct Collection<T: Keyed> {
    store: Rc<KeyedStore<T>>,
}

impl<T: Keyed> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: Rc::clone(&self.store),
        }
    }
}

impl<T: Keyed + 'static> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed + 'static> Collection<T> {
    /// Create an empty collection with the default merge policy.
    pub fn new() -> Self {
        Self {
            store: Rc::new(KeyedStore::new()),
        }
    }

    /// Create an empty collection with a custom merge override (see
    /// [`MergeFn`]).
    pub fn with_merge(merge: MergeFn<T>) -> Self {
        Self {
            store: Rc::new(KeyedStore::with_merge(merge)),
        }
    }

    /// Shared handle to the underlying store.
    pub fn store(&self) -> &Rc<KeyedStore<T>> {
        &self.store
    }

    /// Build a comparator-ordered index over this collection.
    ///
    /// Comparator ties are not kept in a guaranteed relative order; break
    /// ties deterministically (e.g. by key) for UI-facing lists.
    pub fn order_index(&self, cmp: Comparator<T>, filter: Option<FilterFn<T>>) -> OrderIndex<T> {
        OrderIndex::new(Rc::clone(&self.store), cmp, filter)
    }

    /// Build a manually curated list index over this collection.
    pub fn list_index(&self) -> ListIndex<T> {
        ListIndex::new(&self.store)
    }
}

impl<T: Keyed> Deref for Collection<T> {
    type Target = KeyedStore<T>;

    fn deref(&self) -> &KeyedStore<T> {
        &self.store
    }
}
