//! Item identity and change events.

use std::fmt::Debug;
use std::hash::Hash;

/// An item with a stable, extractable identity.
///
/// `Clone` is required because stored items are handed out by value: change
/// events and read operations never expose interior references into the
/// store.
pub trait Keyed: Clone {
    /// The identity type. Unique per item for the item's lifetime.
    type Key: Clone + Eq + Hash + Debug + 'static;

    /// Extract the item's identity.
    fn key(&self) -> Self::Key;

    /// Whether this is a partial ("min") record: an incomplete item received
    /// as a side reference rather than authoritatively. A partial item never
    /// silently overwrites a previously-stored full item with the same key.
    fn is_min(&self) -> bool {
        false
    }
}

/// What happened to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The key was absent and is now present.
    Add,
    /// The key was present and its item was replaced.
    Update,
    /// The key was present and is now absent.
    Remove,
}

/// A single change to one key.
///
/// For [`Action::Remove`], `item` is the last value that was stored.
#[derive(Debug, Clone)]
pub struct ChangeEvent<T: Keyed> {
    pub action: Action,
    pub key: T::Key,
    pub item: T,
}

/// A group of changes applied as one logical mutation.
///
/// Change events are always delivered in batches so that multi-item writes
/// are observed atomically, with no intermediate torn state.
pub type ChangeBatch<T> = Vec<ChangeEvent<T>>;
