//! # Parlor Cache Core
//!
//! The generic reactive store layer of the Parlor cache: a keyed item store
//! with merge-on-write and batched change notification, plus the derived
//! indices built from its change stream.
//!
//! Everything here is single-threaded and synchronous: a mutation's change
//! notifications, including all index recomputation, complete before the
//! mutating call returns. There is no I/O anywhere in this crate.
//!
//! ## Key Types
//!
//! - [`KeyedStore`] - at most one item per key, min-merge policy, batched
//!   change stream, per-key watchers
//! - [`Collection`] - a store plus constructors for the closed set of index
//!   kinds
//! - [`OrderIndex`] - comparator-sorted key sequence maintained incrementally
//! - [`ListIndex`] - manually curated ordered unique key set
//! - [`Stream`] / [`Subscription`] - synchronous observer list with RAII
//!   unsubscription

pub mod collection;
pub mod item;
pub mod list_index;
pub mod order_index;
pub mod store;
pub mod stream;

pub use collection::Collection;
pub use item::{Action, ChangeBatch, ChangeEvent, Keyed};
pub use list_index::{ListIndex, Placement};
pub use order_index::{Comparator, FilterFn, OrderDiff, OrderIndex};
pub use store::{KeyedStore, MergeFn};
pub use stream::{Stream, Subscription};
