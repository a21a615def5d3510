//! Synchronous multi-subscriber event stream.
//!
//! A [`Stream`] is a plain observer list: `subscribe` registers a callback
//! and returns a [`Subscription`] guard, `emit` invokes every callback
//! synchronously before returning. There is no buffering and no thread
//! hand-off; delivery ordering is deterministic:
//!
//! - one emitted value is fully delivered to one subscriber before the next
//!   subscriber is notified,
//! - subscribers registered while an emit is in flight do not see that value,
//! - subscribers removed while an emit is in flight are skipped.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

type Callback<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct StreamInner<T> {
    next_id: u64,
    subscribers: Vec<(u64, Callback<T>)>,
}

/// A synchronous fan-out stream of values.
///
/// Cloning a `Stream` produces another handle onto the same subscriber list.
pub struct Stream<T> {
    inner: Rc<RefCell<StreamInner<T>>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for Stream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Stream<T> {
    /// Create a stream with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(StreamInner {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Register a callback and return its unsubscribe guard.
    ///
    /// Dropping the guard unsubscribes; call [`Subscription::detach`] to keep
    /// the callback alive for the stream's whole lifetime.
    pub fn subscribe(&self, f: impl FnMut(&T) + 'static) -> Subscription {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner
                .subscribers
                .push((id, Rc::new(RefCell::new(f)) as Callback<T>));
            id
        };

        let weak: Weak<RefCell<StreamInner<T>>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().subscribers.retain(|(sid, _)| *sid != id);
            }
        })
    }

    /// Deliver `value` to every current subscriber, in subscription order.
    pub fn emit(&self, value: &T) {
        // Snapshot the list so subscribers may (un)subscribe during delivery.
        let snapshot: Vec<(u64, Callback<T>)> = self
            .inner
            .borrow()
            .subscribers
            .iter()
            .map(|(id, cb)| (*id, Rc::clone(cb)))
            .collect();

        for (id, cb) in snapshot {
            let still_subscribed = self
                .inner
                .borrow()
                .subscribers
                .iter()
                .any(|(sid, _)| *sid == id);
            if !still_subscribed {
                continue;
            }
            match cb.try_borrow_mut() {
                Ok(mut f) => f(value),
                Err(_) => {
                    // The callback emitted into its own stream. Skipping is the
                    // only option that keeps delivery synchronous.
                    tracing::warn!("stream subscriber re-entered during delivery; skipping");
                }
            }
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }
}

/// RAII unsubscribe guard returned by [`Stream::subscribe`].
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unsubscribe now. Equivalent to dropping the guard.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Leave the callback subscribed for as long as the stream lives.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
