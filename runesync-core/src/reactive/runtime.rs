//! Reactive Runtime
//!
//! The runtime connects signals, derived values and effects. It has no
//! global registry: every source owns its own subscriber set, and the
//! runtime only decides what happens to each subscriber when a source
//! changes.
//!
//! # How It Works
//!
//! 1. When a derived value or effect reads a source inside a tracking
//!    context, the source stores a weak reference to it and hands back a
//!    [`Subscription`] that the reader keeps until its next run.
//!
//! 2. When a source changes, [`Runtime::propagate`] walks a snapshot of its
//!    subscribers inside a batch:
//!    a. lazy subscribers (derived values) are marked dirty right away,
//!    b. eager subscribers (effects, callbacks) are deferred to the batcher,
//!    c. the outermost batch end runs each deferred subscriber once.
//!
//! Marking everything dirty before any eager subscriber runs is what keeps
//! diamond graphs glitch-free: by the time an effect reads a derived value,
//! every path from the changed source has already been invalidated.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::batch::Batcher;
use crate::subscriber::{SubscriberId, SubscriberSet};

use super::batch::SyncBatcher;
use super::context::TrackingContext;

/// A trait for types that can be notified when dependencies change.
pub trait Reactive: Send + Sync {
    /// Get the subscriber ID for this reactive value.
    fn subscriber_id(&self) -> SubscriberId;

    /// Mark this reactive value as needing an update.
    fn mark_maybe_dirty(&self);

    /// Run this reactive value (eager subscribers only).
    fn schedule(&self);

    /// Eager subscribers are deferred and run; lazy ones are only marked.
    fn is_eager(&self) -> bool;
}

/// Handle to one registration in a source's subscriber set.
///
/// Dropping the handle (or calling [`Subscription::unsubscribe`]) removes
/// the registration.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Revoke the registration now.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Lock-protected subscriber set owned by one source.
pub(crate) struct Subscribers {
    set: Arc<RwLock<SubscriberSet<Weak<dyn Reactive>>>>,
}

impl Subscribers {
    pub(crate) fn new() -> Self {
        Self {
            set: Arc::new(RwLock::new(SubscriberSet::new())),
        }
    }

    /// Register a weakly held subscriber.
    pub(crate) fn add(&self, id: SubscriberId, subscriber: Weak<dyn Reactive>) -> Subscription {
        self.set.write().insert(id, subscriber);
        let set = Arc::downgrade(&self.set);
        Subscription::new(move || {
            if let Some(set) = set.upgrade() {
                set.write().remove(id);
            }
        })
    }

    /// Register a subscriber that lives as long as the returned handle.
    pub(crate) fn add_owned(&self, subscriber: Arc<dyn Reactive>) -> Subscription {
        let id = subscriber.subscriber_id();
        self.set.write().insert(id, Arc::downgrade(&subscriber));
        let set = Arc::downgrade(&self.set);
        Subscription::new(move || {
            if let Some(set) = set.upgrade() {
                set.write().remove(id);
            }
            drop(subscriber);
        })
    }

    pub(crate) fn snapshot(&self) -> Vec<(SubscriberId, Weak<dyn Reactive>)> {
        self.set.read().snapshot()
    }

    pub(crate) fn len(&self) -> usize {
        self.set.read().len()
    }
}

/// Entry points shared by all server-side primitives.
pub struct Runtime;

impl Runtime {
    /// Deliver a change notification to a snapshot of subscribers.
    ///
    /// Called with no lock held by the changed source.
    pub(crate) fn propagate(subscribers: Vec<(SubscriberId, Weak<dyn Reactive>)>) {
        if subscribers.is_empty() {
            return;
        }

        SyncBatcher.batch(|| {
            for (id, subscriber) in subscribers {
                let Some(reactive) = subscriber.upgrade() else {
                    continue;
                };
                if reactive.is_eager() {
                    SyncBatcher.defer(id, reactive);
                } else {
                    reactive.mark_maybe_dirty();
                }
            }
        });
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        TrackingContext::current_subscriber()
    }

    /// Check if we're inside a tracking context.
    pub fn is_tracking() -> bool {
        TrackingContext::is_active()
    }
}
