//! Client runtime plumbing: observers, subscriber sets and propagation.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::microtask::MicrotaskBatcher;
use crate::batch::Batcher;
use crate::subscriber::{SubscriberId, SubscriberSet};

/// Something a client source can notify.
pub trait Observer {
    fn subscriber_id(&self) -> SubscriberId;

    /// Lazy observers only flip their dirty flag.
    fn mark_dirty(&self);

    /// Eager observers run on the next microtask drain.
    fn run(&self);

    fn is_eager(&self) -> bool;
}

/// Handle to one registration on a client source.
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) revokes the
/// registration.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

pub(crate) struct Subscribers {
    set: Rc<RefCell<SubscriberSet<Weak<dyn Observer>>>>,
}

impl Subscribers {
    pub(crate) fn new() -> Self {
        Self {
            set: Rc::new(RefCell::new(SubscriberSet::new())),
        }
    }

    pub(crate) fn add(&self, id: SubscriberId, observer: Weak<dyn Observer>) -> Subscription {
        self.set.borrow_mut().insert(id, observer);
        let set = Rc::downgrade(&self.set);
        Subscription::new(move || {
            if let Some(set) = set.upgrade() {
                set.borrow_mut().remove(id);
            }
        })
    }

    /// Register an observer owned by the returned handle.
    pub(crate) fn add_owned(&self, observer: Rc<dyn Observer>) -> Subscription {
        let id = observer.subscriber_id();
        self.set.borrow_mut().insert(id, Rc::downgrade(&observer));
        let set = Rc::downgrade(&self.set);
        Subscription::new(move || {
            if let Some(set) = set.upgrade() {
                set.borrow_mut().remove(id);
            }
            drop(observer);
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.set.borrow().len()
    }


    /// Notify a snapshot of the current subscribers.
    ///
    /// Lazy observers are marked dirty now, eager ones are queued for the
    /// next microtask drain.
    pub(crate) fn notify(&self) {
        let snapshot = self.set.borrow().snapshot();
        for (id, observer) in snapshot {
            let Some(observer) = observer.upgrade() else {
                continue;
            };
            if observer.is_eager() {
                MicrotaskBatcher.defer(id, observer);
            } else {
                observer.mark_dirty();
            }
        }
    }
}
