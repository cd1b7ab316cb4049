//! Client derived value.
//!
//! Lazy and memoized like the server version, without locks. An epoch
//! counter catches a dependency changing while the value is being computed.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use super::context;
use super::runtime::{Observer, Subscribers, Subscription};
use crate::reactive::DerivedState;
use crate::subscriber::{SourceId, SubscriberId};

/// Lazy, memoized value for the browser engine.
///
/// A dependency change only marks the value dirty; the compute function
/// runs again on the next read.
pub struct Derived<T: Clone + PartialEq + 'static> {
    inner: Rc<DerivedInner<T>>,
}

struct DerivedInner<T> {
    id: SourceId,
    subscriber_id: SubscriberId,
    self_ref: Weak<DerivedInner<T>>,
    compute: Box<dyn Fn() -> T>,
    value: RefCell<Option<T>>,
    state: Cell<DerivedState>,
    /// Bumped by every invalidation; a compute that saw the epoch move
    /// leaves the value dirty.
    epoch: Cell<u64>,
    computing: Cell<bool>,
    compute_count: Cell<usize>,
    dependencies: RefCell<Vec<Subscription>>,
    subscribers: Subscribers,
}

impl<T: Clone + PartialEq + 'static> Derived<T> {
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        let inner = Rc::new_cyclic(|self_ref| DerivedInner {
            id: SourceId::new(),
            subscriber_id: SubscriberId::new(),
            self_ref: self_ref.clone(),
            compute: Box::new(compute),
            value: RefCell::new(None),
            state: Cell::new(DerivedState::Dirty),
            epoch: Cell::new(0),
            computing: Cell::new(false),
            compute_count: Cell::new(0),
            dependencies: RefCell::new(Vec::new()),
            subscribers: Subscribers::new(),
        });
        Self { inner }
    }

    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    /// Current value, recomputed first if a dependency changed. Tracked
    /// unless the value is disposed.
    pub fn get(&self) -> T {
        if self.inner.state.get() != DerivedState::Disposed {
            let subscribers = &self.inner.subscribers;
            context::track(self.inner.id, |id, observer| subscribers.add(id, observer));
        }
        self.inner.current()
    }

    pub fn get_untracked(&self) -> T {
        self.inner.current()
    }

    /// Call `f` whenever the value changes, on the microtask drain after
    /// the change.
    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> Subscription {
        let callback = Rc::new(DerivedCallback {
            id: SubscriberId::new(),
            source: Rc::downgrade(&self.inner),
            last: RefCell::new(self.inner.current()),
            f: Box::new(f),
        });
        self.inner.subscribers.add_owned(callback)
    }

    /// Freeze the value and release every dependency. Idempotent.
    pub fn dispose(&self) {
        if self.inner.state.get() == DerivedState::Disposed {
            return;
        }
        self.inner.current();
        self.inner.state.set(DerivedState::Disposed);
        let dependencies = std::mem::take(&mut *self.inner.dependencies.borrow_mut());
        drop(dependencies);
    }

    pub fn state(&self) -> DerivedState {
        self.inner.state.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == DerivedState::Disposed
    }

    pub fn compute_count(&self) -> usize {
        self.inner.compute_count.get()
    }

    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.borrow().len()
    }
}

impl<T: Clone + PartialEq + 'static> DerivedInner<T> {
    fn current(&self) -> T {
        let needs_compute = match self.state.get() {
            DerivedState::Clean => false,
            DerivedState::Dirty => true,
            DerivedState::Disposed => self.value.borrow().is_none(),
        };
        if needs_compute {
            self.recompute();
        }
        match &*self.value.borrow() {
            Some(value) => value.clone(),
            // Only reachable if the compute function re-entered itself.
            None => (self.compute)(),
        }
    }

    fn recompute(&self) {
        if self.computing.replace(true) {
            return;
        }
        let epoch = self.epoch.get();

        let stale = std::mem::take(&mut *self.dependencies.borrow_mut());
        drop(stale);

        let observer: Weak<dyn Observer> = self.self_ref.clone();
        let scope = context::enter(self.subscriber_id, observer);
        let value = (self.compute)();
        let dependencies = scope.finish();

        self.computing.set(false);
        self.compute_count.set(self.compute_count.get() + 1);
        *self.value.borrow_mut() = Some(value);

        if self.state.get() == DerivedState::Disposed {
            return;
        }
        *self.dependencies.borrow_mut() = dependencies;
        if self.epoch.get() == epoch {
            self.state.set(DerivedState::Clean);
        }
    }
}

impl<T: Clone + PartialEq + 'static> Observer for DerivedInner<T> {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_dirty(&self) {
        self.epoch.set(self.epoch.get() + 1);
        match self.state.get() {
            DerivedState::Clean => {
                self.state.set(DerivedState::Dirty);
                self.subscribers.notify();
            }
            DerivedState::Dirty if self.computing.get() => self.subscribers.notify(),
            _ => {}
        }
    }

    fn run(&self) {}

    fn is_eager(&self) -> bool {
        false
    }
}

struct DerivedCallback<T> {
    id: SubscriberId,
    source: Weak<DerivedInner<T>>,
    last: RefCell<T>,
    f: Box<dyn Fn(&T)>,
}

impl<T: Clone + PartialEq + 'static> Observer for DerivedCallback<T> {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn mark_dirty(&self) {}

    fn run(&self) {
        let Some(source) = self.source.upgrade() else {
            return;
        };
        let value = source.current();
        if *self.last.borrow() == value {
            return;
        }
        *self.last.borrow_mut() = value.clone();
        (self.f)(&value);
    }

    fn is_eager(&self) -> bool {
        true
    }
}

impl<T: Clone + PartialEq + 'static> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Debug + 'static> Debug for Derived<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.get())
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}
