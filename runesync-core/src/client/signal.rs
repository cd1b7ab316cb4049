//! Client signal.
//!
//! A `RefCell` value with an `Rc`-shared subscriber set. Writes mark lazy
//! dependents dirty at once and queue eager ones for the next microtask
//! drain.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use super::context;
use super::runtime::{Observer, Subscribers, Subscription};
use crate::subscriber::{SourceId, SubscriberId};

/// Single-threaded signal for the browser engine.
///
/// Same contract as [`reactive::Signal`](crate::reactive::Signal), except
/// that subscribers and effects see a write on the next microtask drain.
pub struct Signal<T: Clone + PartialEq + 'static> {
    inner: Rc<SignalInner<T>>,
}

struct SignalInner<T> {
    id: SourceId,
    value: RefCell<T>,
    subscribers: Subscribers,
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                id: SourceId::new(),
                value: RefCell::new(value),
                subscribers: Subscribers::new(),
            }),
        }
    }

    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    pub fn get(&self) -> T {
        self.track();
        self.get_untracked()
    }

    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    fn track(&self) {
        let subscribers = &self.inner.subscribers;
        context::track(self.inner.id, |id, observer| subscribers.add(id, observer));
    }

    /// Returns `false` when `value` equals the current value.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return false;
            }
            *current = value;
        }
        self.inner.subscribers.notify();
        true
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let value = f(&self.inner.value.borrow());
        self.set(value)
    }

    /// Call `f` with the latest value after each change, once per drain.
    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> Subscription {
        let callback = Rc::new(ValueCallback {
            id: SubscriberId::new(),
            source: Rc::downgrade(&self.inner),
            f: Box::new(f),
        });
        self.inner.subscribers.add_owned(callback)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

struct ValueCallback<T> {
    id: SubscriberId,
    source: Weak<SignalInner<T>>,
    f: Box<dyn Fn(&T)>,
}

impl<T: Clone + 'static> Observer for ValueCallback<T> {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn mark_dirty(&self) {}

    fn run(&self) {
        if let Some(source) = self.source.upgrade() {
            let value = source.value.borrow().clone();
            (self.f)(&value);
        }
    }

    fn is_eager(&self) -> bool {
        true
    }
}

impl<T: Clone + PartialEq + 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + PartialEq + Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::run_microtasks;
    use std::cell::Cell;

    #[test]
    fn subscribers_run_on_drain_with_final_value() {
        let signal = Signal::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _subscription = {
            let seen = seen.clone();
            signal.subscribe(move |value| seen.borrow_mut().push(*value))
        };

        signal.set(1);
        signal.set(2);
        assert!(seen.borrow().is_empty());

        run_microtasks();
        assert_eq!(*seen.borrow(), vec![2]);
    }

    #[test]
    fn equal_write_schedules_nothing() {
        let signal = Signal::new("a".to_string());
        let calls = Rc::new(Cell::new(0));
        let _subscription = {
            let calls = calls.clone();
            signal.subscribe(move |_| calls.set(calls.get() + 1))
        };

        assert!(!signal.set("a".to_string()));
        assert_eq!(run_microtasks(), 0);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let signal = Signal::new(0);
        let calls = Rc::new(Cell::new(0));
        let subscription = {
            let calls = calls.clone();
            signal.subscribe(move |_| calls.set(calls.get() + 1))
        };

        subscription.unsubscribe();
        signal.set(1);
        run_microtasks();
        assert_eq!(calls.get(), 0);
        assert_eq!(signal.subscriber_count(), 0);
    }
}
