//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a tracking context (derived/effect), the
//!    signal registers that context as a subscriber for the current run.
//!
//! 2. When a signal's value changes, all subscribers are notified through
//!    the runtime: derived values are marked dirty, effects and callbacks
//!    are queued on the batcher.
//!
//! 3. Writing a value equal to the current one does nothing.
//!
//! # Thread Safety
//!
//! The value and the subscriber set each sit behind their own `RwLock`.
//! Notification copies the subscriber set and releases every lock before
//! any subscriber runs, so a subscriber may freely write to the signal that
//! notified it.

use std::fmt::Debug;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::trace;

use super::context::TrackingContext;
use super::runtime::{Reactive, Runtime, Subscribers, Subscription};
use crate::subscriber::{SourceId, SubscriberId};

/// A reactive signal holding a value of type T.
///
/// # Type Parameters
///
/// - `T`: The type of value stored in the signal. Must be
///   `Clone + PartialEq + Send + Sync`; equality decides whether a write is a
///   change.
///
/// # Example
///
/// ```rust
/// use runesync_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// count.update(|v| v + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

struct SignalInner<T> {
    id: SourceId,
    value: RwLock<T>,
    subscribers: Subscribers,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: SourceId::new(),
                value: RwLock::new(value),
                subscribers: Subscribers::new(),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// If called within a tracking context, this also registers the
    /// current computation as a subscriber.
    pub fn get(&self) -> T {
        self.track();
        self.get_untracked()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Borrow the current value without cloning it. Tracked like [`get`].
    ///
    /// [`get`]: Signal::get
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.read())
    }

    fn track(&self) {
        let subscribers = &self.inner.subscribers;
        TrackingContext::track(self.inner.id, |id, observer| subscribers.add(id, observer));
    }

    /// Set a new value and notify subscribers.
    ///
    /// Returns `false` (and notifies nobody) when `value` equals the current
    /// value.
    pub fn set(&self, value: T) -> bool {
        {
            let mut guard = self.inner.value.write();
            if *guard == value {
                return false;
            }
            *guard = value;
        }

        trace!(signal = %self.inner.id, "signal changed");
        Runtime::propagate(self.inner.subscribers.snapshot());
        true
    }

    /// Update the value using a function of the current value.
    ///
    /// The current value is read without registering a dependency.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.inner.value.read();
            f(&guard)
        };
        self.set(new_value)
    }

    /// Register a callback that receives the value after each change.
    ///
    /// Inside a batch the callback runs once, with the final value. The
    /// returned handle unsubscribes when dropped.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback = Arc::new(ValueCallback {
            id: SubscriberId::new(),
            source: Arc::downgrade(&self.inner),
            f: Box::new(f),
        });
        self.inner.subscribers.add_owned(callback)
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

/// A user callback subscribed to a signal.
struct ValueCallback<T> {
    id: SubscriberId,
    source: Weak<SignalInner<T>>,
    f: Box<dyn Fn(&T) + Send + Sync>,
}

impl<T> Reactive for ValueCallback<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn mark_maybe_dirty(&self) {}

    fn schedule(&self) {
        let Some(source) = self.source.upgrade() else {
            return;
        };
        let value = source.value.read().clone();
        (self.f)(&value);
    }

    fn is_eager(&self) -> bool {
        true
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + Default + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
