//! Derived Implementation
//!
//! A Derived is a cached value computed from other reactive sources. It
//! re-evaluates only when read after one of its dependencies changed.
//!
//! # How Derived Values Work
//!
//! 1. On first access, the compute function runs inside a tracking frame and
//!    the result is cached. Every source it read becomes a dependency.
//!
//! 2. When a dependency changes, the derived value is only marked dirty. If
//!    it was clean, the mark is passed on to its own subscribers.
//!
//! 3. The next access drops all previous dependencies, recomputes, and
//!    re-tracks exactly the sources read this time. A branch that was not
//!    taken leaves no dependency behind.
//!
//! # Why This Matters
//!
//! In a diamond (`a -> b`, `a -> c`, `b + c -> d`) a write to `a` marks `b`,
//! `c` and `d` dirty before anything recomputes. Whoever reads `d` next
//! recomputes it once, and by then `b` and `c` both see the new `a`.
//!
//! # Disposal
//!
//! [`Derived::dispose`] freezes the value: it is brought up to date one last
//! time, dependencies are released, and later reads return the frozen value
//! without tracking or recomputing.
//!
//! # Thread Safety
//!
//! Recomputation is serialized per derived value, so concurrent readers of a
//! dirty value trigger one computation. A dependency that changes while a
//! computation is running leaves the value dirty, so the next read
//! recomputes instead of trusting a result built from the old inputs.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::context::TrackingContext;
use super::runtime::{Reactive, Runtime, Subscribers, Subscription};
use crate::subscriber::{SourceId, SubscriberId};

/// Lifecycle state of a derived value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed (or the value was never computed).
    Dirty,

    /// Disposed; the cached value is frozen.
    Disposed,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be
///   `Clone + PartialEq + Send + Sync`. `PartialEq` lets callbacks skip
///   recomputations that produced the same value.
///
/// # Example
///
/// ```rust
/// use runesync_core::reactive::{Derived, Signal};
///
/// let count = Signal::new(2);
/// let doubled = {
///     let count = count.clone();
///     Derived::new(move || count.get() * 2)
/// };
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<DerivedInner<T>>,
}

struct DerivedInner<T> {
    id: SourceId,
    subscriber_id: SubscriberId,
    self_ref: Weak<DerivedInner<T>>,

    compute: Box<dyn Fn() -> T + Send + Sync>,

    /// The cached value (None if never computed).
    value: RwLock<Option<T>>,
    state: RwLock<DerivedState>,

    /// Bumped on every dependency notification; a computation that started
    /// under an older epoch must not mark the value clean.
    epoch: AtomicU64,
    compute_lock: Mutex<()>,
    compute_count: AtomicUsize,

    /// Subscriptions to the sources read by the last computation.
    dependencies: Mutex<Vec<Subscription>>,

    /// Computations and callbacks that depend on this value.
    subscribers: Subscribers,
}

impl<T> Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new derived value with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|self_ref| DerivedInner {
            id: SourceId::new(),
            subscriber_id: SubscriberId::new(),
            self_ref: self_ref.clone(),
            compute: Box::new(compute),
            value: RwLock::new(None),
            state: RwLock::new(DerivedState::Dirty),
            epoch: AtomicU64::new(0),
            compute_lock: Mutex::new(()),
            compute_count: AtomicUsize::new(0),
            dependencies: Mutex::new(Vec::new()),
            subscribers: Subscribers::new(),
        });
        Self { inner }
    }

    /// Get the derived value's unique ID.
    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    /// Get the subscriber ID used while computing.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside a tracking context the caller becomes a dependent.
    pub fn get(&self) -> T {
        if self.state() != DerivedState::Disposed {
            let subscribers = &self.inner.subscribers;
            TrackingContext::track(self.inner.id, |id, observer| subscribers.add(id, observer));
        }
        self.inner.current()
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.current()
    }

    /// Register a callback that receives the value whenever it changes.
    ///
    /// The value is computed now so the derived value starts listening to
    /// its sources. The callback is skipped when a recomputation produces a
    /// value equal to the last one delivered.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let initial = self.get_untracked();
        let callback = Arc::new(DerivedCallback {
            id: SubscriberId::new(),
            source: Arc::downgrade(&self.inner),
            last: Mutex::new(Some(initial)),
            f: Box::new(f),
        });
        self.inner.subscribers.add_owned(callback)
    }

    /// Release all dependencies and freeze the current value.
    ///
    /// Idempotent. Reads after disposal return the frozen value.
    pub fn dispose(&self) {
        if self.state() == DerivedState::Disposed {
            return;
        }
        let _ = self.inner.current();
        *self.inner.state.write() = DerivedState::Disposed;
        let released = std::mem::take(&mut *self.inner.dependencies.lock());
        drop(released);
        trace!(derived = %self.inner.id, "derived disposed");
    }

    /// Mark the value as needing recomputation.
    pub fn mark_dirty(&self) {
        self.inner.mark_maybe_dirty();
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> DerivedState {
        *self.inner.state.read()
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == DerivedState::Disposed
    }

    /// How many times the compute function has run.
    pub fn compute_count(&self) -> usize {
        self.inner.compute_count.load(Ordering::SeqCst)
    }

    /// Number of sources read by the last computation.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }

    /// Get the number of dependents.
    pub fn dependent_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Check if the value has been computed at least once.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }
}

impl<T> DerivedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn current(&self) -> T {
        let state = *self.state.read();
        match state {
            DerivedState::Clean => {
                if let Some(value) = self.value.read().clone() {
                    return value;
                }
            }
            DerivedState::Disposed => {
                if let Some(value) = self.value.read().clone() {
                    return value;
                }
                let value = TrackingContext::untracked(|| (self.compute)());
                *self.value.write() = Some(value.clone());
                return value;
            }
            DerivedState::Dirty => {}
        }
        self.recompute()
    }

    fn recompute(&self) -> T {
        let _guard = self.compute_lock.lock();

        // Another thread may have finished while we waited for the lock.
        if *self.state.read() != DerivedState::Dirty {
            if let Some(value) = self.value.read().clone() {
                return value;
            }
        }

        let epoch = self.epoch.load(Ordering::SeqCst);

        // Drop the previous run's subscriptions before re-tracking.
        let stale = std::mem::take(&mut *self.dependencies.lock());
        drop(stale);

        let observer: Weak<dyn Reactive> = self.self_ref.clone();
        let scope = TrackingContext::enter(self.subscriber_id, observer);
        let value = (self.compute)();
        let dependencies = scope.finish();

        #[cfg(feature = "strict")]
        if dependencies.is_empty() {
            let error = crate::error::Error::StaleDependency {
                observer: format!("derived {}", self.id),
            };
            tracing::warn!(%error, "derived value read no reactive source");
        }

        self.compute_count.fetch_add(1, Ordering::SeqCst);
        trace!(
            derived = %self.id,
            dependencies = dependencies.len(),
            "derived recomputed"
        );

        {
            let mut slot = self.dependencies.lock();
            if *self.state.read() != DerivedState::Disposed {
                *slot = dependencies;
            }
        }
        *self.value.write() = Some(value.clone());

        let mut state = self.state.write();
        if *state == DerivedState::Dirty && self.epoch.load(Ordering::SeqCst) == epoch {
            *state = DerivedState::Clean;
        }

        value
    }
}

impl<T> Reactive for DerivedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_maybe_dirty(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let was_clean = {
            let mut state = self.state.write();
            match *state {
                DerivedState::Clean => {
                    *state = DerivedState::Dirty;
                    true
                }
                DerivedState::Dirty | DerivedState::Disposed => false,
            }
        };

        // Dependents were told when this value last went dirty, unless a
        // computation is in flight and about to hand out a soon-stale value.
        if was_clean || self.compute_lock.is_locked() {
            Runtime::propagate(self.subscribers.snapshot());
        }
    }

    fn schedule(&self) {}

    fn is_eager(&self) -> bool {
        false
    }
}

/// A user callback subscribed to a derived value.
struct DerivedCallback<T> {
    id: SubscriberId,
    source: Weak<DerivedInner<T>>,
    last: Mutex<Option<T>>,
    f: Box<dyn Fn(&T) + Send + Sync>,
}

impl<T> Reactive for DerivedCallback<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn mark_maybe_dirty(&self) {}

    fn schedule(&self) {
        let Some(source) = self.source.upgrade() else {
            return;
        };
        let value = source.current();
        {
            let mut last = self.last.lock();
            if last.as_ref() == Some(&value) {
                return;
            }
            *last = Some(value.clone());
        }
        (self.f)(&value);
    }

    fn is_eager(&self) -> bool {
        true
    }
}

impl<T> Clone for Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Derived<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
