//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued on the batcher and
//!    re-runs once when the batch flushes.
//!
//! 3. Before re-running, the effect invokes the previous cleanup, drops its
//!    old dependencies, and tracks new ones during execution.
//!
//! # Lifetime
//!
//! Sources hold effects weakly. An effect stays live while at least one
//! [`Effect`] handle exists; dropping the last handle disposes it.
//!
//! # Cleanup
//!
//! Effects can return a cleanup function. It runs before the next run and
//! when the effect is disposed, exactly once per run.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use super::batch::SyncBatcher;
use super::context::TrackingContext;
use super::runtime::{Reactive, Subscription};
use crate::batch::Batcher;
use crate::subscriber::SubscriberId;

/// Cleanup returned by an effect run.
pub type Cleanup = Box<dyn FnOnce() + Send>;

type RunFn = Box<dyn FnMut() -> Option<Cleanup> + Send>;

static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_effect_id() -> u64 {
    EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use runesync_core::reactive::{Effect, Signal};
///
/// let count = Signal::new(0);
///
/// let effect = {
///     let count = count.clone();
///     Effect::new(move || {
///         println!("Count is: {}", count.get());
///     })
/// };
///
/// count.set(5); // Prints: "Count is: 5"
/// assert_eq!(effect.run_count(), 2);
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
}

struct EffectInner {
    id: u64,
    subscriber_id: SubscriberId,
    self_ref: Weak<EffectInner>,

    /// The effect function. Locked for the duration of a run, which also
    /// serializes runs triggered from different threads.
    run: Mutex<RunFn>,

    /// Dependencies and cleanup of the last completed run.
    slot: Mutex<RunSlot>,

    disposed: AtomicBool,
    paused: AtomicBool,
    run_count: AtomicUsize,
}

#[derive(Default)]
struct RunSlot {
    dependencies: Vec<Subscription>,
    cleanup: Option<Cleanup>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(mut run: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::with_cleanup(move || {
            run();
            None
        })
    }

    /// Create an effect whose runs may return a cleanup function.
    pub fn with_cleanup<F>(run: F) -> Self
    where
        F: FnMut() -> Option<Cleanup> + Send + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create a new effect without running it immediately.
    ///
    /// It has no dependencies until [`Effect::execute`] is called.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: FnMut() -> Option<Cleanup> + Send + 'static,
    {
        let inner = Arc::new_cyclic(|self_ref| EffectInner {
            id: next_effect_id(),
            subscriber_id: SubscriberId::new(),
            self_ref: self_ref.clone(),
            run: Mutex::new(Box::new(run)),
            slot: Mutex::new(RunSlot::default()),
            disposed: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        });
        Self { inner }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the subscriber ID for this effect.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Run the effect now, re-tracking its dependencies.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Stop reacting to changes without disposing. Idempotent.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            trace!(effect = self.inner.id, "effect paused");
        }
    }

    /// Resume reacting to changes. If the effect was paused it re-runs once
    /// immediately to catch up with anything missed.
    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            trace!(effect = self.inner.id, "effect resumed");
            self.inner.execute();
        }
    }

    /// Dispose of the effect.
    ///
    /// Runs the pending cleanup and releases every dependency. Idempotent,
    /// and safe to call from inside the effect's own body or from another
    /// thread while it runs.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.slot.lock().dependencies.len()
    }
}

impl EffectInner {
    fn is_inactive(&self) -> bool {
        self.disposed.load(Ordering::SeqCst) || self.paused.load(Ordering::SeqCst)
    }

    fn execute(&self) {
        if self.is_inactive() {
            return;
        }
        // Writes made by the body are delivered after the run lock is
        // released, so an effect may write to its own dependencies.
        SyncBatcher.batch(|| self.run_once());
    }

    fn run_once(&self) {
        let mut run = self.run.lock();
        if self.is_inactive() {
            return;
        }

        let previous = std::mem::take(&mut *self.slot.lock());
        if let Some(cleanup) = previous.cleanup {
            cleanup();
        }
        drop(previous.dependencies);

        let observer: Weak<dyn Reactive> = self.self_ref.clone();
        let scope = TrackingContext::enter(self.subscriber_id, observer);
        let cleanup = (run)();
        let dependencies = scope.finish();
        drop(run);

        #[cfg(feature = "strict")]
        if dependencies.is_empty() {
            let error = crate::error::Error::StaleDependency {
                observer: format!("effect {}", self.id),
            };
            tracing::warn!(%error, "effect read no reactive source");
        }

        self.run_count.fetch_add(1, Ordering::SeqCst);
        trace!(
            effect = self.id,
            dependencies = dependencies.len(),
            "effect ran"
        );

        let mut slot = self.slot.lock();
        if self.disposed.load(Ordering::SeqCst) {
            // Disposed during this run: nothing may outlive it.
            drop(slot);
            drop(dependencies);
            if let Some(cleanup) = cleanup {
                cleanup();
            }
            return;
        }
        slot.dependencies = dependencies;
        slot.cleanup = cleanup;
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let slot = std::mem::take(&mut *self.slot.lock());
        drop(slot.dependencies);
        if let Some(cleanup) = slot.cleanup {
            cleanup();
        }
        trace!(effect = self.id, "effect disposed");
    }
}

impl Reactive for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_maybe_dirty(&self) {}

    fn schedule(&self) {
        self.execute();
    }

    fn is_eager(&self) -> bool {
        true
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("paused", &self.is_paused())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
