//! Client effect.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::context;
use super::runtime::{Observer, Subscription};
use crate::subscriber::SubscriberId;

/// Cleanup returned by a client effect run.
pub type Cleanup = Box<dyn FnOnce()>;

type RunFn = Box<dyn FnMut() -> Option<Cleanup>>;

/// Side effect for the browser engine.
///
/// Runs once on construction, then once per microtask drain in which any
/// dependency changed. The previous cleanup runs before each re-run and on
/// dispose. Dropping the last handle disposes the effect.
pub struct Effect {
    inner: Rc<EffectInner>,
}

struct EffectInner {
    subscriber_id: SubscriberId,
    self_ref: Weak<EffectInner>,
    run: RefCell<RunFn>,
    dependencies: RefCell<Vec<Subscription>>,
    cleanup: RefCell<Option<Cleanup>>,
    running: Cell<bool>,
    disposed: Cell<bool>,
    paused: Cell<bool>,
    run_count: Cell<usize>,
}

impl Effect {
    pub fn new(mut run: impl FnMut() + 'static) -> Self {
        Self::with_cleanup(move || {
            run();
            None
        })
    }

    pub fn with_cleanup(run: impl FnMut() -> Option<Cleanup> + 'static) -> Self {
        let inner = Rc::new_cyclic(|self_ref| EffectInner {
            subscriber_id: SubscriberId::new(),
            self_ref: self_ref.clone(),
            run: RefCell::new(Box::new(run)),
            dependencies: RefCell::new(Vec::new()),
            cleanup: RefCell::new(None),
            running: Cell::new(false),
            disposed: Cell::new(false),
            paused: Cell::new(false),
            run_count: Cell::new(0),
        });
        inner.execute();
        Self { inner }
    }

    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Stop reacting until [`Effect::resume`].
    pub fn pause(&self) {
        self.inner.paused.set(true);
    }

    /// Resume and re-run once if the effect was paused.
    pub fn resume(&self) {
        if self.inner.paused.replace(false) {
            self.inner.execute();
        }
    }

    /// Run the cleanup and release every dependency. Idempotent, and safe to
    /// call from inside the effect body.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.get()
    }

    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.borrow().len()
    }
}

impl EffectInner {
    fn execute(&self) {
        if self.disposed.get() || self.paused.get() || self.running.get() {
            return;
        }
        self.running.set(true);

        let previous = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = previous {
            cleanup();
        }
        let stale = std::mem::take(&mut *self.dependencies.borrow_mut());
        drop(stale);

        let observer: Weak<dyn Observer> = self.self_ref.clone();
        let scope = context::enter(self.subscriber_id, observer);
        let cleanup = {
            let mut run = self.run.borrow_mut();
            (*run)()
        };
        let dependencies = scope.finish();

        self.running.set(false);
        self.run_count.set(self.run_count.get() + 1);

        if self.disposed.get() {
            // Disposed during the run.
            if let Some(cleanup) = cleanup {
                cleanup();
            }
            return;
        }
        *self.dependencies.borrow_mut() = dependencies;
        *self.cleanup.borrow_mut() = cleanup;
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        let dependencies = std::mem::take(&mut *self.dependencies.borrow_mut());
        drop(dependencies);
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

impl Observer for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_dirty(&self) {}

    fn run(&self) {
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

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("subscriber_id", &self.inner.subscriber_id)
            .field("run_count", &self.inner.run_count.get())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}
