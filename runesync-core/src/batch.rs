//! Batching
//!
//! A batch is a unit of work whose writes are coalesced into a single
//! notification round. Values are written immediately and lazy dependents
//! (derived values) are marked dirty immediately; only eager subscribers
//! (effects, callbacks, change taps) are deferred, and each of them runs at
//! most once per round no matter how many of its sources changed.
//!
//! The two engines deliberately flush at different points:
//!
//! - the server's [`SyncBatcher`](crate::reactive::SyncBatcher) flushes
//!   synchronously when the outermost batch on the current thread ends, so
//!   nothing carries over between requests;
//! - the client's [`MicrotaskBatcher`](crate::client::MicrotaskBatcher)
//!   flushes on the next microtask so one task's writes land in a single
//!   render pass.

use indexmap::IndexMap;

use crate::subscriber::SubscriberId;

/// Upper bound on flush rounds before a feedback loop is cut off.
pub const MAX_FLUSH_ROUNDS: usize = 100;

/// Strategy for deferring eager notifications.
pub trait Batcher {
    /// The deferred unit of work (an eager subscriber handle).
    type Job;

    /// Open a batch scope. Scopes nest.
    fn begin(&self);

    /// Close a batch scope. Closing the outermost scope triggers the
    /// strategy's flush policy.
    fn end(&self);

    /// Queue `job` under `id`. Queuing the same id twice before a flush keeps
    /// one entry.
    fn defer(&self, id: SubscriberId, job: Self::Job);

    /// Current nesting depth on this thread.
    fn depth(&self) -> usize;

    fn is_batching(&self) -> bool {
        self.depth() > 0
    }

    /// Run `f` inside a batch scope.
    fn batch<R>(&self, f: impl FnOnce() -> R) -> R
    where
        Self: Sized,
    {
        self.begin();
        let _scope = ScopeGuard(self);
        f()
    }
}

/// Closes the scope even if the batched closure panics.
struct ScopeGuard<'a, B: Batcher>(&'a B);

impl<B: Batcher> Drop for ScopeGuard<'_, B> {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// Deduplicating FIFO of deferred jobs.
///
/// Re-queuing an id keeps its original position, so subscribers run in the
/// order their first notification arrived.
pub struct PendingQueue<J> {
    jobs: IndexMap<SubscriberId, J>,
}

impl<J> PendingQueue<J> {
    pub fn new() -> Self {
        Self {
            jobs: IndexMap::new(),
        }
    }

    pub fn push(&mut self, id: SubscriberId, job: J) {
        self.jobs.entry(id).or_insert(job);
    }

    /// Take every queued job, leaving the queue empty for the next round.
    pub fn take(&mut self) -> Vec<(SubscriberId, J)> {
        std::mem::take(&mut self.jobs).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl<J> Default for PendingQueue<J> {
    fn default() -> Self {
        Self::new()
    }
}
