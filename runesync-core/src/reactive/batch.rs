//! Synchronous batching for the server engine.
//!
//! Batch state is thread-local, like the tracking stack: a batch opened by
//! one request handler never absorbs writes from another thread, and all
//! deferred notifications are delivered before the outermost `batch` call
//! returns.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use tracing::{error, trace};

use crate::batch::{Batcher, PendingQueue, MAX_FLUSH_ROUNDS};
use crate::subscriber::SubscriberId;

use super::runtime::Reactive;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static FLUSHING: Cell<bool> = const { Cell::new(false) };
    static QUEUE: RefCell<PendingQueue<Arc<dyn Reactive>>> = RefCell::new(PendingQueue::new());
}

/// Batcher that flushes synchronously when the outermost scope ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncBatcher;

impl Batcher for SyncBatcher {
    type Job = Arc<dyn Reactive>;

    fn begin(&self) {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
    }

    fn end(&self) {
        let remaining = DEPTH.with(|depth| {
            let next = depth.get().saturating_sub(1);
            depth.set(next);
            next
        });
        if remaining > 0 {
            return;
        }
        if std::thread::panicking() {
            QUEUE.with(|queue| drop(queue.borrow_mut().take()));
            return;
        }
        self.flush();
    }

    fn defer(&self, id: SubscriberId, job: Self::Job) {
        QUEUE.with(|queue| queue.borrow_mut().push(id, job));
    }

    fn depth(&self) -> usize {
        DEPTH.with(Cell::get)
    }
}

/// Resets the flushing flag even if a subscriber panics.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        FLUSHING.with(|flushing| flushing.set(false));
    }
}

impl SyncBatcher {
    /// Run deferred subscribers until the queue stays empty.
    ///
    /// Writes made by a subscriber are queued for the next round of this
    /// loop rather than flushed recursively.
    fn flush(&self) {
        if FLUSHING.with(|flushing| flushing.replace(true)) {
            return;
        }
        let _guard = FlushGuard;

        let mut rounds = 0;
        loop {
            let jobs = QUEUE.with(|queue| queue.borrow_mut().take());
            if jobs.is_empty() {
                break;
            }
            rounds += 1;
            if rounds > MAX_FLUSH_ROUNDS {
                error!(
                    dropped = jobs.len(),
                    rounds, "notification loop did not settle, dropping remaining work"
                );
                break;
            }
            trace!(count = jobs.len(), round = rounds, "flushing deferred notifications");
            for (_, job) in jobs {
                job.schedule();
            }
        }
    }

    /// Number of notifications waiting on this thread.
    pub fn pending(&self) -> usize {
        QUEUE.with(|queue| queue.borrow().len())
    }
}

/// Run `f` as one batch on the current thread.
///
/// Every subscriber affected by writes inside `f` is notified once, after
/// `f` returns, with the final values.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    SyncBatcher.batch(f)
}
