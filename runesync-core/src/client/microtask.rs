//! Microtask queue and the client batcher.
//!
//! The browser engine never runs an effect synchronously from a write. Every
//! eager notification is queued and delivered the next time the host drains
//! microtasks, so any number of writes made in the same task are seen as one
//! change. The host wires [`run_microtasks`] to its own microtask checkpoint
//! (for example through [`set_microtask_hook`]); tests call it directly.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{error, trace};

use super::runtime::Observer;
use crate::batch::{Batcher, PendingQueue, MAX_FLUSH_ROUNDS};
use crate::subscriber::SubscriberId;

/// Upper bound on microtasks run by one [`run_microtasks`] call.
pub const MAX_MICROTASKS_PER_DRAIN: usize = 10_000;

type Microtask = Box<dyn FnOnce()>;

thread_local! {
    static MICROTASKS: RefCell<VecDeque<Microtask>> = RefCell::new(VecDeque::new());
    static HOOK: RefCell<Option<Rc<dyn Fn()>>> = RefCell::new(None);
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static SCHEDULED: Cell<bool> = const { Cell::new(false) };
    static FLUSHING: Cell<bool> = const { Cell::new(false) };
    static QUEUE: RefCell<PendingQueue<Rc<dyn Observer>>> = RefCell::new(PendingQueue::new());
}

/// Enqueue `task` for the next drain.
///
/// The host hook, if any, is called when the queue goes from empty to
/// non-empty.
pub fn queue_microtask(task: impl FnOnce() + 'static) {
    let was_empty = MICROTASKS.with(|queue| {
        let mut queue = queue.borrow_mut();
        let was_empty = queue.is_empty();
        queue.push_back(Box::new(task));
        was_empty
    });

    if was_empty {
        let hook = HOOK.with(|hook| hook.borrow().clone());
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Run queued microtasks until the queue is empty. Returns how many ran.
pub fn run_microtasks() -> usize {
    let mut ran = 0;
    loop {
        let Some(task) = MICROTASKS.with(|queue| queue.borrow_mut().pop_front()) else {
            break;
        };
        if ran == MAX_MICROTASKS_PER_DRAIN {
            let dropped = MICROTASKS.with(|queue| {
                let mut queue = queue.borrow_mut();
                let dropped = queue.len() + 1;
                queue.clear();
                dropped
            });
            error!(dropped, "microtask queue did not settle; dropping remaining tasks");
            break;
        }
        task();
        ran += 1;
    }
    ran
}

/// Number of microtasks waiting for the next drain.
pub fn pending_microtasks() -> usize {
    MICROTASKS.with(|queue| queue.borrow().len())
}

/// Install (or clear) the host hook that schedules a drain.
pub fn set_microtask_hook(hook: Option<Rc<dyn Fn()>>) {
    HOOK.with(|slot| *slot.borrow_mut() = hook);
}

/// Defers eager notifications to the next microtask drain.
///
/// `begin`/`end` only group writes; nothing is delivered at batch end.
#[derive(Debug, Clone, Copy, Default)]
pub struct MicrotaskBatcher;

impl Batcher for MicrotaskBatcher {
    type Job = Rc<dyn Observer>;

    fn begin(&self) {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
    }

    fn end(&self) {
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }

    fn defer(&self, id: SubscriberId, job: Self::Job) {
        QUEUE.with(|queue| queue.borrow_mut().push(id, job));
        if FLUSHING.with(Cell::get) || SCHEDULED.with(|scheduled| scheduled.replace(true)) {
            return;
        }
        queue_microtask(flush);
    }

    fn depth(&self) -> usize {
        DEPTH.with(Cell::get)
    }
}

impl MicrotaskBatcher {
    /// Observers waiting for the next drain.
    pub fn pending(&self) -> usize {
        QUEUE.with(|queue| queue.borrow().len())
    }
}

/// Group writes. On the client this only affects [`MicrotaskBatcher::depth`];
/// delivery still waits for the next microtask drain.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    MicrotaskBatcher.batch(f)
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        FLUSHING.with(|flushing| flushing.set(false));
    }
}

fn flush() {
    SCHEDULED.with(|scheduled| scheduled.set(false));
    FLUSHING.with(|flushing| flushing.set(true));
    let _guard = FlushGuard;

    for round in 0.. {
        let jobs = QUEUE.with(|queue| queue.borrow_mut().take());
        if jobs.is_empty() {
            return;
        }
        if round == MAX_FLUSH_ROUNDS {
            error!(
                rounds = MAX_FLUSH_ROUNDS,
                dropped = jobs.len(),
                "effects kept re-triggering each other; dropping notifications"
            );
            return;
        }
        trace!(round, jobs = jobs.len(), "client flush round");
        for (_, observer) in jobs {
            observer.run();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn microtasks_run_in_order_on_drain() {
        let log = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3 {
            let log = log.clone();
            queue_microtask(move || log.borrow_mut().push(n));
        }

        assert!(log.borrow().is_empty());
        assert_eq!(pending_microtasks(), 3);
        assert_eq!(run_microtasks(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn tasks_queued_during_drain_run_in_same_drain() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let log = log.clone();
            queue_microtask(move || {
                log.borrow_mut().push("outer");
                let log = log.clone();
                queue_microtask(move || log.borrow_mut().push("inner"));
            });
        }

        run_microtasks();
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn hook_fires_when_queue_becomes_non_empty() {
        let calls = Rc::new(Cell::new(0));
        {
            let calls = calls.clone();
            set_microtask_hook(Some(Rc::new(move || calls.set(calls.get() + 1))));
        }

        queue_microtask(|| {});
        queue_microtask(|| {});
        assert_eq!(calls.get(), 1);

        run_microtasks();
        queue_microtask(|| {});
        assert_eq!(calls.get(), 2);

        set_microtask_hook(None);
        run_microtasks();
    }

    #[test]
    fn runaway_microtasks_are_cut_off() {
        fn requeue() {
            queue_microtask(requeue);
        }
        queue_microtask(requeue);

        assert_eq!(run_microtasks(), MAX_MICROTASKS_PER_DRAIN);
        assert_eq!(pending_microtasks(), 0);
    }
}
