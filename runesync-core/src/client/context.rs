//! Client tracking stack.
//!
//! The browser engine runs on one thread, so a single thread-local stack
//! holds the observer of every computation in progress.

use std::cell::RefCell;
use std::rc::Weak;

use smallvec::SmallVec;

use super::runtime::{Observer, Subscription};
use crate::subscriber::{SourceId, SubscriberId};

thread_local! {
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

struct Frame {
    observer: Option<(SubscriberId, Weak<dyn Observer>)>,
    sources: SmallVec<[SourceId; 8]>,
    subscriptions: Vec<Subscription>,
}

/// Pops its frame on drop.
pub(crate) struct Scope {
    popped: bool,
}

pub(crate) fn enter(subscriber_id: SubscriberId, observer: Weak<dyn Observer>) -> Scope {
    push(Some((subscriber_id, observer)))
}

fn push(observer: Option<(SubscriberId, Weak<dyn Observer>)>) -> Scope {
    STACK.with(|stack| {
        stack.borrow_mut().push(Frame {
            observer,
            sources: SmallVec::new(),
            subscriptions: Vec::new(),
        })
    });
    Scope { popped: false }
}

/// Run `f` without registering dependencies.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _scope = push(None);
    f()
}

/// Whether a read right now would register a dependency.
pub fn is_tracking() -> bool {
    STACK.with(|stack| {
        stack
            .borrow()
            .last()
            .is_some_and(|frame| frame.observer.is_some())
    })
}

pub(crate) fn track<F>(source: SourceId, register: F)
where
    F: FnOnce(SubscriberId, Weak<dyn Observer>) -> Subscription,
{
    let observer = STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let frame = stack.last_mut()?;
        let observer = frame.observer.clone()?;
        if frame.sources.contains(&source) {
            return None;
        }
        frame.sources.push(source);
        Some(observer)
    });

    if let Some((subscriber_id, observer)) = observer {
        let subscription = register(subscriber_id, observer);
        STACK.with(|stack| {
            if let Some(frame) = stack.borrow_mut().last_mut() {
                frame.subscriptions.push(subscription);
            }
        });
    }
}

impl Scope {
    pub(crate) fn finish(mut self) -> Vec<Subscription> {
        self.pop()
            .map(|frame| frame.subscriptions)
            .unwrap_or_default()
    }

    fn pop(&mut self) -> Option<Frame> {
        if self.popped {
            return None;
        }
        self.popped = true;
        STACK.with(|stack| stack.borrow_mut().pop())
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        let frame = self.pop();
        drop(frame);
    }
}
