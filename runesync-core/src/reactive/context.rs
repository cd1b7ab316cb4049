//! Tracking Context
//!
//! The tracking context records which computation is currently running so
//! that reads can register dependencies automatically.
//!
//! # Implementation
//!
//! Each thread keeps its own stack of frames. Running a derived value or an
//! effect pushes a frame that names the observer; every tracked read while
//! that frame is on top subscribes the observer to the source and stores the
//! resulting [`Subscription`] in the frame. When the computation completes,
//! the frame is popped and its subscriptions become the observer's complete
//! dependency set for the run.
//!
//! The stack is per thread, never process-wide: request handlers running
//! concurrently on different threads can never see each other's frames.
//! Nested computations (an effect reading a derived value) simply push
//! another frame.

use std::cell::RefCell;
use std::sync::Weak;

use smallvec::SmallVec;

use super::runtime::{Reactive, Subscription};
use crate::subscriber::{SourceId, SubscriberId};

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// One entry on the tracking stack.
struct Frame {
    /// `None` for untracked frames, which swallow reads.
    observer: Option<(SubscriberId, Weak<dyn Reactive>)>,
    /// Sources already registered during this run.
    sources: SmallVec<[SourceId; 8]>,
    subscriptions: Vec<Subscription>,
}

/// Access to the current thread's tracking stack.
pub struct TrackingContext;

/// Guard that pops the frame it pushed when dropped.
///
/// A computation that panics therefore still leaves the stack balanced.
pub struct TrackingScope {
    subscriber_id: Option<SubscriberId>,
    popped: bool,
}

impl TrackingContext {
    /// Enter a tracked frame for `observer`.
    pub(crate) fn enter(subscriber_id: SubscriberId, observer: Weak<dyn Reactive>) -> TrackingScope {
        Self::push(Some((subscriber_id, observer)))
    }

    /// Run `f` with tracking suppressed: reads inside it never register.
    pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
        let _scope = Self::push(None);
        f()
    }

    fn push(observer: Option<(SubscriberId, Weak<dyn Reactive>)>) -> TrackingScope {
        let subscriber_id = observer.as_ref().map(|(id, _)| *id);
        FRAMES.with(|frames| {
            frames.borrow_mut().push(Frame {
                observer,
                sources: SmallVec::new(),
                subscriptions: Vec::new(),
            });
        });
        TrackingScope {
            subscriber_id,
            popped: false,
        }
    }

    /// Whether reads on this thread currently register dependencies.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// The observer of the innermost tracked frame.
    pub fn current_subscriber() -> Option<SubscriberId> {
        FRAMES.with(|frames| {
            frames
                .borrow()
                .last()
                .and_then(|frame| frame.observer.as_ref().map(|(id, _)| *id))
        })
    }

    /// Whether `subscriber_id` is running anywhere on this thread's stack.
    pub fn is_observing(subscriber_id: SubscriberId) -> bool {
        FRAMES.with(|frames| {
            frames
                .borrow()
                .iter()
                .any(|frame| matches!(&frame.observer, Some((id, _)) if *id == subscriber_id))
        })
    }

    /// Number of frames on this thread's stack.
    pub fn depth() -> usize {
        FRAMES.with(|frames| frames.borrow().len())
    }

    /// Record a read of `source`.
    ///
    /// `register` is called at most once per source per frame, with no
    /// borrow of the stack held, and must subscribe the observer.
    pub(crate) fn track<F>(source: SourceId, register: F)
    where
        F: FnOnce(SubscriberId, Weak<dyn Reactive>) -> Subscription,
    {
        let observer = FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            let frame = frames.last_mut()?;
            let observer = frame.observer.clone()?;
            if frame.sources.contains(&source) {
                return None;
            }
            frame.sources.push(source);
            Some(observer)
        });

        let Some((subscriber_id, observer)) = observer else {
            return;
        };
        let subscription = register(subscriber_id, observer);

        FRAMES.with(|frames| {
            if let Some(frame) = frames.borrow_mut().last_mut() {
                frame.subscriptions.push(subscription);
            }
        });
    }
}

impl TrackingScope {
    /// Pop the frame and return the subscriptions collected during the run.
    pub(crate) fn finish(mut self) -> Vec<Subscription> {
        self.pop().map(|frame| frame.subscriptions).unwrap_or_default()
    }

    fn pop(&mut self) -> Option<Frame> {
        if self.popped {
            return None;
        }
        self.popped = true;
        let frame = FRAMES.with(|frames| frames.borrow_mut().pop());
        if let Some(frame) = &frame {
            let popped_id = frame.observer.as_ref().map(|(id, _)| *id);
            debug_assert_eq!(
                popped_id, self.subscriber_id,
                "TrackingContext mismatch: expected {:?}, got {:?}",
                self.subscriber_id, popped_id
            );
        }
        frame
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        // Subscriptions are released outside the stack borrow.
        let frame = self.pop();
        drop(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Probe(SubscriberId);

    impl Reactive for Probe {
        fn subscriber_id(&self) -> SubscriberId {
            self.0
        }
        fn mark_maybe_dirty(&self) {}
        fn schedule(&self) {}
        fn is_eager(&self) -> bool {
            true
        }
    }

    fn probe() -> (Arc<dyn Reactive>, SubscriberId) {
        let id = SubscriberId::new();
        (Arc::new(Probe(id)), id)
    }

    #[test]
    fn context_tracks_subscriber() {
        let (observer, id) = probe();

        assert!(!TrackingContext::is_active());
        assert!(TrackingContext::current_subscriber().is_none());

        {
            let _scope = TrackingContext::enter(id, Arc::downgrade(&observer));
            assert!(TrackingContext::is_active());
            assert_eq!(TrackingContext::current_subscriber(), Some(id));
        }

        assert!(!TrackingContext::is_active());
        assert_eq!(TrackingContext::depth(), 0);
    }

    #[test]
    fn context_registers_each_source_once() {
        let (observer, id) = probe();
        let registrations = Arc::new(AtomicUsize::new(0));
        let source = SourceId::new();

        let scope = TrackingContext::enter(id, Arc::downgrade(&observer));
        for _ in 0..3 {
            let registrations = registrations.clone();
            TrackingContext::track(source, move |_, _| {
                registrations.fetch_add(1, Ordering::SeqCst);
                Subscription::new(|| {})
            });
        }
        let subscriptions = scope.finish();

        assert_eq!(registrations.load(Ordering::SeqCst), 1);
        assert_eq!(subscriptions.len(), 1);
    }

    #[test]
    fn untracked_frame_swallows_reads() {
        let (observer, id) = probe();
        let scope = TrackingContext::enter(id, Arc::downgrade(&observer));

        TrackingContext::untracked(|| {
            assert!(!TrackingContext::is_active());
            TrackingContext::track(SourceId::new(), |_, _| {
                panic!("untracked reads must not register")
            });
        });

        assert!(TrackingContext::is_active());
        assert!(scope.finish().is_empty());
    }

    #[test]
    fn nested_contexts() {
        let (outer, id1) = probe();
        let (inner, id2) = probe();

        {
            let _ctx1 = TrackingContext::enter(id1, Arc::downgrade(&outer));
            assert_eq!(TrackingContext::current_subscriber(), Some(id1));

            {
                let _ctx2 = TrackingContext::enter(id2, Arc::downgrade(&inner));
                assert_eq!(TrackingContext::current_subscriber(), Some(id2));
                assert!(TrackingContext::is_observing(id1));
            }

            assert_eq!(TrackingContext::current_subscriber(), Some(id1));
        }

        assert!(TrackingContext::current_subscriber().is_none());
    }

    #[test]
    fn frames_are_per_thread() {
        let (observer, id) = probe();
        let _scope = TrackingContext::enter(id, Arc::downgrade(&observer));

        let seen = std::thread::spawn(TrackingContext::current_subscriber)
            .join()
            .unwrap();
        assert!(seen.is_none());
        assert_eq!(TrackingContext::current_subscriber(), Some(id));
    }
}
