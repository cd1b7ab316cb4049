//! Reactive Primitives (server engine)
//!
//! This module implements the thread-safe reactive system: signals, derived
//! values, and effects. Every primitive is `Send + Sync` and can be shared
//! between request-handling threads.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a derived value or effect), the signal
//! registers that context as a dependent. When the value changes, all
//! dependents are notified.
//!
//! ## Derived values
//!
//! A Derived is a value computed from other reactive values and cached until
//! one of them changes. Recomputation is lazy: it happens on the next read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses a thread-local stack of frames, so each thread
//! (each unit of work) tracks its own computations. Notifications are
//! delivered synchronously: lazy dependents are marked dirty immediately and
//! eager ones run when the outermost [`batch`] on the thread ends. Every
//! lock is scoped to a single primitive and released before callbacks run.

mod batch;
mod context;
mod derived;
mod effect;
mod runtime;
mod signal;

pub use batch::{batch, SyncBatcher};
pub use context::{TrackingContext, TrackingScope};
pub use derived::{Derived, DerivedState};
pub use effect::{Cleanup, Effect};
pub use runtime::{Reactive, Runtime, Subscription};
pub use signal::Signal;

/// Run `f` without registering any dependency on the current thread.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    TrackingContext::untracked(f)
}
