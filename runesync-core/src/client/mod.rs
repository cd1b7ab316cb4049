//! Browser engine
//!
//! Single-threaded counterparts of the server primitives, built on `Rc` and
//! `RefCell` with one thread-local tracking stack. The semantics match the
//! server engine with one deliberate difference: eager work (effects,
//! subscriptions, change hooks) never runs synchronously from a write. It is
//! queued and delivered on the next microtask drain, see [`microtask`].
//!
//! ```rust
//! use runesync_core::client::{run_microtasks, Effect, Signal};
//!
//! let count = Signal::new(0);
//! let effect = {
//!     let count = count.clone();
//!     Effect::new(move || {
//!         count.get();
//!     })
//! };
//!
//! count.set(1);
//! count.set(2);
//! run_microtasks();
//! assert_eq!(effect.run_count(), 2);
//! ```

mod context;
mod derived;
mod effect;
pub mod microtask;
mod runtime;
mod signal;
mod state;

pub use context::{is_tracking, untracked};
pub use derived::Derived;
pub use effect::{Cleanup, Effect};
pub use microtask::{
    batch, pending_microtasks, queue_microtask, run_microtasks, set_microtask_hook, MicrotaskBatcher,
};
pub use runtime::Subscription;
pub use signal::Signal;
pub use state::StateMap;
