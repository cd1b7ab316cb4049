//! Named state collections.
//!
//! Server-side collections of JSON signals, the snapshot/diff types shared
//! with the client engine, and the pruner that evicts entries nobody has
//! touched for a while.

mod change;
mod collection;
mod diff;
mod modified;
mod pruner;
mod registry;

pub use change::{Change, Origin, PeerId};
pub use collection::{StateCollection, Validator};
pub use diff::{Diff, Snapshot};
pub use pruner::{PruneCallback, Pruner, PrunerHandle};
pub use registry::StateRegistry;

pub(crate) use modified::ModifiedIndex;
