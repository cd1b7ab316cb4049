use serde_json::Value;

use crate::error::Result;
use crate::state::{Change, Origin, PeerId, Snapshot};

/// Change hook installed by a [`SyncChannel`](super::SyncChannel).
pub type ChangeObserver = Box<dyn Fn(&Change) + Send + Sync>;

/// A collection a [`SyncChannel`](super::SyncChannel) can keep in sync.
///
/// Implemented by the server [`StateCollection`](crate::state::StateCollection)
/// and the client [`StateMap`](crate::client::StateMap).
pub trait SyncTarget {
    /// Keeps the channel's change hook registered while alive.
    type Observer;

    fn component_id(&self) -> String;

    fn snapshot(&self) -> Snapshot;

    /// Apply writes atomically with respect to validation.
    fn apply_changes(&self, changes: Vec<(String, Option<Value>)>, origin: Origin) -> Result<()>;

    fn observe(&self, observer: ChangeObserver) -> Self::Observer;

    /// Claim the collection for `peer`; fails if another channel holds it.
    fn attach_peer(&self, peer: PeerId) -> Result<()>;

    fn detach_peer(&self, peer: PeerId);
}
