//! Change events emitted by state collections.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies the remote end of one sync connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(u64);

impl PeerId {
    /// Allocate a fresh peer id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for PeerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Where a write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Application code on this side.
    Local,
    /// Applied from an inbound message of the given peer.
    Remote(PeerId),
    /// Restores a value after the given peer rejected an optimistic write.
    /// Rollbacks bypass validators.
    Rollback(PeerId),
}

impl Origin {
    /// The peer this write came from, if any.
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Origin::Local => None,
            Origin::Remote(peer) | Origin::Rollback(peer) => Some(*peer),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }

    pub(crate) fn skips_validation(&self) -> bool {
        matches!(self, Origin::Rollback(_))
    }
}

/// One logical change to a collection entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub key: String,
    /// The new value; `None` when the key was removed.
    pub value: Option<Value>,
    pub origin: Origin,
}

impl Change {
    pub fn is_removal(&self) -> bool {
        self.value.is_none()
    }
}
