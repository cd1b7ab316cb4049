//! Subscriber bookkeeping shared by the server and client engines.
//!
//! A subscriber is anything that wants to hear about a change to a reactive
//! source: a derived value, an effect, a user callback, or a collection's
//! change tap. Each one is identified by a [`SubscriberId`] handed out from a
//! monotonic counter, so ids double as registration tokens.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a subscriber.
///
/// Ids are monotonic, which lets a [`SubscriberSet`] keyed by them iterate in
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Unique identifier for a reactive source (signal or derived value).
///
/// Rendered as an opaque string such as `src-17`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(u64);

impl SourceId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// Ordered set of subscribers of one source.
///
/// The set itself carries no lock; each engine wraps it in the cell type it
/// uses for the rest of the primitive (`RwLock` on the server, `RefCell` on
/// the client). Notification always goes through [`SubscriberSet::snapshot`]
/// so that callbacks may subscribe or unsubscribe while being notified.
pub struct SubscriberSet<E> {
    entries: BTreeMap<SubscriberId, E>,
}

impl<E> SubscriberSet<E> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Insert or replace the entry registered under `id`.
    pub fn insert(&mut self, id: SubscriberId, entry: E) {
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: SubscriberId) -> Option<E> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E: Clone> SubscriberSet<E> {
    /// Copy the current entries in registration order.
    pub fn snapshot(&self) -> Vec<(SubscriberId, E)> {
        self.entries
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect()
    }
}

impl<E> Default for SubscriberSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for SubscriberSet<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("len", &self.entries.len())
            .finish()
    }
}
