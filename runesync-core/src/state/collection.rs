//! Named collections of JSON signals (server side).
//!
//! A [`StateCollection`] maps string keys to `Signal<serde_json::Value>` in
//! insertion order. Every entry carries a tap: an eager subscription on its
//! signal that stamps the last-modified index and fires the change hooks.
//! Writes made through the collection record their [`Origin`] first, so the
//! tap can report who caused the change even when the notification is
//! coalesced by a batch.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::change::{Change, Origin, PeerId};
use super::diff::{Diff, Snapshot};
use super::modified::ModifiedIndex;
use crate::batch::Batcher;
use crate::error::{Error, Result};
use crate::reactive::{Signal, Subscription, SyncBatcher};
use crate::subscriber::{SourceId, SubscriberId, SubscriberSet};
use crate::sync::{ChangeObserver, SyncTarget};

/// Checks a value before it is written. `Err` carries the reason.
pub type Validator = Arc<dyn Fn(&str, &Value) -> std::result::Result<(), String> + Send + Sync>;

type ChangeHook = Arc<dyn Fn(&Change) + Send + Sync>;

/// An ordered, observable collection of JSON signals.
///
/// Cloning is cheap; clones share the same entries.
///
/// # Example
///
/// ```rust
/// use runesync_core::state::StateCollection;
/// use serde_json::json;
///
/// let todos = StateCollection::new("todos");
/// todos.set("title", json!("groceries")).unwrap();
///
/// let title = todos.get("title").unwrap();
/// assert_eq!(title.get(), json!("groceries"));
/// ```
#[derive(Clone)]
pub struct StateCollection {
    inner: Arc<CollectionInner>,
}

struct CollectionInner {
    component_id: String,
    entries: RwLock<IndexMap<String, Entry>>,
    hooks: Arc<RwLock<SubscriberSet<ChangeHook>>>,
    validators: RwLock<Vec<(Option<String>, Validator)>>,
    modified: Mutex<ModifiedIndex>,
    origins: Mutex<HashMap<String, Origin>>,
    peers: Mutex<HashSet<PeerId>>,
}

struct Entry {
    signal: Signal<Value>,
    _tap: Subscription,
}

impl StateCollection {
    pub fn new(component_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                component_id: component_id.into(),
                entries: RwLock::new(IndexMap::new()),
                hooks: Arc::new(RwLock::new(SubscriberSet::new())),
                validators: RwLock::new(Vec::new()),
                modified: Mutex::new(ModifiedIndex::new()),
                origins: Mutex::new(HashMap::new()),
                peers: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn component_id(&self) -> &str {
        &self.inner.component_id
    }

    /// Register `signal` under `key`, replacing any previous entry.
    ///
    /// The signal stays shared with the caller; writes made directly on it
    /// are reported with [`Origin::Local`].
    pub fn add(&self, key: impl Into<String>, signal: Signal<Value>) {
        self.inner.insert(key.into(), signal, Origin::Local);
    }

    /// Register a fresh signal holding `value` under `key`.
    pub fn add_value(&self, key: impl Into<String>, value: Value) -> Signal<Value> {
        let signal = Signal::new(value);
        self.add(key, signal.clone());
        signal
    }

    /// The signal stored under `key`.
    pub fn get(&self, key: &str) -> Option<Signal<Value>> {
        self.inner.entries.read().get(key).map(|entry| entry.signal.clone())
    }

    /// The current value under `key`, read without tracking.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.get(key).map(|signal| signal.get_untracked())
    }

    /// Deserialize the value under `key`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.value(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.entries.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Validated write; creates the key if it is absent.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.apply_changes(vec![(key.into(), Some(value))], Origin::Local)
    }

    /// Serialize `value` and write it under `key`.
    ///
    /// A serialization failure leaves the collection unchanged.
    pub fn set_serialized<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value)
    }

    /// Validated write tagged with an explicit origin.
    pub fn set_with_origin(&self, key: impl Into<String>, value: Value, origin: Origin) -> Result<()> {
        self.apply_changes(vec![(key.into(), Some(value))], origin)
    }

    /// Remove `key`, returning its last value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.remove(key, Origin::Local)
    }

    /// Apply several writes as one batch. `None` removes the key.
    ///
    /// Every value is validated before anything is written; if one fails,
    /// the collection is left untouched. Rollback writes skip validation.
    pub fn apply_changes(&self, changes: Vec<(String, Option<Value>)>, origin: Origin) -> Result<()> {
        if !origin.skips_validation() {
            for (key, value) in &changes {
                if let Some(value) = value {
                    self.inner.validate(key, value)?;
                }
            }
        }

        SyncBatcher.batch(|| {
            for (key, value) in changes {
                match value {
                    Some(value) => self.inner.write(key, value, origin),
                    None => {
                        self.inner.remove(&key, origin);
                    }
                }
            }
        });
        Ok(())
    }

    /// Apply a diff as local writes.
    pub fn apply_diff(&self, diff: &Diff) -> Result<()> {
        self.apply_changes(diff.clone().into_changes(), Origin::Local)
    }

    /// Make the collection equal to `snapshot`.
    pub fn replace(&self, snapshot: &Snapshot, origin: Origin) -> Result<()> {
        let diff = Diff::between(&self.to_snapshot(), snapshot);
        if diff.is_empty() {
            return Ok(());
        }
        self.apply_changes(diff.into_changes(), origin)
    }

    /// Plain `{key: value}` view in insertion order.
    pub fn to_snapshot(&self) -> Snapshot {
        self.inner
            .entries
            .read()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.signal.get_untracked()))
            .collect()
    }

    /// Diff from this collection to `other`.
    pub fn diff(&self, other: &StateCollection) -> Diff {
        Diff::between(&self.to_snapshot(), &other.to_snapshot())
    }

    /// Diff from this collection to a snapshot.
    pub fn diff_snapshot(&self, other: &Snapshot) -> Diff {
        Diff::between(&self.to_snapshot(), other)
    }

    /// Register a hook fired once per logical change.
    ///
    /// Additions and removals fire immediately; value changes fire when the
    /// enclosing batch ends, once per key with the final value.
    pub fn on_change<F>(&self, hook: F) -> Subscription
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        self.inner.hooks.write().insert(id, Arc::new(hook));
        let hooks = Arc::downgrade(&self.inner.hooks);
        Subscription::new(move || {
            if let Some(hooks) = hooks.upgrade() {
                hooks.write().remove(id);
            }
        })
    }

    /// Add a validator for one key, or for every key when `key` is `None`.
    pub fn add_validator<F>(&self, key: Option<&str>, validator: F)
    where
        F: Fn(&str, &Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.inner
            .validators
            .write()
            .push((key.map(str::to_string), Arc::new(validator)));
    }

    /// When `key` was last added or changed.
    pub fn last_modified(&self, key: &str) -> Option<Instant> {
        self.inner.modified.lock().get(key)
    }

    /// Remove every key not modified within `max_age`.
    pub fn prune_older_than(&self, max_age: Duration) -> Vec<(String, Value)> {
        self.prune_at(Instant::now(), max_age)
    }

    /// Remove every key whose age at `now` exceeds `max_age`.
    pub fn prune_at(&self, now: Instant, max_age: Duration) -> Vec<(String, Value)> {
        let stale = self.inner.modified.lock().stale(now, max_age);
        if stale.is_empty() {
            return Vec::new();
        }

        let mut removed = Vec::with_capacity(stale.len());
        SyncBatcher.batch(|| {
            for key in stale {
                if let Some(value) = self.inner.remove(&key, Origin::Local) {
                    removed.push((key, value));
                }
            }
        });
        debug!(component_id = %self.inner.component_id, count = removed.len(), "pruned stale keys");
        removed
    }

    /// Number of change hooks currently registered.
    pub fn hook_count(&self) -> usize {
        self.inner.hooks.read().len()
    }
}

impl CollectionInner {
    fn validate(&self, key: &str, value: &Value) -> Result<()> {
        let validators: Vec<Validator> = self
            .validators
            .read()
            .iter()
            .filter(|(scope, _)| scope.as_deref().map_or(true, |scope| scope == key))
            .map(|(_, validator)| Arc::clone(validator))
            .collect();

        for validator in validators {
            validator(key, value).map_err(|reason| Error::validation(key, reason))?;
        }
        Ok(())
    }

    fn write(self: &Arc<Self>, key: String, value: Value, origin: Origin) {
        let Some(signal) = self.entries.read().get(&key).map(|entry| entry.signal.clone()) else {
            self.insert(key, Signal::new(value), origin);
            return;
        };

        if signal.get_untracked() == value {
            return;
        }
        self.origins.lock().insert(key.clone(), origin);
        if !signal.set(value) {
            self.origins.lock().remove(&key);
        }
    }

    fn insert(self: &Arc<Self>, key: String, signal: Signal<Value>, origin: Origin) {
        let tap = self.tap(key.clone(), signal.id(), &signal);
        let value = signal.get_untracked();
        let previous = self.entries.write().insert(
            key.clone(),
            Entry {
                signal,
                _tap: tap,
            },
        );
        drop(previous);

        self.origins.lock().remove(&key);
        self.modified.lock().touch(&key, Instant::now());
        trace!(component_id = %self.component_id, %key, "entry added");
        self.emit(Change {
            key,
            value: Some(value),
            origin,
        });
    }

    fn remove(&self, key: &str, origin: Origin) -> Option<Value> {
        let entry = self.entries.write().shift_remove(key)?;
        let value = entry.signal.get_untracked();
        drop(entry);

        self.origins.lock().remove(key);
        self.modified.lock().forget(key);
        trace!(component_id = %self.component_id, %key, "entry removed");
        self.emit(Change {
            key: key.to_string(),
            value: None,
            origin,
        });
        Some(value)
    }

    /// Subscribe the per-entry tap to `signal`.
    fn tap(self: &Arc<Self>, key: String, source: SourceId, signal: &Signal<Value>) -> Subscription {
        let inner: Weak<CollectionInner> = Arc::downgrade(self);
        signal.subscribe(move |value| {
            if let Some(inner) = inner.upgrade() {
                inner.on_signal_changed(&key, source, value);
            }
        })
    }

    fn on_signal_changed(&self, key: &str, source: SourceId, value: &Value) {
        // A notification may arrive after the entry was replaced or removed.
        let current = self
            .entries
            .read()
            .get(key)
            .map(|entry| entry.signal.id() == source)
            .unwrap_or(false);
        if !current {
            return;
        }

        let origin = self.origins.lock().remove(key).unwrap_or(Origin::Local);
        self.modified.lock().touch(key, Instant::now());
        self.emit(Change {
            key: key.to_string(),
            value: Some(value.clone()),
            origin,
        });
    }

    fn emit(&self, change: Change) {
        let hooks = self.hooks.read().snapshot();
        for (_, hook) in hooks {
            hook(&change);
        }
    }
}

impl SyncTarget for StateCollection {
    type Observer = Subscription;

    fn component_id(&self) -> String {
        self.inner.component_id.clone()
    }

    fn snapshot(&self) -> Snapshot {
        self.to_snapshot()
    }

    fn apply_changes(&self, changes: Vec<(String, Option<Value>)>, origin: Origin) -> Result<()> {
        StateCollection::apply_changes(self, changes, origin)
    }

    fn observe(&self, hook: ChangeObserver) -> Subscription {
        self.on_change(move |change| hook(change))
    }

    fn attach_peer(&self, peer: PeerId) -> Result<()> {
        if !self.inner.peers.lock().insert(peer) {
            return Err(Error::AlreadyAttached {
                component_id: self.inner.component_id.clone(),
                peer: peer.to_string(),
            });
        }
        Ok(())
    }

    fn detach_peer(&self, peer: PeerId) {
        self.inner.peers.lock().remove(&peer);
    }
}

impl std::fmt::Debug for StateCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCollection")
            .field("component_id", &self.inner.component_id)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{batch, Derived};
    use serde_json::json;

    fn recorder(collection: &StateCollection) -> (Arc<Mutex<Vec<Change>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscription = {
            let seen = seen.clone();
            collection.on_change(move |change| seen.lock().push(change.clone()))
        };
        (seen, subscription)
    }

    #[test]
    fn add_get_and_snapshot_keep_insertion_order() {
        let collection = StateCollection::new("c");
        collection.add_value("b", json!(2));
        collection.add_value("a", json!(1));

        assert_eq!(collection.value("a"), Some(json!(1)));
        assert_eq!(
            collection.to_snapshot().keys().cloned().collect::<Vec<_>>(),
            vec!["b", "a"]
        );
    }

    #[test]
    fn hook_fires_once_per_change_with_origin() {
        let collection = StateCollection::new("c");
        collection.add_value("count", json!(0));
        let (seen, _hook) = recorder(&collection);

        collection.set("count", json!(1)).unwrap();
        collection
            .set_with_origin("count", json!(2), Origin::Remote(PeerId::from(7)))
            .unwrap();
        collection.set("count", json!(2)).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].origin, Origin::Local);
        assert_eq!(seen[1].origin, Origin::Remote(PeerId::from(7)));
        assert_eq!(seen[1].value, Some(json!(2)));
    }

    #[test]
    fn batched_writes_coalesce_per_key() {
        let collection = StateCollection::new("c");
        collection.add_value("x", json!(0));
        let (seen, _hook) = recorder(&collection);

        batch(|| {
            collection.set("x", json!(1)).unwrap();
            collection.set("x", json!(2)).unwrap();
            collection.set("x", json!(3)).unwrap();
        });

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].value, Some(json!(3)));
    }

    #[test]
    fn direct_signal_writes_are_observed() {
        let collection = StateCollection::new("c");
        let signal = collection.add_value("x", json!("a"));
        let (seen, _hook) = recorder(&collection);

        signal.set(json!("b"));

        assert_eq!(seen.lock()[0].value, Some(json!("b")));
    }

    #[test]
    fn removal_reports_none_and_detaches_signal() {
        let collection = StateCollection::new("c");
        let signal = collection.add_value("x", json!(1));
        let (seen, _hook) = recorder(&collection);

        assert_eq!(collection.remove("x"), Some(json!(1)));
        signal.set(json!(2));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_removal());
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn failing_validator_blocks_whole_batch() {
        let collection = StateCollection::new("c");
        collection.add_value("a", json!(1));
        collection.add_validator(Some("b"), |_, value| {
            if value.is_number() {
                Ok(())
            } else {
                Err("must be a number".into())
            }
        });

        let err = collection
            .apply_changes(
                vec![
                    ("a".into(), Some(json!(10))),
                    ("b".into(), Some(json!("nope"))),
                ],
                Origin::Local,
            )
            .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(collection.value("a"), Some(json!(1)));
        assert!(!collection.contains_key("b"));
    }

    #[test]
    fn rollback_skips_validators() {
        let collection = StateCollection::new("c");
        collection.add_validator(None, |_, _| Err("locked".into()));

        collection
            .set_with_origin("k", json!(1), Origin::Rollback(PeerId::from(1)))
            .unwrap();
        assert_eq!(collection.value("k"), Some(json!(1)));
        assert!(collection.set("k", json!(2)).is_err());
    }

    #[test]
    fn set_serialized_and_get_as() {
        #[derive(Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Point {
            x: i32,
            y: i32,
        }

        let collection = StateCollection::new("c");
        collection.set_serialized("p", &Point { x: 1, y: 2 }).unwrap();
        assert_eq!(collection.get_as::<Point>("p").unwrap(), Some(Point { x: 1, y: 2 }));
        assert!(collection.get_as::<String>("p").is_err());
        assert_eq!(collection.get_as::<Point>("missing").unwrap(), None);
    }

    #[test]
    fn replace_applies_minimal_diff() {
        let collection = StateCollection::new("c");
        collection.add_value("same", json!(1));
        collection.add_value("gone", json!(2));
        let (seen, _hook) = recorder(&collection);

        let target: Snapshot = serde_json::from_value(json!({"same": 1, "new": 3})).unwrap();
        collection.replace(&target, Origin::Local).unwrap();

        assert_eq!(collection.to_snapshot(), target);
        let keys: Vec<_> = seen.lock().iter().map(|c| c.key.clone()).collect();
        assert_eq!(keys, vec!["gone", "new"]);
    }

    #[test]
    fn derived_over_collection_signal() {
        let collection = StateCollection::new("c");
        let count = collection.add_value("count", json!(2));
        let doubled = {
            let count = count.clone();
            Derived::new(move || count.get().as_i64().unwrap_or(0) * 2)
        };

        assert_eq!(doubled.get(), 4);
        collection.set("count", json!(5)).unwrap();
        assert_eq!(doubled.get(), 10);
    }

    #[test]
    fn peer_can_attach_once() {
        let collection = StateCollection::new("c");
        let peer = PeerId::new();

        collection.attach_peer(peer).unwrap();
        assert!(matches!(
            collection.attach_peer(peer),
            Err(Error::AlreadyAttached { .. })
        ));
        collection.detach_peer(peer);
        collection.attach_peer(peer).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn prune_respects_boundary() {
        let collection = StateCollection::new("c");
        collection.add_value("old", json!(1));
        tokio::time::advance(Duration::from_secs(5)).await;
        collection.add_value("fresh", json!(2));

        let removed = collection.prune_older_than(Duration::from_secs(5));
        assert!(removed.is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        let removed = collection.prune_older_than(Duration::from_secs(5));
        assert_eq!(removed, vec![("old".to_string(), json!(1))]);
        assert!(collection.contains_key("fresh"));
    }
}
