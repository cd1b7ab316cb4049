//! Browser-side state map.
//!
//! [`StateMap`] is the client counterpart of
//! [`StateCollection`](crate::state::StateCollection): the same keyed JSON
//! signals, validators, origins and change hook, built on the
//! single-threaded engine. Local value changes reach the hook on the next
//! microtask drain. Additions, removals and writes tagged `Remote` or
//! `Rollback` reach it immediately, so a sync channel sees the peer's value
//! before any local write that follows it in the same task.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::microtask::MicrotaskBatcher;
use super::runtime::Subscription;
use super::signal::Signal;
use crate::batch::Batcher;
use crate::error::{Error, Result};
use crate::state::{Change, Diff, ModifiedIndex, Origin, PeerId, Snapshot, Validator};
use crate::subscriber::{SourceId, SubscriberId, SubscriberSet};
use crate::sync::{ChangeObserver, SyncTarget};

type ChangeHook = Rc<dyn Fn(&Change)>;

#[derive(Clone)]
pub struct StateMap {
    inner: Rc<MapInner>,
}

struct MapInner {
    component_id: String,
    entries: RefCell<IndexMap<String, MapEntry>>,
    hooks: Rc<RefCell<SubscriberSet<ChangeHook>>>,
    validators: RefCell<Vec<(Option<String>, Validator)>>,
    modified: RefCell<ModifiedIndex>,
    /// Values already handed to the hook ahead of the drain.
    delivered: RefCell<HashMap<String, Value>>,
    peers: RefCell<HashSet<PeerId>>,
}

struct MapEntry {
    signal: Signal<Value>,
    _tap: Subscription,
}

impl StateMap {
    pub fn new(component_id: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(MapInner {
                component_id: component_id.into(),
                entries: RefCell::new(IndexMap::new()),
                hooks: Rc::new(RefCell::new(SubscriberSet::new())),
                validators: RefCell::new(Vec::new()),
                modified: RefCell::new(ModifiedIndex::new()),
                delivered: RefCell::new(HashMap::new()),
                peers: RefCell::new(HashSet::new()),
            }),
        }
    }

    pub fn component_id(&self) -> &str {
        &self.inner.component_id
    }

    pub fn add(&self, key: impl Into<String>, signal: Signal<Value>) {
        self.inner.insert(key.into(), signal, Origin::Local);
    }

    pub fn add_value(&self, key: impl Into<String>, value: Value) -> Signal<Value> {
        let signal = Signal::new(value);
        self.add(key, signal.clone());
        signal
    }

    pub fn get(&self, key: &str) -> Option<Signal<Value>> {
        self.inner.entries.borrow().get(key).map(|entry| entry.signal.clone())
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.get(key).map(|signal| signal.get_untracked())
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.value(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::from)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.entries.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.borrow().is_empty()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.apply_changes(vec![(key.into(), Some(value))], Origin::Local)
    }

    pub fn set_serialized<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.remove(key, Origin::Local)
    }

    /// Validate every write, then apply them all. `None` removes the key.
    pub fn apply_changes(&self, changes: Vec<(String, Option<Value>)>, origin: Origin) -> Result<()> {
        if !origin.skips_validation() {
            for (key, value) in &changes {
                if let Some(value) = value {
                    self.inner.validate(key, value)?;
                }
            }
        }

        MicrotaskBatcher.batch(|| {
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

    pub fn apply_diff(&self, diff: &Diff) -> Result<()> {
        self.apply_changes(diff.clone().into_changes(), Origin::Local)
    }

    pub fn to_snapshot(&self) -> Snapshot {
        self.inner
            .entries
            .borrow()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.signal.get_untracked()))
            .collect()
    }

    pub fn diff(&self, other: &StateMap) -> Diff {
        Diff::between(&self.to_snapshot(), &other.to_snapshot())
    }

    pub fn on_change(&self, hook: impl Fn(&Change) + 'static) -> Subscription {
        let id = SubscriberId::new();
        self.inner.hooks.borrow_mut().insert(id, Rc::new(hook));
        let hooks = Rc::downgrade(&self.inner.hooks);
        Subscription::new(move || {
            if let Some(hooks) = hooks.upgrade() {
                hooks.borrow_mut().remove(id);
            }
        })
    }

    pub fn add_validator<F>(&self, key: Option<&str>, validator: F)
    where
        F: Fn(&str, &Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.inner
            .validators
            .borrow_mut()
            .push((key.map(str::to_string), Arc::new(validator)));
    }

    pub fn last_modified(&self, key: &str) -> Option<Instant> {
        self.inner.modified.borrow().get(key)
    }

    /// Remove every key not modified within `max_age`. The client has no
    /// background pruner; the host calls this when it sees fit.
    pub fn prune_older_than(&self, max_age: Duration) -> Vec<(String, Value)> {
        let stale = self.inner.modified.borrow().stale(Instant::now(), max_age);
        let removed: Vec<_> = stale
            .into_iter()
            .filter_map(|key| {
                let value = self.inner.remove(&key, Origin::Local)?;
                Some((key, value))
            })
            .collect();
        if !removed.is_empty() {
            debug!(component_id = %self.inner.component_id, count = removed.len(), "pruned stale keys");
        }
        removed
    }
}

impl MapInner {
    fn validate(&self, key: &str, value: &Value) -> Result<()> {
        let validators: Vec<Validator> = self
            .validators
            .borrow()
            .iter()
            .filter(|(scope, _)| scope.as_deref().map_or(true, |scope| scope == key))
            .map(|(_, validator)| Arc::clone(validator))
            .collect();
        for validator in validators {
            validator(key, value).map_err(|reason| Error::validation(key, reason))?;
        }
        Ok(())
    }

    fn write(self: &Rc<Self>, key: String, value: Value, origin: Origin) {
        let existing = self.entries.borrow().get(&key).map(|entry| entry.signal.clone());
        let Some(signal) = existing else {
            self.insert(key, Signal::new(value), origin);
            return;
        };
        if !signal.set(value.clone()) || origin.is_local() {
            return;
        }
        self.modified.borrow_mut().touch(&key, Instant::now());
        self.delivered.borrow_mut().insert(key.clone(), value.clone());
        self.emit(&Change {
            key,
            value: Some(value),
            origin,
        });
    }

    fn insert(self: &Rc<Self>, key: String, signal: Signal<Value>, origin: Origin) {
        let tap = {
            let inner: Weak<MapInner> = Rc::downgrade(self);
            let (key, source) = (key.clone(), signal.id());
            signal.subscribe(move |value| {
                if let Some(inner) = inner.upgrade() {
                    inner.on_signal_changed(&key, source, value);
                }
            })
        };
        let value = signal.get_untracked();
        let previous = self
            .entries
            .borrow_mut()
            .insert(key.clone(), MapEntry { signal, _tap: tap });
        drop(previous);

        self.delivered.borrow_mut().remove(&key);
        self.modified.borrow_mut().touch(&key, Instant::now());
        self.emit(&Change {
            key,
            value: Some(value),
            origin,
        });
    }

    fn remove(&self, key: &str, origin: Origin) -> Option<Value> {
        let entry = self.entries.borrow_mut().shift_remove(key)?;
        let value = entry.signal.get_untracked();
        drop(entry);

        self.delivered.borrow_mut().remove(key);
        self.modified.borrow_mut().forget(key);
        self.emit(&Change {
            key: key.to_string(),
            value: None,
            origin,
        });
        Some(value)
    }

    fn on_signal_changed(&self, key: &str, source: SourceId, value: &Value) {
        let current = self
            .entries
            .borrow()
            .get(key)
            .is_some_and(|entry| entry.signal.id() == source);
        if !current {
            return;
        }
        if self.delivered.borrow_mut().remove(key).as_ref() == Some(value) {
            return;
        }
        self.modified.borrow_mut().touch(key, Instant::now());
        self.emit(&Change {
            key: key.to_string(),
            value: Some(value.clone()),
            origin: Origin::Local,
        });
    }

    fn emit(&self, change: &Change) {
        let hooks = self.hooks.borrow().snapshot();
        for (_, hook) in hooks {
            hook(change);
        }
    }
}

impl SyncTarget for StateMap {
    type Observer = Subscription;

    fn component_id(&self) -> String {
        self.inner.component_id.clone()
    }

    fn snapshot(&self) -> Snapshot {
        self.to_snapshot()
    }

    fn apply_changes(&self, changes: Vec<(String, Option<Value>)>, origin: Origin) -> Result<()> {
        StateMap::apply_changes(self, changes, origin)
    }

    fn observe(&self, observer: ChangeObserver) -> Subscription {
        self.on_change(move |change| observer(change))
    }

    fn attach_peer(&self, peer: PeerId) -> Result<()> {
        if self.inner.peers.borrow_mut().insert(peer) {
            Ok(())
        } else {
            Err(Error::AlreadyAttached {
                component_id: self.inner.component_id.clone(),
                peer: peer.to_string(),
            })
        }
    }

    fn detach_peer(&self, peer: PeerId) {
        self.inner.peers.borrow_mut().remove(&peer);
    }
}

impl std::fmt::Debug for StateMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMap")
            .field("component_id", &self.inner.component_id)
            .field("len", &self.len())
            .finish()
    }
}
