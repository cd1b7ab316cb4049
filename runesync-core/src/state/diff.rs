//! Snapshots and diffs.
//!
//! A [`Snapshot`] is the plain `{key: value}` view of a collection in
//! insertion order. A [`Diff`] between two snapshots lists what was added,
//! removed and changed; applying it to the first snapshot yields the second.
//!
//! Values are compared structurally (`serde_json::Value` equality), so two
//! composite values with the same content are never reported as changed.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered `{key: value}` view of a collection.
pub type Snapshot = IndexMap<String, Value>;

/// Differences between two snapshots.
///
/// Equality ignores key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    /// Keys present only in the newer snapshot.
    pub added: IndexMap<String, Value>,
    /// Keys present only in the older snapshot.
    pub removed: IndexSet<String>,
    /// Keys present in both whose value differs, with the newer value.
    pub changed: IndexMap<String, Value>,
}

impl Diff {
    /// Compute the diff that turns `from` into `to`.
    ///
    /// Two linear passes: one over `from` for removed and changed keys, one
    /// over `to` for added keys.
    pub fn between(from: &Snapshot, to: &Snapshot) -> Self {
        let mut diff = Diff::default();

        for (key, old) in from {
            match to.get(key) {
                None => {
                    diff.removed.insert(key.clone());
                }
                Some(new) if new != old => {
                    diff.changed.insert(key.clone(), new.clone());
                }
                Some(_) => {}
            }
        }

        for (key, new) in to {
            if !from.contains_key(key) {
                diff.added.insert(key.clone(), new.clone());
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Total number of affected keys.
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }

    /// Apply this diff to `snapshot` in place.
    pub fn apply_to(&self, snapshot: &mut Snapshot) {
        for key in &self.removed {
            snapshot.shift_remove(key);
        }
        for (key, value) in self.changed.iter().chain(&self.added) {
            snapshot.insert(key.clone(), value.clone());
        }
    }

    /// Flatten into per-key writes; `None` removes the key.
    pub fn into_changes(self) -> Vec<(String, Option<Value>)> {
        let mut changes = Vec::with_capacity(self.len());
        changes.extend(self.removed.into_iter().map(|key| (key, None)));
        changes.extend(self.changed.into_iter().map(|(key, value)| (key, Some(value))));
        changes.extend(self.added.into_iter().map(|(key, value)| (key, Some(value))));
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> Snapshot {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn reports_added_and_changed_keys() {
        let from = snapshot(json!({"a": 1, "b": 2}));
        let to = snapshot(json!({"a": 1, "b": 3, "c": 4}));

        let diff = Diff::between(&from, &to);

        assert_eq!(diff.added, snapshot(json!({"c": 4})));
        assert!(diff.removed.is_empty());
        assert_eq!(diff.changed, snapshot(json!({"b": 3})));
    }

    #[test]
    fn reports_removed_keys() {
        let from = snapshot(json!({"a": 1, "b": 2}));
        let to = snapshot(json!({"b": 2}));

        let diff = Diff::between(&from, &to);
        assert_eq!(diff.removed.iter().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(diff.len(), 1);
    }

    #[test]
    fn composite_values_compare_by_content() {
        let from = snapshot(json!({"user": {"name": "ada", "tags": [1, 2]}}));
        let to = snapshot(json!({"user": {"tags": [1, 2], "name": "ada"}}));

        assert!(Diff::between(&from, &to).is_empty());
    }

    #[test]
    fn key_order_does_not_matter() {
        let from = snapshot(json!({"a": 1, "b": 2, "c": 3}));
        let reordered = snapshot(json!({"c": 3, "a": 1, "b": 2}));
        let to = snapshot(json!({"b": 20, "d": 4}));

        assert_eq!(Diff::between(&from, &to), Diff::between(&reordered, &to));
    }

    #[test]
    fn partitions_keys_without_overlap() {
        let from = snapshot(json!({"keep": 0, "gone": 1, "edit": 2}));
        let to = snapshot(json!({"keep": 0, "edit": 3, "new": 4}));
        let diff = Diff::between(&from, &to);

        let mut keys: Vec<&String> = diff
            .added
            .keys()
            .chain(diff.removed.iter())
            .chain(diff.changed.keys())
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["edit", "gone", "new"]);
    }

    #[test]
    fn applying_diff_reproduces_target() {
        let from = snapshot(json!({"a": 1, "b": [1, 2], "c": {"x": true}}));
        let to = snapshot(json!({"b": [2], "c": {"x": true}, "d": null}));

        let mut patched = from.clone();
        Diff::between(&from, &to).apply_to(&mut patched);
        assert_eq!(patched, to);
    }

    #[test]
    fn into_changes_lists_every_key() {
        let from = snapshot(json!({"a": 1, "b": 2}));
        let to = snapshot(json!({"b": 5, "c": 6}));

        let changes = Diff::between(&from, &to).into_changes();
        assert_eq!(
            changes,
            vec![
                ("a".to_string(), None),
                ("b".to_string(), Some(json!(5))),
                ("c".to_string(), Some(json!(6))),
            ]
        );
    }
}
