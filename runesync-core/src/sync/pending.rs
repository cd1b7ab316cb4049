//! Ledger of optimistic writes awaiting acknowledgement.
//!
//! A replica applies its own writes immediately and records, per write, the
//! value each key had before. When the authority rejects a write (or the
//! connection drops) the ledger says what to restore:
//!
//! - on rejection, a key goes back to its recorded previous value unless a
//!   later pending write touched the same key; that later write inherits the
//!   restore target instead,
//! - on disconnect, every key goes back to the previous value recorded by
//!   its earliest pending write,
//! - acknowledged writes leave the ledger and are never reverted.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Monotonic id of one outbound write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteId(u64);

impl WriteId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for WriteId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for WriteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// One key touched by a pending write. `None` means "absent".
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub key: String,
    pub previous: Option<Value>,
    pub attempted: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub write_id: WriteId,
    pub entries: Vec<PendingEntry>,
}

/// Writes to restore, in the order they should be applied.
pub type Restore = Vec<(String, Option<Value>)>;

#[derive(Debug, Default)]
pub struct PendingWrites {
    next: u64,
    writes: BTreeMap<WriteId, PendingWrite>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write and return its id.
    pub fn record(&mut self, entries: Vec<PendingEntry>) -> WriteId {
        self.next += 1;
        let write_id = WriteId(self.next);
        self.writes.insert(write_id, PendingWrite { write_id, entries });
        write_id
    }

    pub fn acknowledge(&mut self, write_id: WriteId) -> Option<PendingWrite> {
        self.writes.remove(&write_id)
    }

    /// Drop a rejected write and return what must be restored.
    ///
    /// Unknown ids restore nothing.
    pub fn reject(&mut self, write_id: WriteId) -> Restore {
        let Some(rejected) = self.writes.remove(&write_id) else {
            return Vec::new();
        };

        let mut restore = Vec::new();
        for entry in rejected.entries {
            let later = self
                .writes
                .range_mut(write_id..)
                .flat_map(|(_, write)| write.entries.iter_mut())
                .find(|pending| pending.key == entry.key);

            match later {
                Some(later) => later.previous = entry.previous,
                None => restore.push((entry.key, entry.previous)),
            }
        }
        restore
    }

    /// A remote value landed on `key`; pending writes on it now restore to
    /// that value.
    pub fn rebase(&mut self, key: &str, value: Option<&Value>) {
        for entry in self
            .writes
            .values_mut()
            .flat_map(|write| write.entries.iter_mut())
            .filter(|entry| entry.key == key)
        {
            entry.previous = value.cloned();
        }
    }

    /// Clear the ledger and return, per key, the previous value recorded by
    /// its earliest pending write.
    pub fn drain(&mut self) -> Restore {
        let mut seen = HashSet::new();
        let mut restore = Vec::new();
        for (_, write) in std::mem::take(&mut self.writes) {
            for entry in write.entries {
                if seen.insert(entry.key.clone()) {
                    restore.push((entry.key, entry.previous));
                }
            }
        }
        restore
    }

    pub fn contains(&self, write_id: WriteId) -> bool {
        self.writes.contains_key(&write_id)
    }

    /// Whether any pending write touches `key`.
    pub fn is_pending(&self, key: &str) -> bool {
        self.writes
            .values()
            .any(|write| write.entries.iter().any(|entry| entry.key == key))
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str, previous: Value, attempted: Value) -> Vec<PendingEntry> {
        vec![PendingEntry {
            key: key.to_string(),
            previous: Some(previous),
            attempted: Some(attempted),
        }]
    }

    #[test]
    fn ids_increase() {
        let mut ledger = PendingWrites::new();
        let a = ledger.record(Vec::new());
        let b = ledger.record(Vec::new());
        assert!(b > a);
    }

    #[test]
    fn reject_restores_previous() {
        let mut ledger = PendingWrites::new();
        let id = ledger.record(entry("k", json!(1), json!(2)));

        assert_eq!(ledger.reject(id), vec![("k".to_string(), Some(json!(1)))]);
        assert!(ledger.is_empty());
    }

    #[test]
    fn reject_hands_restore_target_to_later_write() {
        let mut ledger = PendingWrites::new();
        let first = ledger.record(entry("k", json!(0), json!(1)));
        let second = ledger.record(entry("k", json!(1), json!(2)));

        assert!(ledger.reject(first).is_empty());
        assert_eq!(ledger.reject(second), vec![("k".to_string(), Some(json!(0)))]);
    }

    #[test]
    fn acknowledged_value_survives_later_rejection() {
        let mut ledger = PendingWrites::new();
        let first = ledger.record(entry("k", json!(0), json!(1)));
        let second = ledger.record(entry("k", json!(1), json!(2)));

        assert!(ledger.acknowledge(first).is_some());
        assert_eq!(ledger.reject(second), vec![("k".to_string(), Some(json!(1)))]);
    }

    #[test]
    fn drain_restores_earliest_previous_per_key() {
        let mut ledger = PendingWrites::new();
        ledger.record(entry("a", json!("a0"), json!("a1")));
        ledger.record(entry("a", json!("a1"), json!("a2")));
        ledger.record(vec![PendingEntry {
            key: "b".into(),
            previous: None,
            attempted: Some(json!("b1")),
        }]);

        assert_eq!(
            ledger.drain(),
            vec![("a".to_string(), Some(json!("a0"))), ("b".to_string(), None)]
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn rebase_moves_restore_target() {
        let mut ledger = PendingWrites::new();
        let id = ledger.record(entry("k", json!(0), json!(1)));
        ledger.rebase("k", Some(&json!(5)));

        assert!(ledger.is_pending("k"));
        assert_eq!(ledger.reject(id), vec![("k".to_string(), Some(json!(5)))]);
    }

    #[test]
    fn unknown_id_restores_nothing() {
        let mut ledger = PendingWrites::new();
        assert!(ledger.reject(WriteId::from(42)).is_empty());
    }
}
