//! Last-modified bookkeeping for pruning.
//!
//! Entries are indexed both by key and by modification time, so finding the
//! stale ones walks only the stale prefix of the time index.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

/// Modification time plus a sequence number to keep stamps unique.
type Stamp = (Instant, u64);

#[derive(Debug, Default)]
pub(crate) struct ModifiedIndex {
    by_key: HashMap<String, Stamp>,
    by_time: BTreeMap<Stamp, String>,
    seq: u64,
}

impl ModifiedIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn touch(&mut self, key: &str, now: Instant) {
        self.seq += 1;
        let stamp = (now, self.seq);
        if let Some(previous) = self.by_key.insert(key.to_string(), stamp) {
            self.by_time.remove(&previous);
        }
        self.by_time.insert(stamp, key.to_string());
    }

    pub(crate) fn forget(&mut self, key: &str) {
        if let Some(stamp) = self.by_key.remove(key) {
            self.by_time.remove(&stamp);
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<Instant> {
        self.by_key.get(key).map(|(at, _)| *at)
    }

    /// Keys whose age at `now` exceeds `max_age`, oldest first.
    ///
    /// A key exactly `max_age` old is not stale.
    pub(crate) fn stale(&self, now: Instant, max_age: Duration) -> Vec<String> {
        let Some(cutoff) = now.checked_sub(max_age) else {
            return Vec::new();
        };
        // Sequence numbers start at 1, so `(cutoff, 0)` sorts before every
        // stamp taken exactly at the cutoff.
        self.by_time
            .range(..(cutoff, 0))
            .map(|(_, key)| key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_exclusive() {
        let start = Instant::now();
        let max_age = Duration::from_secs(10);
        let mut index = ModifiedIndex::new();
        index.touch("a", start);

        assert!(index.stale(start + max_age, max_age).is_empty());
        assert_eq!(
            index.stale(start + max_age + Duration::from_millis(1), max_age),
            vec!["a".to_string()]
        );
    }

    #[test]
    fn touching_again_refreshes_age() {
        let start = Instant::now();
        let max_age = Duration::from_secs(1);
        let mut index = ModifiedIndex::new();
        index.touch("a", start);
        index.touch("b", start);
        index.touch("a", start + Duration::from_secs(5));

        let stale = index.stale(start + Duration::from_secs(3), max_age);
        assert_eq!(stale, vec!["b".to_string()]);
        assert_eq!(index.get("a"), Some(start + Duration::from_secs(5)));
    }

    #[test]
    fn forget_removes_both_indexes() {
        let start = Instant::now();
        let mut index = ModifiedIndex::new();
        index.touch("a", start);
        index.forget("a");

        assert!(index.get("a").is_none());
        assert!(index
            .stale(start + Duration::from_secs(100), Duration::ZERO)
            .is_empty());
    }
}
