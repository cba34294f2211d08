//! In-memory key directory.
//!
//! The keydir maps every live key to the location of its latest value. It is
//! rebuilt by replay on every open and never persisted.

use crate::types::SegmentId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Location of a key's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeydirEntry {
    /// Segment holding the value.
    pub segment_id: SegmentId,
    /// Value size in bytes.
    pub value_size: u32,
    /// Offset of the value within the segment.
    pub value_offset: u64,
    /// Timestamp of the write that produced the value.
    pub timestamp: i64,
}

/// Concurrent key to location index.
///
/// All methods take the internal lock for the duration of the call only.
/// Readers share the lock; `add` and `remove` take it exclusively.
#[derive(Debug, Default)]
pub struct Keydir {
    entries: Arc<RwLock<HashMap<Vec<u8>, KeydirEntry>>>,
}

impl Keydir {
    /// Creates an empty keydir.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `key`, returning the replaced one.
    pub fn add(&self, key: &[u8], entry: KeydirEntry) -> Option<KeydirEntry> {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(slot) => Some(std::mem::replace(slot, entry)),
            None => {
                entries.insert(key.to_vec(), entry);
                None
            }
        }
    }

    /// Removes the entry for `key`, returning it.
    pub fn remove(&self, key: &[u8]) -> Option<KeydirEntry> {
        self.entries.write().remove(key)
    }

    /// Returns the entry for `key`.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<KeydirEntry> {
        self.entries.read().get(key).copied()
    }

    /// Returns true if `key` is live.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if there are no live keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of entries pointing into `segment_id`.
    #[must_use]
    pub fn references_segment(&self, segment_id: SegmentId) -> usize {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.segment_id == segment_id)
            .count()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        entries.shrink_to_fit();
    }

    /// Copies the whole index, for comparisons in tests and tooling.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<Vec<u8>, KeydirEntry> {
        self.entries.read().clone()
    }

    /// Returns a lazy iterator over live keys.
    ///
    /// The key set is captured when this is called; each key is checked again
    /// as it is yielded, so keys deleted in the meantime are skipped. Keys
    /// added afterwards are not visited. Call `keys` again to restart.
    #[must_use]
    pub fn keys(&self) -> Keys {
        let pending: Vec<Vec<u8>> = self.entries.read().keys().cloned().collect();
        Keys {
            entries: Arc::clone(&self.entries),
            pending: pending.into_iter(),
        }
    }
}

/// Iterator returned by [`Keydir::keys`].
pub struct Keys {
    entries: Arc<RwLock<HashMap<Vec<u8>, KeydirEntry>>>,
    pending: std::vec::IntoIter<Vec<u8>>,
}

impl Iterator for Keys {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.pending.next()?;
            if self.entries.read().contains_key(&key) {
                return Some(key);
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.pending.len()))
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("remaining", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    fn entry(segment: u64, offset: u64, timestamp: i64) -> KeydirEntry {
        KeydirEntry {
            segment_id: SegmentId::new(segment),
            value_size: 4,
            value_offset: offset,
            timestamp,
        }
    }

    #[test]
    fn add_replaces_and_returns_previous() {
        let keydir = Keydir::new();
        assert_eq!(keydir.add(b"k", entry(0, 24, 1)), None);
        assert_eq!(keydir.add(b"k", entry(1, 48, 2)), Some(entry(0, 24, 1)));

        assert_eq!(keydir.get(b"k"), Some(entry(1, 48, 2)));
        assert_eq!(keydir.len(), 1);
    }

    #[test]
    fn remove_and_contains() {
        let keydir = Keydir::new();
        keydir.add(b"k", entry(0, 24, 1));

        assert!(keydir.contains(b"k"));
        assert_eq!(keydir.remove(b"k"), Some(entry(0, 24, 1)));
        assert!(!keydir.contains(b"k"));
        assert_eq!(keydir.remove(b"k"), None);
        assert!(keydir.is_empty());
    }

    #[test]
    fn references_segment_counts_entries() {
        let keydir = Keydir::new();
        keydir.add(b"a", entry(0, 24, 1));
        keydir.add(b"b", entry(0, 50, 2));
        keydir.add(b"c", entry(1, 24, 3));

        assert_eq!(keydir.references_segment(SegmentId::new(0)), 2);
        assert_eq!(keydir.references_segment(SegmentId::new(1)), 1);
        assert_eq!(keydir.references_segment(SegmentId::new(2)), 0);
    }

    #[test]
    fn keys_skips_removed_and_is_restartable() {
        let keydir = Keydir::new();
        for key in [b"a", b"b", b"c"] {
            keydir.add(key, entry(0, 0, 0));
        }

        let mut keys = keydir.keys();
        keydir.remove(b"b");
        keydir.add(b"d", entry(0, 0, 0));
        let mut seen: Vec<_> = keys.by_ref().collect();
        seen.sort();
        assert_eq!(seen, vec![b"a".to_vec(), b"c".to_vec()]);
        assert_eq!(keys.next(), None);

        let again: HashSet<_> = keydir.keys().collect();
        assert_eq!(again.len(), 3);
        assert!(again.contains(&b"d".to_vec()));
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let keydir = Arc::new(Keydir::new());

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let keydir = Arc::clone(&keydir);
                thread::spawn(move || {
                    for i in 0..500u64 {
                        let key = format!("{t}-{i}");
                        keydir.add(key.as_bytes(), entry(t, i, i as i64));
                        assert_eq!(keydir.get(key.as_bytes()).unwrap().value_offset, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(keydir.len(), 2000);
    }
}
