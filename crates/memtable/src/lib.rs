//! # Memtable
//!
//! Ordered, byte-keyed buffer of versioned entries.
//!
//! The store uses two of these: one collects writes made since the last
//! commit (drained into a WAL batch on commit), the other holds the state
//! recovered from the snapshot file and the WAL until each map claims its
//! key range on open.
//!
//! ## Key properties
//! - **Sorted order**: entries iterate in ascending byte order, so every
//!   map's records are contiguous under its key prefix.
//! - **Sequence-number gated**: a write whose sequence number is not newer
//!   than the stored one is ignored, which makes WAL replay over a snapshot
//!   idempotent.
//! - **Tombstones**: deletes are kept as `ValueEntry { value: None }` until
//!   compaction purges them.
//!
//! ## Example
//! ```rust
//! use memtable::Memtable;
//!
//! let mut m = Memtable::new();
//! m.put(b"hello".to_vec(), b"world".to_vec(), 2);
//! m.put(b"hello".to_vec(), b"stale".to_vec(), 1);
//! m.delete(b"gone".to_vec(), 3);
//!
//! let entries = m.drain();
//! assert_eq!(entries[0].0, b"gone".to_vec());
//! assert!(entries[0].1.value.is_none());
//! assert_eq!(entries[1].1.value.as_deref(), Some(&b"world"[..]));
//! assert_eq!(m.max_seq(), 3);
//! ```

use std::collections::BTreeMap;

/// A sequence number paired with a live value or a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub seq: u64,
    /// `None` marks a delete.
    pub value: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct Memtable {
    map: BTreeMap<Vec<u8>, ValueEntry>,
    max_seq: u64,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            max_seq: 0,
        }
    }

    /// Stores `value` under `key` unless an entry with a newer or equal
    /// sequence number is already present.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>, seq: u64) {
        if self.admit(&key, seq) {
            self.map.insert(
                key,
                ValueEntry {
                    seq,
                    value: Some(value),
                },
            );
        }
    }

    /// Records a tombstone for `key`, with the same stale-write protection
    /// as [`Memtable::put`].
    pub fn delete(&mut self, key: Vec<u8>, seq: u64) {
        if self.admit(&key, seq) {
            self.map.insert(key, ValueEntry { seq, value: None });
        }
    }

    /// Applies an entry as either a put or a delete.
    pub fn apply(&mut self, key: Vec<u8>, entry: ValueEntry) {
        match entry.value {
            Some(value) => self.put(key, value, entry.seq),
            None => self.delete(key, entry.seq),
        }
    }

    fn admit(&mut self, key: &[u8], seq: u64) -> bool {
        if self.map.get(key).is_some_and(|old| old.seq >= seq) {
            return false;
        }
        self.max_seq = self.max_seq.max(seq);
        true
    }

    /// All entries in ascending key order, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &ValueEntry)> {
        self.map.iter()
    }

    /// Removes and returns every entry whose key starts with `prefix`, in
    /// ascending key order.
    pub fn take_prefix(&mut self, prefix: &[u8]) -> Vec<(Vec<u8>, ValueEntry)> {
        let mut tail = self.map.split_off(prefix);
        let rest = match tail.keys().find(|k| !k.starts_with(prefix)).cloned() {
            Some(first_outside) => tail.split_off(&first_outside),
            None => BTreeMap::new(),
        };
        self.map.extend(rest);
        tail.into_iter().collect()
    }

    /// Removes and returns all entries in key order, leaving the table empty.
    ///
    /// `max_seq` survives so the caller can keep numbering from it.
    pub fn drain(&mut self) -> Vec<(Vec<u8>, ValueEntry)> {
        std::mem::take(&mut self.map).into_iter().collect()
    }

    /// Drops every tombstone.
    pub fn purge_tombstones(&mut self) {
        self.map.retain(|_, e| e.value.is_some());
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Highest sequence number ever admitted.
    pub fn max_seq(&self) -> u64 {
        self.max_seq
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}
