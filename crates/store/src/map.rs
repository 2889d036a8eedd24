use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use codec::{encode_to_vec, Codec};

use crate::engine::{internal_key, StoreInner};
use crate::StoreError;

/// Keys fetched per lock acquisition while iterating.
const KEYS_BATCH: usize = 64;

/// Outcome of a decide-and-update callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T> {
    /// Leave the entry as it is.
    Abort,
    /// Delete the entry.
    Remove,
    /// Store this value.
    Put(T),
}

struct Page<K: Codec, V: Codec> {
    keys: Vec<K::Item>,
    values: Vec<V::Item>,
}

impl<K: Codec, V: Codec> Page<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: K::create_storage(capacity),
            values: V::create_storage(capacity),
        }
    }
}

/// Sorted entries split into pages of at most `keys_per_page`.
///
/// Pages are non-empty and ordered; every key in page `i` sorts before every
/// key in page `i + 1`.
pub(crate) struct Pages<K: Codec, V: Codec> {
    pages: Vec<Page<K, V>>,
    len: usize,
    keys_per_page: usize,
}

impl<K: Codec, V: Codec> Pages<K, V> {
    /// `entries` must already be sorted by `K::compare` and free of duplicates.
    pub(crate) fn from_sorted(entries: Vec<(K::Item, V::Item)>, keys_per_page: usize) -> Self {
        let len = entries.len();
        let fill = (keys_per_page / 2).max(1);
        let mut pages = Vec::with_capacity(len / fill + 1);
        let mut page = Page::with_capacity(0);
        for (key, value) in entries {
            if page.keys.len() == fill {
                pages.push(std::mem::replace(&mut page, Page::with_capacity(fill)));
            }
            page.keys.push(key);
            page.values.push(value);
        }
        if !page.keys.is_empty() {
            pages.push(page);
        }
        Self {
            pages,
            len,
            keys_per_page,
        }
    }

    /// Page index and in-page search result for `key`.
    fn locate(&self, key: &K::Item, hint: usize) -> (usize, isize) {
        if self.pages.is_empty() {
            return (0, -1);
        }
        let pi = self
            .pages
            .partition_point(|p| {
                p.keys
                    .last()
                    .map_or(true, |last| K::compare(last, key) == Ordering::Less)
            })
            .min(self.pages.len() - 1);
        let page = &self.pages[pi];
        (pi, K::binary_search(key, &page.keys, page.keys.len(), hint))
    }

    fn value_at(&self, pi: usize, pos: isize) -> Option<&V::Item> {
        if pos < 0 {
            return None;
        }
        self.pages.get(pi).and_then(|p| p.values.get(pos as usize))
    }

    fn insert_at(&mut self, pi: usize, pos: usize, key: K::Item, value: V::Item) {
        if self.pages.is_empty() {
            self.pages.push(Page::with_capacity(1));
        }
        let page = &mut self.pages[pi];
        page.keys.insert(pos, key);
        page.values.insert(pos, value);
        self.len += 1;

        if page.keys.len() > self.keys_per_page {
            let at = page.keys.len() / 2;
            let keys = page.keys.split_off(at);
            let values = page.values.split_off(at);
            self.pages.insert(pi + 1, Page { keys, values });
        }
    }

    fn remove_at(&mut self, pi: usize, pos: usize) {
        let page = &mut self.pages[pi];
        page.keys.remove(pos);
        page.values.remove(pos);
        self.len -= 1;
        if page.keys.is_empty() {
            self.pages.remove(pi);
        }
    }

    /// Up to `limit` keys strictly after `last` (or from the start).
    fn keys_after(&self, last: Option<&K::Item>, limit: usize) -> Vec<K::Item> {
        let (mut pi, mut idx) = match last {
            None => (0, 0),
            Some(last) => match self.locate(last, 0) {
                (pi, pos) if pos >= 0 => (pi, pos as usize + 1),
                (pi, pos) => (pi, (-(pos + 1)) as usize),
            },
        };
        let mut out = Vec::with_capacity(limit.min(self.len));
        while out.len() < limit && pi < self.pages.len() {
            let page = &self.pages[pi];
            if idx >= page.keys.len() {
                pi += 1;
                idx = 0;
                continue;
            }
            let take = (limit - out.len()).min(page.keys.len() - idx);
            out.extend_from_slice(&page.keys[idx..idx + take]);
            idx += take;
        }
        out
    }

    fn iter(&self) -> impl Iterator<Item = (&K::Item, &V::Item)> {
        self.pages
            .iter()
            .flat_map(|p| p.keys.iter().zip(p.values.iter()))
    }
}

pub(crate) struct MapInner<K: Codec, V: Codec> {
    id: u32,
    name: String,
    store: Weak<StoreInner>,
    pages: RwLock<Pages<K, V>>,
    hint: AtomicUsize,
}

/// A named, typed, ordered map inside a [`crate::Store`].
///
/// Handles are cheap to clone and share one in-memory state. Reads never
/// fail; writes fail with [`StoreError::Closed`] once the store is closed.
pub struct MVMap<K: Codec, V: Codec> {
    inner: Arc<MapInner<K, V>>,
}

impl<K: Codec, V: Codec> Clone for MVMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Codec, V: Codec> fmt::Debug for MVMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MVMap")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("len", &self.len())
            .finish()
    }
}

impl<K: Codec, V: Codec> MVMap<K, V> {
    pub(crate) fn new(id: u32, name: String, store: Weak<StoreInner>, pages: Pages<K, V>) -> Self {
        Self {
            inner: Arc::new(MapInner {
                id,
                name,
                store,
                pages: RwLock::new(pages),
                hint: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<MapInner<K, V>>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<MapInner<K, V>> {
        &self.inner
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn read(&self) -> RwLockReadGuard<'_, Pages<K, V>> {
        self.inner.pages.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Pages<K, V>> {
        self.inner.pages.write().unwrap_or_else(|e| e.into_inner())
    }

    fn hint(&self) -> usize {
        self.inner.hint.load(AtomicOrdering::Relaxed)
    }

    fn remember(&self, pos: isize) {
        if pos >= 0 {
            self.inner.hint.store(pos as usize + 1, AtomicOrdering::Relaxed);
        }
    }

    fn store(&self) -> Result<Arc<StoreInner>, StoreError> {
        let store = self.inner.store.upgrade().ok_or(StoreError::Closed)?;
        store.ensure_open()?;
        Ok(store)
    }

    pub fn get(&self, key: &K::Item) -> Option<V::Item> {
        let pages = self.read();
        let (pi, pos) = pages.locate(key, self.hint());
        self.remember(pos);
        pages.value_at(pi, pos).cloned()
    }

    pub fn contains_key(&self, key: &K::Item) -> bool {
        let pages = self.read();
        let (_, pos) = pages.locate(key, self.hint());
        self.remember(pos);
        pos >= 0
    }

    /// Atomically decides what happens to `key`.
    ///
    /// `decide` runs under the map's write lock with the current value (or
    /// `None`); its verdict is applied before the lock is released, so two
    /// concurrent `operate` calls on the same key never interleave. Returns
    /// whether the map changed.
    pub fn operate<F>(&self, key: &K::Item, decide: F) -> Result<bool, StoreError>
    where
        F: FnOnce(Option<&V::Item>) -> Verdict<V::Item>,
    {
        let store = self.store()?;
        let mut pages = self.write();
        let (pi, pos) = pages.locate(key, self.hint());
        self.remember(pos);

        let verdict = decide(pages.value_at(pi, pos));
        match verdict {
            Verdict::Abort => Ok(false),
            Verdict::Remove => {
                if pos < 0 {
                    return Ok(false);
                }
                store.record(self.internal_key(key), None)?;
                pages.remove_at(pi, pos as usize);
                Ok(true)
            }
            Verdict::Put(value) => {
                store.record(self.internal_key(key), Some(encode_to_vec::<V>(&value)))?;
                if pos >= 0 {
                    pages.pages[pi].values[pos as usize] = value;
                } else {
                    pages.insert_at(pi, (-(pos + 1)) as usize, key.clone(), value);
                }
                Ok(true)
            }
        }
    }

    pub fn put(&self, key: &K::Item, value: V::Item) -> Result<(), StoreError> {
        self.operate(key, |_| Verdict::Put(value)).map(|_| ())
    }

    /// Stores `value` only if `key` is absent; returns whether it was stored.
    pub fn put_if_absent(&self, key: &K::Item, value: V::Item) -> Result<bool, StoreError> {
        self.operate(key, |existing| match existing {
            None => Verdict::Put(value),
            Some(_) => Verdict::Abort,
        })
    }

    /// Deletes `key`; returns whether it was present.
    pub fn remove(&self, key: &K::Item) -> Result<bool, StoreError> {
        self.operate(key, |_| Verdict::Remove)
    }

    pub fn len(&self) -> usize {
        self.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first_key(&self) -> Option<K::Item> {
        self.read()
            .pages
            .first()
            .and_then(|p| p.keys.first().cloned())
    }

    pub fn last_key(&self) -> Option<K::Item> {
        self.read().pages.last().and_then(|p| p.keys.last().cloned())
    }

    /// Lazily iterates keys in codec order.
    ///
    /// Each batch is read under a short read lock, so the iterator sees
    /// writes made while it is running. Call again to restart.
    pub fn keys(&self) -> Keys<K, V> {
        Keys {
            map: self.clone(),
            last: None,
            buffer: Vec::new().into_iter(),
            done: false,
        }
    }

    /// Sum of the codecs' memory hints over every entry.
    pub fn memory_estimate(&self) -> usize {
        self.read()
            .iter()
            .map(|(k, v)| K::memory(k) + V::memory(v))
            .sum()
    }

    fn internal_key(&self, key: &K::Item) -> Vec<u8> {
        internal_key(self.inner.id, &encode_to_vec::<K>(key))
    }
}

pub struct Keys<K: Codec, V: Codec> {
    map: MVMap<K, V>,
    last: Option<K::Item>,
    buffer: std::vec::IntoIter<K::Item>,
    done: bool,
}

impl<K: Codec, V: Codec> Iterator for Keys<K, V> {
    type Item = K::Item;

    fn next(&mut self) -> Option<K::Item> {
        loop {
            if let Some(key) = self.buffer.next() {
                self.last = Some(key.clone());
                return Some(key);
            }
            if self.done {
                return None;
            }
            let batch = self.map.read().keys_after(self.last.as_ref(), KEYS_BATCH);
            if batch.len() < KEYS_BATCH {
                self.done = true;
            }
            self.buffer = batch.into_iter();
        }
    }
}
