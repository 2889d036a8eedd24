//! String interning: stable `i32` ids keyed by a 128-bit content hash.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use codec::{Hash128, Hash128Codec, Utf8Codec, VarIntCodec};
use store::MVMap;
use xxhash_rust::xxh3::xxh3_128;

use crate::CacheError;

pub const HASH_TO_ID_MAP: &str = "enumerator.hash_to_id";
pub const ID_TO_STRING_MAP: &str = "enumerator.id_to_string";

pub trait StringEnumerator: Send + Sync {
    /// Id for `value`, allocating one on first sight.
    fn enumerate(&self, value: &str) -> Result<i32, CacheError>;

    /// String registered under `id`.
    fn value_of(&self, id: i32) -> Result<String, CacheError>;
}

pub fn content_hash(value: &str) -> Hash128 {
    Hash128::from(xxh3_128(value.as_bytes()))
}

/// Enumerator over two store maps, `hash -> id` and `id -> string`.
pub struct PersistentStringEnumerator {
    hash_to_id: MVMap<Hash128Codec, VarIntCodec>,
    id_to_string: MVMap<VarIntCodec, Utf8Codec>,
    next_id: AtomicI32,
    allocate: Mutex<()>,
}

impl PersistentStringEnumerator {
    pub fn new(
        hash_to_id: MVMap<Hash128Codec, VarIntCodec>,
        id_to_string: MVMap<VarIntCodec, Utf8Codec>,
    ) -> Self {
        let last = id_to_string.last_key().unwrap_or(0);
        tracing::debug!(
            target: "depcache.enumerator",
            strings = id_to_string.len(),
            last_id = last,
            "string enumerator opened"
        );
        Self {
            hash_to_id,
            id_to_string,
            next_id: AtomicI32::new(last + 1),
            allocate: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.id_to_string.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_string.is_empty()
    }
}

impl StringEnumerator for PersistentStringEnumerator {
    fn enumerate(&self, value: &str) -> Result<i32, CacheError> {
        let hash = content_hash(value);
        if let Some(id) = self.hash_to_id.get(&hash) {
            return Ok(id);
        }

        let _guard = self.allocate.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = self.hash_to_id.get(&hash) {
            return Ok(id);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if !self.id_to_string.put_if_absent(&id, value.to_string())? {
            tracing::error!(
                target: "depcache.enumerator",
                id,
                "id already has a string assigned"
            );
            return Err(CacheError::IdCollision { id });
        }
        self.hash_to_id.put(&hash, id)?;
        tracing::trace!(target: "depcache.enumerator", id, "interned string");
        Ok(id)
    }

    fn value_of(&self, id: i32) -> Result<String, CacheError> {
        self.id_to_string
            .get(&id)
            .ok_or(CacheError::NotFound { id })
    }
}

#[derive(Default)]
struct Cache {
    by_value: HashMap<String, i32>,
    by_id: HashMap<i32, String>,
}

/// Read-through cache in front of another enumerator.
///
/// Both directions are filled on a miss and kept for the life of the
/// instance. All lookups go through one lock.
pub struct CachingStringEnumerator<E> {
    inner: E,
    cache: Mutex<Cache>,
}

impl<E: StringEnumerator> CachingStringEnumerator<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            cache: Mutex::new(Cache::default()),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn cached(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .len()
    }
}

impl<E: StringEnumerator> StringEnumerator for CachingStringEnumerator<E> {
    fn enumerate(&self, value: &str) -> Result<i32, CacheError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&id) = cache.by_value.get(value) {
            return Ok(id);
        }
        let id = self.inner.enumerate(value)?;
        cache.by_value.insert(value.to_string(), id);
        cache.by_id.insert(id, value.to_string());
        Ok(id)
    }

    fn value_of(&self, id: i32) -> Result<String, CacheError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(value) = cache.by_id.get(&id) {
            return Ok(value.clone());
        }
        let value = self.inner.value_of(id)?;
        cache.by_value.insert(value.clone(), id);
        cache.by_id.insert(id, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::Arc;
    use std::thread;
    use store::{Store, StoreConfig};
    use tempfile::tempdir;

    fn open(store: &Store) -> Result<PersistentStringEnumerator> {
        Ok(PersistentStringEnumerator::new(
            store.open_map(HASH_TO_ID_MAP)?,
            store.open_map(ID_TO_STRING_MAP)?,
        ))
    }

    fn config() -> StoreConfig {
        StoreConfig::default().with_sync_on_commit(false)
    }

    // ---- Persistent enumerator ----

    #[test]
    fn ids_start_at_one_and_are_stable() -> Result<()> {
        let dir = tempdir()?;
        let store = Store::open(dir.path(), config())?;
        let e = open(&store)?;

        assert_eq!(e.enumerate("java/lang/Object")?, 1);
        assert_eq!(e.enumerate("java/lang/String")?, 2);
        assert_eq!(e.enumerate("java/lang/Object")?, 1);
        assert_eq!(e.value_of(2)?, "java/lang/String");
        assert_eq!(e.len(), 2);
        store.close()?;
        Ok(())
    }

    #[test]
    fn unknown_id_is_not_found() -> Result<()> {
        let dir = tempdir()?;
        let store = Store::open(dir.path(), config())?;
        let e = open(&store)?;
        assert!(matches!(e.value_of(99), Err(CacheError::NotFound { id: 99 })));
        store.close()?;
        Ok(())
    }

    #[test]
    fn next_id_resumes_after_reopen() -> Result<()> {
        let dir = tempdir()?;
        {
            let store = Store::open(dir.path(), config())?;
            let e = open(&store)?;
            e.enumerate("a")?;
            e.enumerate("b")?;
            store.close()?;
        }
        let store = Store::open(dir.path(), config())?;
        let e = open(&store)?;
        assert_eq!(e.enumerate("b")?, 2);
        assert_eq!(e.enumerate("c")?, 3);
        store.close()?;
        Ok(())
    }

    #[test]
    fn occupied_id_slot_is_a_collision() -> Result<()> {
        let dir = tempdir()?;
        let store = Store::open(dir.path(), config())?;
        let e = open(&store)?;
        // an id entry without a matching hash entry
        let ids = store.open_map::<VarIntCodec, Utf8Codec>(ID_TO_STRING_MAP)?;
        e.enumerate("first")?;
        ids.put(&2, "orphan".to_string())?;

        let err = e.enumerate("second").unwrap_err();
        assert!(matches!(err, CacheError::IdCollision { id: 2 }));
        assert!(err.is_rebuild_required());
        store.close()?;
        Ok(())
    }

    #[test]
    fn concurrent_enumerate_assigns_one_id_per_string() -> Result<()> {
        let dir = tempdir()?;
        let store = Store::open(dir.path(), config())?;
        let e = Arc::new(open(&store)?);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let e = Arc::clone(&e);
                thread::spawn(move || {
                    (0..50)
                        .map(|i| e.enumerate(&format!("s{i}")))
                        .collect::<Result<Vec<_>, _>>()
                })
            })
            .collect();
        let mut results = Vec::new();
        for h in handles {
            results.push(h.join().map_err(|_| anyhow::anyhow!("thread panicked"))??);
        }
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        let mut ids = results[0].clone();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids, (1..=50).collect::<Vec<_>>());
        store.close()?;
        Ok(())
    }

    // ---- Caching enumerator ----

    #[test]
    fn cache_fills_both_directions() -> Result<()> {
        let dir = tempdir()?;
        let store = Store::open(dir.path(), config())?;
        let e = CachingStringEnumerator::new(open(&store)?);

        let id = e.enumerate("Foo")?;
        assert_eq!(e.cached(), 1);
        assert_eq!(e.value_of(id)?, "Foo");
        assert_eq!(e.inner().value_of(id)?, "Foo");
        assert!(e.value_of(id + 1).is_err());
        assert_eq!(e.cached(), 1);
        store.close()?;
        Ok(())
    }

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }
}
