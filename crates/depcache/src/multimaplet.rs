use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::RwLock;

use codec::{Codec, SetCodec, ValueSet};
use store::{MVMap, Verdict};

use crate::decision::SetMutation;
use crate::CacheError;

/// A map from key to a set of values.
///
/// Absent keys read as the empty set, and an empty set is never stored.
pub trait Multimaplet<K, V: Ord>: Send + Sync {
    fn contains_key(&self, key: &K) -> Result<bool, CacheError>;

    fn get(&self, key: &K) -> Result<ValueSet<V>, CacheError>;

    /// Replaces the whole set; an empty `values` removes the key.
    fn put(&self, key: &K, values: ValueSet<V>) -> Result<(), CacheError>;

    fn remove(&self, key: &K) -> Result<(), CacheError>;

    fn append_value(&self, key: &K, value: V) -> Result<(), CacheError>;

    fn append_values(&self, key: &K, values: Vec<V>) -> Result<(), CacheError>;

    fn remove_value(&self, key: &K, value: V) -> Result<(), CacheError>;

    fn remove_values(&self, key: &K, values: BTreeSet<V>) -> Result<(), CacheError>;

    /// Keys present at the time each element is produced; no snapshot.
    fn keys(&self) -> Result<Box<dyn Iterator<Item = K> + '_>, CacheError>;

    fn flush(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Multimaplet stored in one named map of the backing store.
pub struct PersistentMultimaplet<KC: Codec, VC: Codec> {
    map: MVMap<KC, SetCodec<VC>>,
}

impl<KC: Codec, VC: Codec> PersistentMultimaplet<KC, VC> {
    pub fn new(map: MVMap<KC, SetCodec<VC>>) -> Self {
        Self { map }
    }

    pub fn name(&self) -> &str {
        self.map.name()
    }

    fn mutate(&self, key: &KC::Item, mutation: SetMutation<VC::Item>) -> Result<(), CacheError> {
        self.map
            .operate(key, |existing| mutation.into_verdict(existing))?;
        Ok(())
    }
}

impl<KC: Codec, VC: Codec> Multimaplet<KC::Item, VC::Item> for PersistentMultimaplet<KC, VC> {
    fn contains_key(&self, key: &KC::Item) -> Result<bool, CacheError> {
        Ok(self.map.contains_key(key))
    }

    fn get(&self, key: &KC::Item) -> Result<ValueSet<VC::Item>, CacheError> {
        Ok(self.map.get(key).unwrap_or_default())
    }

    fn put(&self, key: &KC::Item, values: ValueSet<VC::Item>) -> Result<(), CacheError> {
        self.mutate(key, SetMutation::ReplaceAll(values))
    }

    fn remove(&self, key: &KC::Item) -> Result<(), CacheError> {
        self.map.operate(key, |_| Verdict::Remove)?;
        Ok(())
    }

    fn append_value(&self, key: &KC::Item, value: VC::Item) -> Result<(), CacheError> {
        self.mutate(key, SetMutation::AddOne(value))
    }

    fn append_values(&self, key: &KC::Item, values: Vec<VC::Item>) -> Result<(), CacheError> {
        self.mutate(key, SetMutation::AddMany(values))
    }

    fn remove_value(&self, key: &KC::Item, value: VC::Item) -> Result<(), CacheError> {
        self.mutate(key, SetMutation::RemoveOne(value))
    }

    fn remove_values(&self, key: &KC::Item, values: BTreeSet<VC::Item>) -> Result<(), CacheError> {
        self.mutate(key, SetMutation::RemoveMany(values))
    }

    fn keys(&self) -> Result<Box<dyn Iterator<Item = KC::Item> + '_>, CacheError> {
        Ok(Box::new(self.map.keys()))
    }
}

/// Same contract as [`PersistentMultimaplet`], kept only in process memory.
pub struct InMemoryMultimaplet<K, V: Ord> {
    map: RwLock<HashMap<K, ValueSet<V>>>,
}

impl<K, V: Ord> Default for InMemoryMultimaplet<K, V> {
    fn default() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> InMemoryMultimaplet<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Ord + Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate(&self, key: &K, mutation: SetMutation<V>) {
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        let verdict = mutation.into_verdict(map.get(key));
        match verdict {
            Verdict::Abort => {}
            Verdict::Remove => {
                map.remove(key);
            }
            Verdict::Put(values) => {
                map.insert(key.clone(), values);
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<K, ValueSet<V>>> {
        self.map.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K, V> Multimaplet<K, V> for InMemoryMultimaplet<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Ord + Clone + Send + Sync,
{
    fn contains_key(&self, key: &K) -> Result<bool, CacheError> {
        Ok(self.read().contains_key(key))
    }

    fn get(&self, key: &K) -> Result<ValueSet<V>, CacheError> {
        Ok(self.read().get(key).cloned().unwrap_or_default())
    }

    fn put(&self, key: &K, values: ValueSet<V>) -> Result<(), CacheError> {
        self.mutate(key, SetMutation::ReplaceAll(values));
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<(), CacheError> {
        self.map
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }

    fn append_value(&self, key: &K, value: V) -> Result<(), CacheError> {
        self.mutate(key, SetMutation::AddOne(value));
        Ok(())
    }

    fn append_values(&self, key: &K, values: Vec<V>) -> Result<(), CacheError> {
        self.mutate(key, SetMutation::AddMany(values));
        Ok(())
    }

    fn remove_value(&self, key: &K, value: V) -> Result<(), CacheError> {
        self.mutate(key, SetMutation::RemoveOne(value));
        Ok(())
    }

    fn remove_values(&self, key: &K, values: BTreeSet<V>) -> Result<(), CacheError> {
        self.mutate(key, SetMutation::RemoveMany(values));
        Ok(())
    }

    fn keys(&self) -> Result<Box<dyn Iterator<Item = K> + '_>, CacheError> {
        let keys: Vec<K> = self.read().keys().cloned().collect();
        Ok(Box::new(keys.into_iter()))
    }
}
