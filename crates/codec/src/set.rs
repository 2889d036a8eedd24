use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;

use im::OrdSet;

use crate::varint::{read_varint, write_varint};
use crate::{Codec, CodecError};

/// An immutable, cheaply clonable set.
///
/// Backed by a persistent B-tree: clones share structure, and every
/// modifying method returns a new set in O(log n) while leaving `self`
/// untouched, so a reader holding a `ValueSet` never observes a concurrent
/// mutation.
pub struct ValueSet<T: Ord>(OrdSet<T>);

impl<T: Ord + Clone> ValueSet<T> {
    pub fn new() -> Self {
        Self(OrdSet::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, value: &T) -> bool {
        self.0.contains(value)
    }

    pub fn iter(&self) -> im::ordset::Iter<'_, T> {
        self.0.iter()
    }

    /// Returns a set that additionally contains `value`.
    pub fn with(&self, value: T) -> Self {
        Self(self.0.update(value))
    }

    /// Returns a set that additionally contains every element of `values`.
    pub fn with_all<I: IntoIterator<Item = T>>(&self, values: I) -> Self {
        let mut next = self.0.clone();
        for value in values {
            next.insert(value);
        }
        Self(next)
    }

    /// Returns a set without `value`.
    pub fn without(&self, value: &T) -> Self {
        Self(self.0.without(value))
    }

    /// Returns a set without any member of `targets`.
    pub fn without_all(&self, targets: &BTreeSet<T>) -> Self {
        let mut next = self.0.clone();
        for target in targets {
            next.remove(target);
        }
        Self(next)
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.0.iter().cloned().collect()
    }
}

impl<T: Ord + Clone> Clone for ValueSet<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Ord> PartialEq for ValueSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().eq(other.0.iter())
    }
}

impl<T: Ord> Eq for ValueSet<T> {}

impl<T: Ord> PartialOrd for ValueSet<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for ValueSet<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.iter().cmp(other.0.iter())
    }
}

impl<T: Ord + Clone> Default for ValueSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord + fmt::Debug> fmt::Debug for ValueSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

impl<T: Ord + Clone> FromIterator<T> for ValueSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new().with_all(iter)
    }
}

impl<T: Ord + Clone> From<BTreeSet<T>> for ValueSet<T> {
    fn from(set: BTreeSet<T>) -> Self {
        set.into_iter().collect()
    }
}

impl<'a, T: Ord> IntoIterator for &'a ValueSet<T> {
    type Item = &'a T;
    type IntoIter = im::ordset::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Codec for a [`ValueSet`] of `C` items: `varint(count) ++ element*`.
pub struct SetCodec<C>(PhantomData<C>);

impl<C: Codec> Codec for SetCodec<C> {
    type Item = ValueSet<C::Item>;

    fn descriptor() -> String {
        format!("set<{}>", C::descriptor())
    }

    fn encode(item: &Self::Item, out: &mut Vec<u8>) {
        write_varint(item.len() as u32, out);
        for value in item {
            C::encode(value, out);
        }
    }

    fn decode(input: &mut &[u8]) -> Result<Self::Item, CodecError> {
        let count = read_varint(input)? as usize;
        let mut set = OrdSet::new();
        for _ in 0..count {
            set.insert(C::decode(input)?);
        }
        Ok(ValueSet(set))
    }

    fn memory(item: &Self::Item) -> usize {
        16 + item.iter().map(C::memory).sum::<usize>()
    }
}
