//! # Codec
//!
//! Per-type conversion between in-memory values and the bytes the store
//! persists, plus the ordering and page-local binary search the store uses
//! over decoded arrays of those values.
//!
//! ## Provided codecs
//! - [`Hash128Codec`]: fixed 16-byte content hash, high half first.
//! - [`VarIntCodec`]: non-negative `i32` ids as LEB128.
//! - [`Utf8Codec`]: `varint(byte_len) ++ utf8_bytes`.
//! - [`SetCodec`]: `varint(count) ++ element*` for a persistent [`ValueSet`].
//!
//! ## Binary search contract
//! [`Codec::binary_search`] returns the index of `key` when present, or
//! `-(insertion_point + 1)` when absent. The `initial_guess` is a "last known
//! position" hint; out-of-range hints fall back to the midpoint.

use std::cmp::Ordering;
use std::fmt::Debug;

use thiserror::Error;

mod hash128;
mod set;
mod utf8;
mod varint;

pub use hash128::{Hash128, Hash128Codec};
pub use set::{SetCodec, ValueSet};
pub use utf8::Utf8Codec;
pub use varint::{read_varint, varint_len, write_varint, VarIntCodec};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input while decoding {what}")]
    Truncated { what: &'static str },
    #[error("varint exceeds 32 bits")]
    VarIntOverflow,
    #[error("invalid utf-8 in string value")]
    InvalidUtf8,
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

/// Stateless (de)serializer and ordering for one item type.
pub trait Codec: Send + Sync + 'static {
    type Item: Clone + Ord + Debug + Send + Sync + 'static;

    /// Stable identifier recorded with a map's registration so a map cannot
    /// be reopened with an incompatible codec.
    fn descriptor() -> String;

    /// Appends the encoded form of `item` to `out`.
    fn encode(item: &Self::Item, out: &mut Vec<u8>);

    /// Decodes one item from the front of `input`, advancing it past the
    /// consumed bytes.
    fn decode(input: &mut &[u8]) -> Result<Self::Item, CodecError>;

    /// Approximate in-memory footprint of a decoded item, for cache sizing.
    fn memory(item: &Self::Item) -> usize;

    fn compare(a: &Self::Item, b: &Self::Item) -> Ordering {
        a.cmp(b)
    }

    /// Searches `items[..size]` (sorted by [`Codec::compare`]) for `key`.
    fn binary_search(
        key: &Self::Item,
        items: &[Self::Item],
        size: usize,
        initial_guess: usize,
    ) -> isize {
        let size = size.min(items.len()) as isize;
        let mut low: isize = 0;
        let mut high: isize = size - 1;
        let mut x = initial_guess as isize - 1;
        if x < 0 || x > high {
            x = high >> 1;
        }
        while low <= high {
            match Self::compare(key, &items[x as usize]) {
                Ordering::Greater => low = x + 1,
                Ordering::Less => high = x - 1,
                Ordering::Equal => return x,
            }
            x = (low + high) >> 1;
        }
        -(low + 1)
    }

    /// Backing array for a page of `capacity` items. Zero capacity never
    /// allocates.
    fn create_storage(capacity: usize) -> Vec<Self::Item> {
        if capacity == 0 {
            Vec::new()
        } else {
            Vec::with_capacity(capacity)
        }
    }
}

/// Encodes a single item into a fresh buffer.
pub fn encode_to_vec<C: Codec>(item: &C::Item) -> Vec<u8> {
    let mut out = Vec::new();
    C::encode(item, &mut out);
    out
}

/// Decodes exactly one item; leftover bytes are an error.
pub fn decode_exact<C: Codec>(bytes: &[u8]) -> Result<C::Item, CodecError> {
    let mut input = bytes;
    let item = C::decode(&mut input)?;
    if !input.is_empty() {
        return Err(CodecError::TrailingBytes(input.len()));
    }
    Ok(item)
}
