use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{Codec, CodecError};

/// A 128-bit content hash split into two unsigned halves.
///
/// Field order matters: the derived `Ord` compares `high` first, then `low`,
/// which matches the big-endian byte layout written by [`Hash128Codec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash128 {
    pub high: u64,
    pub low: u64,
}

impl Hash128 {
    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }
}

impl From<u128> for Hash128 {
    fn from(value: u128) -> Self {
        Self {
            high: (value >> 64) as u64,
            low: value as u64,
        }
    }
}

impl From<Hash128> for u128 {
    fn from(value: Hash128) -> Self {
        ((value.high as u128) << 64) | value.low as u128
    }
}

/// Fixed-width codec: 16 bytes, high half first, both big-endian.
pub struct Hash128Codec;

impl Codec for Hash128Codec {
    type Item = Hash128;

    fn descriptor() -> String {
        "hash128".to_string()
    }

    fn encode(item: &Hash128, out: &mut Vec<u8>) {
        // writes into a Vec cannot fail
        let _ = out.write_u64::<BigEndian>(item.high);
        let _ = out.write_u64::<BigEndian>(item.low);
    }

    fn decode(input: &mut &[u8]) -> Result<Hash128, CodecError> {
        let truncated = |_| CodecError::Truncated { what: "hash128" };
        let high = input.read_u64::<BigEndian>().map_err(truncated)?;
        let low = input.read_u64::<BigEndian>().map_err(truncated)?;
        Ok(Hash128 { high, low })
    }

    fn memory(_item: &Hash128) -> usize {
        16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode_exact, encode_to_vec};
    use proptest::prelude::*;
    use std::cmp::Ordering;

    #[test]
    fn encodes_high_half_first() {
        let bytes = encode_to_vec::<Hash128Codec>(&Hash128::new(1, 2));
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&bytes[8..], &[0, 0, 0, 0, 0, 0, 0, 2]);
    }

    #[test]
    fn compares_halves_as_unsigned() {
        let small = Hash128::new(1, u64::MAX);
        let big = Hash128::new(u64::MAX, 0);
        assert_eq!(Hash128Codec::compare(&small, &big), Ordering::Less);
        assert_eq!(
            Hash128Codec::compare(&Hash128::new(7, 1), &Hash128::new(7, u64::MAX)),
            Ordering::Less
        );
    }

    #[test]
    fn short_input_is_truncated_error() {
        let mut input: &[u8] = &[0u8; 10];
        assert_eq!(
            Hash128Codec::decode(&mut input),
            Err(CodecError::Truncated { what: "hash128" })
        );
    }

    #[test]
    fn u128_conversion_keeps_halves() {
        let h = Hash128::from(0x0102_0304_0506_0708_1112_1314_1516_1718u128);
        assert_eq!(h.high, 0x0102_0304_0506_0708);
        assert_eq!(h.low, 0x1112_1314_1516_1718);
        assert_eq!(u128::from(h), 0x0102_0304_0506_0708_1112_1314_1516_1718u128);
    }

    proptest! {
        #[test]
        fn roundtrip(high in any::<u64>(), low in any::<u64>()) {
            let h = Hash128::new(high, low);
            let bytes = encode_to_vec::<Hash128Codec>(&h);
            prop_assert_eq!(decode_exact::<Hash128Codec>(&bytes).unwrap(), h);
        }

        #[test]
        fn byte_order_matches_compare(a in any::<u128>(), b in any::<u128>()) {
            let (a, b) = (Hash128::from(a), Hash128::from(b));
            let ea = encode_to_vec::<Hash128Codec>(&a);
            let eb = encode_to_vec::<Hash128Codec>(&b);
            prop_assert_eq!(ea.cmp(&eb), Hash128Codec::compare(&a, &b));
            prop_assert_eq!(Hash128Codec::compare(&a, &b) == Ordering::Equal, a == b);
        }

        #[test]
        fn search_agrees_with_std(mut keys in proptest::collection::vec(any::<u128>(), 0..64), probe in any::<u128>(), hint in 0usize..80) {
            keys.sort();
            keys.dedup();
            let items: Vec<Hash128> = keys.iter().copied().map(Hash128::from).collect();
            let probe = Hash128::from(probe);
            let expected = match items.binary_search(&probe) {
                Ok(i) => i as isize,
                Err(i) => -(i as isize + 1),
            };
            prop_assert_eq!(Hash128Codec::binary_search(&probe, &items, items.len(), hint), expected);
        }
    }
}
