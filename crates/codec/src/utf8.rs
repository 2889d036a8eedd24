use crate::varint::{read_varint, write_varint};
use crate::{Codec, CodecError};

/// Length-prefixed UTF-8 string codec: `varint(byte_len) ++ bytes`.
///
/// The length prefix means encoded bytes do not sort lexicographically; the
/// store orders string keys through [`Codec::compare`] on decoded values.
pub struct Utf8Codec;

impl Codec for Utf8Codec {
    type Item = String;

    fn descriptor() -> String {
        "utf8".to_string()
    }

    fn encode(item: &String, out: &mut Vec<u8>) {
        write_varint(item.len() as u32, out);
        out.extend_from_slice(item.as_bytes());
    }

    fn decode(input: &mut &[u8]) -> Result<String, CodecError> {
        let len = read_varint(input)? as usize;
        if input.len() < len {
            return Err(CodecError::Truncated { what: "utf8" });
        }
        let (bytes, rest) = input.split_at(len);
        let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        *input = rest;
        Ok(s.to_owned())
    }

    // Models decoded heap overhead, not wire size.
    fn memory(item: &String) -> usize {
        24 + 2 * item.len()
    }
}
