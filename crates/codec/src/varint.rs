use crate::{Codec, CodecError};

/// Appends `value` as an unsigned LEB128 varint (1..=5 bytes).
pub fn write_varint(mut value: u32, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Reads an unsigned LEB128 varint from the front of `input`.
pub fn read_varint(input: &mut &[u8]) -> Result<u32, CodecError> {
    let mut result: u32 = 0;
    let mut shift = 0u32;
    loop {
        let (&byte, rest) = input
            .split_first()
            .ok_or(CodecError::Truncated { what: "varint" })?;
        *input = rest;
        if shift == 28 && byte > 0x0f {
            return Err(CodecError::VarIntOverflow);
        }
        result |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Number of bytes [`write_varint`] emits for `value`.
pub fn varint_len(value: u32) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0x0fff_ffff => 4,
        _ => 5,
    }
}

/// Variable-length codec for non-negative `i32` ids.
///
/// Small ids (the common case for interned strings) take a single byte.
/// Negative values still round-trip but always cost five bytes.
pub struct VarIntCodec;

impl Codec for VarIntCodec {
    type Item = i32;

    fn descriptor() -> String {
        "varint".to_string()
    }

    fn encode(item: &i32, out: &mut Vec<u8>) {
        write_varint(*item as u32, out);
    }

    fn decode(input: &mut &[u8]) -> Result<i32, CodecError> {
        read_varint(input).map(|v| v as i32)
    }

    fn memory(_item: &i32) -> usize {
        4
    }
}
