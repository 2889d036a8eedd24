//! Footer constants and read/write helpers.
//!
//! ```text
//! [record_count: u64 LE][data_crc: u32 LE][magic: u32 LE = 0x5353_5432]
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Result as IoResult, Write};

/// Magic number identifying snapshot files (ASCII "SST2").
pub const SSTABLE_MAGIC: u32 = 0x5353_5432;

/// 8 (`record_count`) + 4 (`data_crc`) + 4 (`magic`).
pub const FOOTER_BYTES: u64 = 8 + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub record_count: u64,
    pub data_crc: u32,
    pub magic: u32,
}

pub fn write_footer<W: Write>(w: &mut W, record_count: u64, data_crc: u32) -> IoResult<()> {
    w.write_u64::<LittleEndian>(record_count)?;
    w.write_u32::<LittleEndian>(data_crc)?;
    w.write_u32::<LittleEndian>(SSTABLE_MAGIC)?;
    Ok(())
}

pub fn read_footer<R: Read>(r: &mut R) -> IoResult<Footer> {
    let record_count = r.read_u64::<LittleEndian>()?;
    let data_crc = r.read_u32::<LittleEndian>()?;
    let magic = r.read_u32::<LittleEndian>()?;
    Ok(Footer {
        record_count,
        data_crc,
        magic,
    })
}
