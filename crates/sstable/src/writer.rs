use anyhow::Result;
use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::Memtable;
use std::fs::{rename, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::format::write_footer;

/// Writes a [`Memtable`] to disk as a snapshot file.
///
/// The write goes to `<path>.tmp`, is fsynced, and is then renamed over
/// `path`, so a crash leaves either the old snapshot or the new one.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Writes every entry of `mem` (tombstones included) and returns the
    /// number of records written. An empty memtable produces a valid file
    /// holding only the footer.
    pub fn write_from_memtable(path: &Path, mem: &Memtable) -> Result<u64> {
        let tmp_path = path.with_extension("tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut out = BufWriter::new(file);

        let mut crc = Crc32::new();
        let mut count = 0u64;
        let mut record = Vec::new();

        for (key, entry) in mem.iter() {
            record.clear();
            record.write_u32::<LittleEndian>(key.len() as u32)?;
            record.extend_from_slice(key);
            record.write_u64::<LittleEndian>(entry.seq)?;
            match &entry.value {
                Some(v) => {
                    record.write_u8(1)?;
                    record.write_u32::<LittleEndian>(v.len() as u32)?;
                    record.extend_from_slice(v);
                }
                None => record.write_u8(0)?,
            }
            crc.update(&record);
            out.write_all(&record)?;
            count += 1;
        }

        write_footer(&mut out, count, crc.finalize())?;

        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        rename(&tmp_path, path)?;
        Ok(count)
    }
}
