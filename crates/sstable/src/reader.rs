use anyhow::{bail, ensure, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::{Memtable, ValueEntry};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::format::{read_footer, FOOTER_BYTES, SSTABLE_MAGIC};

/// A validated snapshot file.
///
/// [`open`](SSTableReader::open) reads the file once, checks the footer and
/// the data checksum, and decodes every record. Nothing is kept open
/// afterwards.
pub struct SSTableReader {
    path: PathBuf,
    records: Vec<(Vec<u8>, ValueEntry)>,
}

impl SSTableReader {
    /// Opens and fully validates a snapshot.
    ///
    /// # Errors
    ///
    /// Fails if the file is shorter than the footer, the magic is wrong, the
    /// checksum does not match, a record is malformed, or the record count
    /// disagrees with the footer.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let bytes = std::fs::read(&path_buf)
            .with_context(|| format!("reading snapshot {}", path_buf.display()))?;

        if (bytes.len() as u64) < FOOTER_BYTES {
            bail!("snapshot file too small: {} bytes", bytes.len());
        }
        let (data, mut footer_bytes) = bytes.split_at(bytes.len() - FOOTER_BYTES as usize);
        let footer = read_footer(&mut footer_bytes)?;
        if footer.magic != SSTABLE_MAGIC {
            bail!("invalid snapshot magic: {:x}", footer.magic);
        }

        let mut crc = Crc32::new();
        crc.update(data);
        if crc.finalize() != footer.data_crc {
            bail!("snapshot checksum mismatch");
        }

        let mut records = Vec::new();
        let mut rdr = data;
        while !rdr.is_empty() {
            records.push(read_record(&mut rdr).context("malformed snapshot record")?);
        }
        ensure!(
            records.len() as u64 == footer.record_count,
            "snapshot holds {} records, footer says {}",
            records.len(),
            footer.record_count
        );

        Ok(Self {
            path: path_buf,
            records,
        })
    }

    /// Replays every record into `mem`; sequence gating keeps newer entries.
    pub fn load_into(self, mem: &mut Memtable) {
        for (key, entry) in self.records {
            mem.apply(key, entry);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn read_record(rdr: &mut &[u8]) -> Result<(Vec<u8>, ValueEntry)> {
    let key_len = rdr.read_u32::<LittleEndian>()? as usize;
    ensure!(rdr.len() >= key_len, "key extends past data section");
    let mut key = vec![0u8; key_len];
    rdr.read_exact(&mut key)?;

    let seq = rdr.read_u64::<LittleEndian>()?;
    let value = match rdr.read_u8()? {
        1 => {
            let val_len = rdr.read_u32::<LittleEndian>()? as usize;
            ensure!(rdr.len() >= val_len, "value extends past data section");
            let mut val = vec![0u8; val_len];
            rdr.read_exact(&mut val)?;
            Some(val)
        }
        0 => None,
        other => bail!("invalid presence flag {}", other),
    };
    Ok((key, ValueEntry { seq, value }))
}
