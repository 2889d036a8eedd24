//! # WAL
//!
//! Append-only journal of committed write batches.
//!
//! Each record is framed as `record_len(u32) | len_crc(u32) | crc32(u32) | body`
//! and a batch is terminated by a [`WalRecord::Commit`] marker. `len_crc`
//! covers the four length bytes, so a damaged length is reported as
//! corruption instead of being mistaken for the end of the log. Replay hands
//! out only records of terminated batches; a batch cut short by a crash is
//! discarded.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use thiserror::Error;

const OP_PUT: u8 = 0;
const OP_DEL: u8 = 1;
const OP_COMMIT: u8 = 2;

/// `record_len` + `len_crc`.
const HEADER_BYTES: u64 = 8;
/// crc + seq + op.
const MIN_RECORD_LEN: u32 = 4 + 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    Put {
        seq: u64,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Del {
        seq: u64,
        key: Vec<u8>,
    },
    Commit {
        seq: u64,
    },
}

impl WalRecord {
    pub fn seq(&self) -> u64 {
        match self {
            WalRecord::Put { seq, .. } | WalRecord::Del { seq, .. } | WalRecord::Commit { seq } => {
                *seq
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt record at offset {offset}")]
    Corrupt { offset: u64 },
}

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records handed to the apply callback.
    pub applied: usize,
    /// Committed batches seen.
    pub batches: usize,
    /// Records of a trailing batch that never reached its commit marker.
    pub discarded: usize,
    /// Byte length of the log up to and including the last commit marker.
    pub committed_len: u64,
}

/// Appends committed batches, optionally fsyncing each one.
pub struct WalWriter {
    file: File,
    sync: bool,
}

impl WalWriter {
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        Ok(Self { file, sync })
    }

    /// Writes `records` followed by a commit marker with `commit_seq`, as a
    /// single write, then syncs if configured.
    pub fn append_batch(&mut self, records: &[WalRecord], commit_seq: u64) -> Result<(), WalError> {
        let mut buf = Vec::new();
        for record in records {
            encode_frame(record, &mut buf)?;
        }
        encode_frame(&WalRecord::Commit { seq: commit_seq }, &mut buf)?;

        self.file.write_all(&buf)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Current size of the log in bytes.
    pub fn size(&self) -> Result<u64, WalError> {
        Ok(self.file.metadata()?.len())
    }

    /// Discards the whole log.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.truncate_to(0)
    }

    /// Cuts the log back to `len` bytes, e.g. to drop a torn tail.
    pub fn truncate_to(&mut self, len: u64) -> Result<(), WalError> {
        self.file.set_len(len)?;
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

fn encode_frame(record: &WalRecord, out: &mut Vec<u8>) -> io::Result<()> {
    // body: seq(u64), op(u8), [key_len(u32), key, [value_len(u32), value]]
    let mut body = Vec::new();
    match record {
        WalRecord::Put { seq, key, value } => {
            body.write_u64::<LittleEndian>(*seq)?;
            body.write_u8(OP_PUT)?;
            body.write_u32::<LittleEndian>(key.len() as u32)?;
            body.extend_from_slice(key);
            body.write_u32::<LittleEndian>(value.len() as u32)?;
            body.extend_from_slice(value);
        }
        WalRecord::Del { seq, key } => {
            body.write_u64::<LittleEndian>(*seq)?;
            body.write_u8(OP_DEL)?;
            body.write_u32::<LittleEndian>(key.len() as u32)?;
            body.extend_from_slice(key);
        }
        WalRecord::Commit { seq } => {
            body.write_u64::<LittleEndian>(*seq)?;
            body.write_u8(OP_COMMIT)?;
        }
    }

    let mut hasher = Crc32::new();
    hasher.update(&body);
    let crc = hasher.finalize();

    // record_len covers crc + body
    let record_len = (body.len() as u32 + 4).to_le_bytes();
    out.extend_from_slice(&record_len);
    out.write_u32::<LittleEndian>(crc32fast::hash(&record_len))?;
    out.write_u32::<LittleEndian>(crc)?;
    out.extend_from_slice(&body);
    Ok(())
}

/// Reads committed batches back in order.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
    offset: u64,
    /// Total input length when known; frames claiming more are a torn tail.
    end: Option<u64>,
}

impl WalReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        let end = f.metadata()?.len();
        let mut reader = WalReader::from_reader(f);
        reader.end = Some(end);
        Ok(reader)
    }
}

impl<R: Read> WalReader<R> {
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
            offset: 0,
            end: None,
        }
    }

    /// Applies every Put/Del record of every committed batch.
    ///
    /// A frame whose verified header runs past end-of-file is a torn tail and
    /// ends the replay. A header or body checksum mismatch, or a malformed
    /// body, anywhere in the log is [`WalError::Corrupt`].
    pub fn replay<F>(&mut self, mut apply: F) -> Result<ReplayStats, WalError>
    where
        F: FnMut(WalRecord),
    {
        let mut stats = ReplayStats::default();
        let mut batch: Vec<WalRecord> = Vec::new();

        while let Some(record) = self.next_frame()? {
            match record {
                WalRecord::Commit { .. } => {
                    stats.applied += batch.len();
                    stats.batches += 1;
                    stats.committed_len = self.offset;
                    batch.drain(..).for_each(&mut apply);
                }
                other => batch.push(other),
            }
        }

        stats.discarded = batch.len();
        Ok(stats)
    }

    fn next_frame(&mut self) -> Result<Option<WalRecord>, WalError> {
        let start = self.offset;
        let mut header = [0u8; HEADER_BYTES as usize];
        match self.rdr.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(WalError::Io(e)),
        }
        let mut fields = &header[..];
        let record_len = fields.read_u32::<LittleEndian>()?;
        let len_crc = fields.read_u32::<LittleEndian>()?;
        if crc32fast::hash(&header[..4]) != len_crc {
            return Err(WalError::Corrupt { offset: start });
        }
        if record_len < MIN_RECORD_LEN {
            return Err(WalError::Corrupt { offset: start });
        }

        // the header is intact, so a frame running past the end was cut by a crash
        let frame_end = start + HEADER_BYTES + u64::from(record_len);
        if self.end.is_some_and(|end| frame_end > end) {
            return Ok(None);
        }
        let mut frame = Vec::new();
        (&mut self.rdr)
            .take(u64::from(record_len))
            .read_to_end(&mut frame)?;
        if frame.len() < record_len as usize {
            return Ok(None);
        }
        self.offset = frame_end;

        let corrupt = |_| WalError::Corrupt { offset: start };
        let (mut crc_bytes, body) = frame.split_at(4);
        let crc = crc_bytes.read_u32::<LittleEndian>().map_err(corrupt)?;
        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != crc {
            return Err(WalError::Corrupt { offset: start });
        }

        let mut br = body;
        let seq = br.read_u64::<LittleEndian>().map_err(corrupt)?;
        let op = br.read_u8().map_err(corrupt)?;
        let record = match op {
            OP_PUT => {
                let key = read_chunk(&mut br).map_err(corrupt)?;
                let value = read_chunk(&mut br).map_err(corrupt)?;
                WalRecord::Put { seq, key, value }
            }
            OP_DEL => {
                let key = read_chunk(&mut br).map_err(corrupt)?;
                WalRecord::Del { seq, key }
            }
            OP_COMMIT => WalRecord::Commit { seq },
            _ => return Err(WalError::Corrupt { offset: start }),
        };
        Ok(Some(record))
    }
}

fn read_chunk(br: &mut &[u8]) -> io::Result<Vec<u8>> {
    let len = br.read_u32::<LittleEndian>()? as usize;
    if len > br.len() {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    let mut out = vec![0u8; len];
    br.read_exact(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn put(seq: u64, key: &[u8], value: &[u8]) -> WalRecord {
        WalRecord::Put {
            seq,
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    fn replay_all(path: &Path) -> Result<(Vec<WalRecord>, ReplayStats), WalError> {
        let mut reader = WalReader::open(path)?;
        let mut recs = Vec::new();
        let stats = reader.replay(|r| recs.push(r))?;
        Ok((recs, stats))
    }

    #[test]
    fn wal_write_and_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.wal");

        {
            let mut w = WalWriter::create(&path, true).unwrap();
            w.append_batch(&[put(1, b"k", b"v1"), put(2, b"k2", b"v2")], 2)
                .unwrap();
            w.append_batch(
                &[WalRecord::Del {
                    seq: 3,
                    key: b"k".to_vec(),
                }],
                3,
            )
            .unwrap();
        }

        let (recs, stats) = replay_all(&path).unwrap();
        assert_eq!(
            recs,
            vec![
                put(1, b"k", b"v1"),
                put(2, b"k2", b"v2"),
                WalRecord::Del {
                    seq: 3,
                    key: b"k".to_vec()
                }
            ]
        );
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.discarded, 0);

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn empty_batch_is_just_a_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.wal");
        let mut w = WalWriter::create(&path, false).unwrap();
        w.append_batch(&[], 7).unwrap();

        let (recs, stats) = replay_all(&path).unwrap();
        assert!(recs.is_empty());
        assert_eq!(stats.batches, 1);
    }

    // -------------------- Crash tails --------------------

    #[test]
    fn torn_tail_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.wal");
        {
            let mut w = WalWriter::create(&path, false).unwrap();
            w.append_batch(&[put(1, b"a", b"1")], 1).unwrap();
            w.append_batch(&[put(2, b"b", b"2")], 2).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(len - 3).unwrap();

        let (recs, stats) = replay_all(&path).unwrap();
        assert_eq!(recs, vec![put(1, b"a", b"1")]);
        assert_eq!(stats.discarded, 1);

        // cutting back to the committed length makes the log appendable again
        let mut w = WalWriter::create(&path, false).unwrap();
        w.truncate_to(stats.committed_len).unwrap();
        w.append_batch(&[put(3, b"c", b"3")], 3).unwrap();
        let (recs, stats) = replay_all(&path).unwrap();
        assert_eq!(recs, vec![put(1, b"a", b"1"), put(3, b"c", b"3")]);
        assert_eq!(stats.discarded, 0);
    }

    #[test]
    fn unterminated_batch_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.wal");
        {
            let mut w = WalWriter::create(&path, false).unwrap();
            w.append_batch(&[put(1, b"a", b"1")], 1).unwrap();
        }
        // a frame without its commit marker
        let mut raw = Vec::new();
        encode_frame(&put(2, b"b", b"2"), &mut raw).unwrap();
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&raw).unwrap();

        let (recs, stats) = replay_all(&path).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(stats.discarded, 1);
    }

    #[test]
    fn flipped_byte_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.wal");
        {
            let mut w = WalWriter::create(&path, false).unwrap();
            w.append_batch(&[put(1, b"key", b"value")], 1).unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        bytes[16] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            replay_all(&path),
            Err(WalError::Corrupt { offset: 0 })
        ));
    }

    #[test]
    fn damaged_length_is_corrupt_not_a_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.wal");
        {
            let mut w = WalWriter::create(&path, false).unwrap();
            w.append_batch(&[put(1, b"a", b"1")], 1).unwrap();
            w.append_batch(&[put(2, b"b", b"2")], 2).unwrap();
        }
        let pristine = fs::read(&path).unwrap();

        // a length pointing far past the end of the file
        let mut bytes = pristine.clone();
        bytes[2] = 0x10;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            replay_all(&path),
            Err(WalError::Corrupt { offset: 0 })
        ));

        // a damaged length in a later frame is reported at that frame
        let mut bytes = pristine.clone();
        let second = 8 + (&bytes[..4]).read_u32::<LittleEndian>().unwrap() as usize;
        bytes[second] ^= 0x01;
        fs::write(&path, &bytes).unwrap();
        match replay_all(&path) {
            Err(WalError::Corrupt { offset }) => assert_eq!(offset, second as u64),
            other => panic!("expected corruption, got {other:?}"),
        }

        // a damaged header checksum is corruption too
        let mut bytes = pristine;
        bytes[5] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            replay_all(&path),
            Err(WalError::Corrupt { offset: 0 })
        ));
    }

    #[test]
    fn torn_tail_through_plain_reader() {
        let mut raw = Vec::new();
        encode_frame(&put(1, b"a", b"1"), &mut raw).unwrap();
        encode_frame(&WalRecord::Commit { seq: 1 }, &mut raw).unwrap();
        let committed = raw.len() as u64;
        encode_frame(&put(2, b"b", b"2"), &mut raw).unwrap();
        raw.truncate(raw.len() - 2);

        let mut reader = WalReader::from_reader(&raw[..]);
        let mut recs = Vec::new();
        let stats = reader.replay(|r| recs.push(r)).unwrap();
        assert_eq!(recs, vec![put(1, b"a", b"1")]);
        assert_eq!(stats.committed_len, committed);
        assert_eq!(stats.discarded, 0);
    }

    #[test]
    fn truncate_empties_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.wal");
        let mut w = WalWriter::create(&path, false).unwrap();
        w.append_batch(&[put(1, b"a", b"1")], 1).unwrap();
        assert!(w.size().unwrap() > 0);
        w.truncate().unwrap();
        assert_eq!(w.size().unwrap(), 0);
        w.append_batch(&[put(2, b"b", b"2")], 2).unwrap();

        let (recs, _) = replay_all(&path).unwrap();
        assert_eq!(recs, vec![put(2, b"b", b"2")]);
    }
}
