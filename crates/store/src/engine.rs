/// Store handle tying together the pending-write memtable, the WAL, the
/// snapshot file, and the registry of named maps.
use std::any::Any;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use codec::{decode_exact, encode_to_vec, read_varint, write_varint, Codec, Utf8Codec};
use fs4::FileExt;
use memtable::{Memtable, ValueEntry};
use sstable::{SSTableReader, SSTableWriter};
use wal::{ReplayStats, WalReader, WalRecord, WalWriter};

use crate::map::{MVMap, MapInner, Pages};
use crate::{StoreConfig, StoreError};

pub const SNAPSHOT_FILE: &str = "store.db";
pub const WAL_FILE: &str = "store.wal";
pub const LOCK_FILE: &str = "store.lock";

/// Map id 0 holds `name -> registration` for every other map.
const META_MAP_ID: u32 = 0;
const META_MAP_NAME: &str = "<meta>";

/// Prefixes an encoded key with its map id so each map owns a contiguous
/// byte range of the snapshot and WAL.
pub(crate) fn internal_key(map_id: u32, encoded: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + encoded.len());
    key.extend_from_slice(&map_id.to_be_bytes());
    key.extend_from_slice(encoded);
    key
}

/// Replays committed WAL batches into `mem`.
///
/// A missing WAL is a fresh start and yields empty stats.
pub fn replay_wal_into(path: &Path, mem: &mut Memtable) -> Result<ReplayStats, StoreError> {
    if !path.exists() {
        return Ok(ReplayStats::default());
    }
    let mut reader = WalReader::open(path)?;
    let stats = reader.replay(|r| match r {
        WalRecord::Put { seq, key, value } => mem.put(key, value, seq),
        WalRecord::Del { seq, key } => mem.delete(key, seq),
        WalRecord::Commit { .. } => {}
    })?;
    Ok(stats)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MapMeta {
    id: u32,
    key_type: String,
    value_type: String,
}

impl MapMeta {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(self.id, &mut out);
        Utf8Codec::encode(&self.key_type, &mut out);
        Utf8Codec::encode(&self.value_type, &mut out);
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, codec::CodecError> {
        let mut input = bytes;
        let id = read_varint(&mut input)?;
        let key_type = Utf8Codec::decode(&mut input)?;
        let value_type = Utf8Codec::decode(&mut input)?;
        Ok(Self {
            id,
            key_type,
            value_type,
        })
    }

    fn describe(&self) -> String {
        format!("{} -> {}", self.key_type, self.value_type)
    }
}

struct EngineState {
    wal: WalWriter,
    /// Writes since the last commit.
    pending: Memtable,
    /// Snapshot + WAL contents not yet claimed by an opened map.
    recovered: Memtable,
    seq: u64,
    registry: HashMap<String, MapMeta>,
    open_maps: HashMap<String, Arc<dyn Any + Send + Sync>>,
    next_map_id: u32,
    commits: u64,
    compactions: u64,
}

impl EngineState {
    fn record(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) {
        self.seq = self.seq.saturating_add(1);
        match value {
            Some(value) => self.pending.put(key, value, self.seq),
            None => self.pending.delete(key, self.seq),
        }
    }
}

pub(crate) struct StoreInner {
    dir: PathBuf,
    config: StoreConfig,
    state: Mutex<EngineState>,
    closed: AtomicBool,
    lock_file: Mutex<Option<File>>,
}

impl StoreInner {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Queues one mutation for the next commit.
    pub(crate) fn record(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.lock_state().record(key, value);
        Ok(())
    }

    fn commit_locked(&self, state: &mut EngineState) -> Result<bool, StoreError> {
        if state.pending.is_empty() {
            return Ok(false);
        }
        let records: Vec<WalRecord> = state
            .pending
            .drain()
            .into_iter()
            .map(|(key, entry)| match entry.value {
                Some(value) => WalRecord::Put {
                    seq: entry.seq,
                    key,
                    value,
                },
                None => WalRecord::Del { seq: entry.seq, key },
            })
            .collect();

        if let Err(e) = state.wal.append_batch(&records, state.seq) {
            // put the batch back so a later commit can retry it
            for record in records {
                let seq = record.seq();
                match record {
                    WalRecord::Put { key, value, .. } => state.pending.put(key, value, seq),
                    WalRecord::Del { key, .. } => state.pending.delete(key, seq),
                    WalRecord::Commit { .. } => {}
                }
            }
            return Err(e.into());
        }

        state.commits += 1;
        tracing::trace!(
            target: "depcache.store",
            records = records.len(),
            seq = state.seq,
            "committed batch"
        );
        Ok(true)
    }

    /// Folds snapshot + WAL into a fresh snapshot and empties the WAL.
    fn compact_locked(&self, state: &mut EngineState) -> Result<(), StoreError> {
        let snapshot_path = self.dir.join(SNAPSHOT_FILE);
        let mut merged = Memtable::new();
        if snapshot_path.exists() {
            SSTableReader::open(&snapshot_path)
                .map_err(StoreError::Snapshot)?
                .load_into(&mut merged);
        }
        replay_wal_into(&self.dir.join(WAL_FILE), &mut merged)?;
        merged.purge_tombstones();

        let written =
            SSTableWriter::write_from_memtable(&snapshot_path, &merged).map_err(StoreError::Snapshot)?;
        state.wal.truncate()?;
        state.compactions += 1;

        tracing::debug!(
            target: "depcache.store",
            records = written,
            path = %snapshot_path.display(),
            "compacted wal into snapshot"
        );
        Ok(())
    }

    fn release_lock(&self) {
        let mut guard = self.lock_file.lock().unwrap_or_else(|e| e.into_inner());
        // closing the descriptor drops the advisory lock
        guard.take();
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if !*self.closed.get_mut() {
            tracing::warn!(
                target: "depcache.store",
                dir = %self.dir.display(),
                "store dropped without close; uncommitted writes discarded"
            );
        }
    }
}

/// Counters for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub commits: u64,
    pub compactions: u64,
    pub pending_writes: usize,
    pub wal_bytes: u64,
    pub open_maps: usize,
    pub last_seq: u64,
}

/// An open store directory, held exclusively by this process.
///
/// # Write path
///
/// 1. [`MVMap::operate`] applies a verdict in memory and queues the encoded
///    record under a fresh sequence number.
/// 2. [`Store::commit`] appends all queued records to the WAL as one batch.
/// 3. When the WAL outgrows `compaction_threshold`, the commit also folds it
///    into the snapshot file.
///
/// # Recovery
///
/// [`Store::open`] loads the snapshot, replays committed WAL batches over it
/// (sequence gating makes this idempotent), cuts off any torn tail, and
/// rebuilds the map registry.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.inner.dir)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Opens (or creates) the store in `dir`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Locked`] if another handle holds the directory,
    /// [`StoreError::Snapshot`] / [`StoreError::Wal`] on unreadable files,
    /// [`StoreError::Corrupt`] if the map registry cannot be decoded.
    pub fn open<P: AsRef<Path>>(dir: P, config: StoreConfig) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let lock_file = acquire_lock(&dir)?;

        let mut recovered = Memtable::new();
        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let mut snapshot_records = 0;
        if snapshot_path.exists() {
            let reader = SSTableReader::open(&snapshot_path).map_err(StoreError::Snapshot)?;
            snapshot_records = reader.len();
            reader.load_into(&mut recovered);
        }

        let wal_path = dir.join(WAL_FILE);
        let replay = replay_wal_into(&wal_path, &mut recovered)?;
        let mut wal = WalWriter::create(&wal_path, config.sync_on_commit)?;
        if wal.size()? > replay.committed_len {
            tracing::warn!(
                target: "depcache.store",
                discarded = replay.discarded,
                committed_len = replay.committed_len,
                "dropping torn wal tail"
            );
            wal.truncate_to(replay.committed_len)?;
        }

        let registry = load_registry(&mut recovered)?;
        let next_map_id = registry
            .values()
            .map(|m| m.id)
            .max()
            .unwrap_or(META_MAP_ID)
            + 1;
        let seq = recovered.max_seq();

        tracing::info!(
            target: "depcache.store",
            dir = %dir.display(),
            snapshot_records,
            wal_batches = replay.batches,
            maps = registry.len(),
            seq,
            "store opened"
        );

        let state = EngineState {
            wal,
            pending: Memtable::new(),
            recovered,
            seq,
            registry,
            open_maps: HashMap::new(),
            next_map_id,
            commits: 0,
            compactions: 0,
        };

        Ok(Self {
            inner: Arc::new(StoreInner {
                dir,
                config,
                state: Mutex::new(state),
                closed: AtomicBool::new(false),
                lock_file: Mutex::new(Some(lock_file)),
            }),
        })
    }

    /// Opens the map `name`, creating it on first use.
    ///
    /// The map's key/value codec descriptors are recorded at creation; a
    /// later open with different codecs fails with
    /// [`StoreError::SchemaMismatch`]. Opening an already open map returns a
    /// handle to the same instance.
    pub fn open_map<K: Codec, V: Codec>(&self, name: &str) -> Result<MVMap<K, V>, StoreError> {
        self.inner.ensure_open()?;
        let requested = MapMeta {
            id: 0,
            key_type: K::descriptor(),
            value_type: V::descriptor(),
        };
        let mismatch = |stored: &MapMeta| StoreError::SchemaMismatch {
            name: name.to_string(),
            stored: stored.describe(),
            requested: requested.describe(),
        };

        let mut state = self.inner.lock_state();
        let id = match state.registry.get(name) {
            Some(meta)
                if meta.key_type != requested.key_type
                    || meta.value_type != requested.value_type =>
            {
                return Err(mismatch(meta));
            }
            Some(meta) => meta.id,
            None => {
                let meta = MapMeta {
                    id: state.next_map_id,
                    ..requested.clone()
                };
                state.next_map_id += 1;
                let key = internal_key(META_MAP_ID, &encode_to_vec::<Utf8Codec>(&name.to_string()));
                state.record(key, Some(meta.encode()));
                state.registry.insert(name.to_string(), meta.clone());
                tracing::debug!(
                    target: "depcache.store",
                    map = name,
                    id = meta.id,
                    schema = %meta.describe(),
                    "registered map"
                );
                meta.id
            }
        };

        if let Some(existing) = state.open_maps.get(name) {
            return Arc::clone(existing)
                .downcast::<MapInner<K, V>>()
                .map(MVMap::from_inner)
                .map_err(|_| StoreError::SchemaMismatch {
                    name: name.to_string(),
                    stored: "a different codec pair".to_string(),
                    requested: requested.describe(),
                });
        }

        let claimed = state.recovered.take_prefix(&id.to_be_bytes());
        let entries = decode_entries::<K, V>(name, claimed)?;
        let pages = Pages::<K, V>::from_sorted(entries, self.inner.config.keys_per_page);
        let map = MVMap::new(id, name.to_string(), Arc::downgrade(&self.inner), pages);

        let erased: Arc<dyn Any + Send + Sync> = map.inner().clone();
        state.open_maps.insert(name.to_string(), erased);
        Ok(map)
    }

    /// Makes every write since the previous commit durable; returns the
    /// sequence number of the last write covered.
    pub fn commit(&self) -> Result<u64, StoreError> {
        self.inner.ensure_open()?;
        let mut state = self.inner.lock_state();
        self.inner.commit_locked(&mut state)?;

        if state.wal.size()? > self.inner.config.compaction_threshold {
            if let Err(error) = self.inner.compact_locked(&mut state) {
                self.inner.config.report_background_error(&error);
            }
        }
        Ok(state.seq)
    }

    /// Commits, then folds the WAL into the snapshot.
    pub fn compact(&self) -> Result<(), StoreError> {
        self.inner.ensure_open()?;
        let mut state = self.inner.lock_state();
        self.inner.commit_locked(&mut state)?;
        self.inner.compact_locked(&mut state)
    }

    /// Commits outstanding writes, compacts if configured, and releases the
    /// directory lock. Calling it again is a no-op.
    pub fn close(&self) -> Result<(), StoreError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = {
            let mut state = self.inner.lock_state();
            self.inner.commit_locked(&mut state).and_then(|_| {
                if self.inner.config.compact_on_close && state.wal.size()? > 0 {
                    self.inner.compact_locked(&mut state)
                } else {
                    Ok(())
                }
            })
        };
        self.inner.release_lock();
        tracing::debug!(
            target: "depcache.store",
            dir = %self.inner.dir.display(),
            ok = result.is_ok(),
            "store closed"
        );
        result
    }

    /// Releases the store without writing anything: uncommitted writes are
    /// dropped and the files are left exactly as they are.
    pub fn close_immediately(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.lock_state().pending.clear();
        self.inner.release_lock();
        tracing::debug!(
            target: "depcache.store",
            dir = %self.inner.dir.display(),
            "store closed without flush"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.inner.lock_state();
        StoreStats {
            commits: state.commits,
            compactions: state.compactions,
            pending_writes: state.pending.len(),
            wal_bytes: state.wal.size().unwrap_or(0),
            open_maps: state.open_maps.len(),
            last_seq: state.seq,
        }
    }
}

fn acquire_lock(dir: &Path) -> Result<File, StoreError> {
    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Err(StoreError::Locked(dir.to_path_buf())),
        Err(e) => Err(e.into()),
    }
}

fn load_registry(recovered: &mut Memtable) -> Result<HashMap<String, MapMeta>, StoreError> {
    let corrupt = |source| StoreError::Corrupt {
        name: META_MAP_NAME.to_string(),
        source,
    };
    let mut registry = HashMap::new();
    for (key, entry) in recovered.take_prefix(&META_MAP_ID.to_be_bytes()) {
        let Some(value) = entry.value else { continue };
        let name = decode_exact::<Utf8Codec>(&key[4..]).map_err(corrupt)?;
        let meta = MapMeta::decode(&value).map_err(corrupt)?;
        registry.insert(name, meta);
    }
    Ok(registry)
}

fn decode_entries<K: Codec, V: Codec>(
    name: &str,
    claimed: Vec<(Vec<u8>, ValueEntry)>,
) -> Result<Vec<(K::Item, V::Item)>, StoreError> {
    let corrupt = |source| StoreError::Corrupt {
        name: name.to_string(),
        source,
    };
    let mut entries = Vec::with_capacity(claimed.len());
    for (key, entry) in claimed {
        let Some(value) = entry.value else { continue };
        let k = decode_exact::<K>(&key[4..]).map_err(corrupt)?;
        let v = decode_exact::<V>(&value).map_err(corrupt)?;
        entries.push((k, v));
    }
    // byte order of encoded keys need not match codec order
    entries.sort_by(|a, b| K::compare(&a.0, &b.0));
    Ok(entries)
}
