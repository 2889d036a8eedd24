//! # Store
//!
//! Ordered, versioned, persistent key/value store with named typed maps.
//!
//! A [`Store`] owns one data directory. Maps are opened by name with a key
//! and a value [`codec::Codec`]; their entries live decoded in memory,
//! sorted by the key codec, and every mutation is recorded in a pending
//! write buffer. [`Store::commit`] appends that buffer to the WAL as one
//! batch; compaction folds the WAL into the snapshot file. There is no
//! background flush: nothing becomes durable until the owner commits.
//!
//! The per-key primitive is [`MVMap::operate`]: the caller's closure sees the
//! current value under the map's write lock and returns a [`Verdict`].

use std::io;
use std::path::PathBuf;

use codec::CodecError;
use thiserror::Error;
use wal::WalError;

mod config;
mod engine;
mod map;

pub use config::{BackgroundErrorHandler, StoreConfig};
pub use engine::{Store, StoreStats, LOCK_FILE, SNAPSHOT_FILE, WAL_FILE};
pub use map::{Keys, MVMap, Verdict};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("store directory {} is locked by another writer", .0.display())]
    Locked(PathBuf),
    #[error("wal: {0}")]
    Wal(#[from] WalError),
    #[error("snapshot: {0:#}")]
    Snapshot(anyhow::Error),
    #[error("map `{name}` was created as {stored} but opened as {requested}")]
    SchemaMismatch {
        name: String,
        stored: String,
        requested: String,
    },
    #[error("map `{name}` holds undecodable data: {source}")]
    Corrupt {
        name: String,
        #[source]
        source: CodecError,
    },
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// True when the persisted data itself is unusable, as opposed to an
    /// environmental failure such as a missing permission or a held lock.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::Wal(WalError::Corrupt { .. })
                | StoreError::Snapshot(_)
                | StoreError::SchemaMismatch { .. }
                | StoreError::Corrupt { .. }
        )
    }
}
