//! # SSTable
//!
//! The store's snapshot file: a sorted, immutable dump of every live record,
//! rewritten in full on compaction.
//!
//! ## File layout (v2)
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ DATA SECTION (sorted key/value records)       │
//! │                                               │
//! │ key_len (u32) | key | seq (u64) | present (u8)│
//! │ val_len (u32) | val                           │
//! │                                               │
//! │ ... repeated for each entry ...               │
//! ├───────────────────────────────────────────────┤
//! │ FOOTER (always last 16 bytes)                 │
//! │                                               │
//! │ record_count (u64) | data_crc32 (u32)         │
//! │ magic (u32) "SST2"                            │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. The checksum covers the whole data
//! section, so a truncated or partially overwritten file fails to open.

mod format;
mod reader;
mod writer;

pub use format::{FOOTER_BYTES, SSTABLE_MAGIC};
pub use reader::SSTableReader;
pub use writer::SSTableWriter;
