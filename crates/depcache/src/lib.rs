//! # depcache
//!
//! Storage core for an incremental build worker's dependency-graph cache.
//!
//! - [`Multimaplet`]: key to set-of-values maps whose every mutation is a
//!   [`SetMutation`] applied through the store's decide-and-update primitive.
//! - [`StringEnumerator`]: content-hash based string interning, with a
//!   read-through cache.
//! - [`StorageManager`]: opens the store, the string tables and the caller's
//!   maps, and clears the directory and retries once when that fails.
//!
//! ```no_run
//! use codec::VarIntCodec;
//! use depcache::{CacheError, Multimaplet, StorageManager, StringEnumerator};
//! use store::StoreConfig;
//!
//! # fn main() -> Result<(), CacheError> {
//! let mut manager = StorageManager::new("/tmp/build-cache", StoreConfig::default());
//! let usages = manager.open(false, |factory| {
//!     factory.persistent_multimaplet::<VarIntCodec, VarIntCodec>("usages")
//! })?;
//! if let Some(names) = manager.enumerator() {
//!     let target = names.enumerate("//app:main")?;
//!     let dep = names.enumerate("//lib:util")?;
//!     usages.append_value(&target, dep)?;
//! }
//! manager.commit()?;
//! manager.close()?;
//! # Ok(())
//! # }
//! ```

mod decision;
mod enumerator;
mod error;
mod lifecycle;
mod multimaplet;

pub use decision::{Decision, SetMutation};
pub use enumerator::{
    content_hash, CachingStringEnumerator, PersistentStringEnumerator, StringEnumerator,
    HASH_TO_ID_MAP, ID_TO_STRING_MAP,
};
pub use error::CacheError;
pub use lifecycle::{Enumerator, LifecycleState, MapletFactory, StorageManager};
pub use multimaplet::{InMemoryMultimaplet, Multimaplet, PersistentMultimaplet};
