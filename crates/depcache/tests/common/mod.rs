#![allow(dead_code)]

use std::sync::Arc;

use codec::VarIntCodec;
use depcache::{CacheError, MapletFactory, PersistentMultimaplet};
use store::StoreConfig;
use tracing_subscriber::EnvFilter;

pub type Deps = Arc<PersistentMultimaplet<VarIntCodec, VarIntCodec>>;

/// Installs a test-writer subscriber once; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> StoreConfig {
    StoreConfig::default().with_sync_on_commit(false)
}

pub fn open_deps(factory: &MapletFactory) -> Result<Deps, CacheError> {
    factory.persistent_multimaplet("deps")
}
