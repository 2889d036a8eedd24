//! Opening, closing, and clear-and-retry recovery of the cache directory.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use codec::{Codec, Hash128Codec, Utf8Codec, VarIntCodec};
use store::{Store, StoreConfig, StoreError};

use crate::enumerator::{
    CachingStringEnumerator, PersistentStringEnumerator, HASH_TO_ID_MAP, ID_TO_STRING_MAP,
};
use crate::multimaplet::{InMemoryMultimaplet, Multimaplet, PersistentMultimaplet};
use crate::CacheError;

pub type Enumerator = CachingStringEnumerator<PersistentStringEnumerator>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Closed,
    Opening,
    Open,
    Closing,
    Failed,
    Clearing,
}

type Closer = Box<dyn FnOnce() -> Result<(), CacheError> + Send>;

/// Resources opened so far, released newest first.
#[derive(Default)]
struct Acquired {
    stack: Vec<(String, Closer)>,
}

impl Acquired {
    fn push<F>(&mut self, what: impl Into<String>, close: F)
    where
        F: FnOnce() -> Result<(), CacheError> + Send + 'static,
    {
        self.stack.push((what.into(), Box::new(close)));
    }

    /// Closes everything in reverse order of acquisition. Failures do not
    /// stop the walk; they come back rendered, oldest-closed last.
    fn release(&mut self) -> Vec<String> {
        let mut failures = Vec::new();
        while let Some((what, close)) = self.stack.pop() {
            if let Err(error) = close() {
                tracing::warn!(
                    target: "depcache.lifecycle",
                    resource = %what,
                    %error,
                    "failed to close resource"
                );
                failures.push(format!("{what}: {error}"));
            }
        }
        failures
    }
}

/// Hands out maps backed by the open store.
///
/// Every persistent multimaplet is tracked so the manager can close it
/// before the store itself.
pub struct MapletFactory {
    store: Store,
    acquired: Mutex<Acquired>,
}

impl fmt::Debug for MapletFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapletFactory")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl MapletFactory {
    fn new(store: Store) -> Self {
        Self {
            store,
            acquired: Mutex::new(Acquired::default()),
        }
    }

    pub fn persistent_multimaplet<KC: Codec, VC: Codec>(
        &self,
        name: &str,
    ) -> Result<Arc<PersistentMultimaplet<KC, VC>>, CacheError> {
        let maplet = Arc::new(PersistentMultimaplet::new(self.store.open_map(name)?));
        let tracked = Arc::clone(&maplet);
        self.acquired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(name, move || tracked.close());
        Ok(maplet)
    }

    pub fn in_memory_multimaplet<K, V>(&self) -> InMemoryMultimaplet<K, V>
    where
        K: std::hash::Hash + Eq + Clone + Send + Sync,
        V: Ord + Clone + Send + Sync,
    {
        InMemoryMultimaplet::new()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn release(&self) -> Vec<String> {
        self.acquired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .release()
    }
}

struct OpenStorage {
    store: Store,
    factory: MapletFactory,
    enumerator: Arc<Enumerator>,
}

/// Owns every open/close transition of one cache directory.
///
/// ```text
/// Closed -> Opening -> Open -> Closing -> Closed
///              |
///              +-> Failed -> Clearing -> Opening   (once per open)
/// ```
pub struct StorageManager {
    dir: PathBuf,
    config: StoreConfig,
    state: LifecycleState,
    cleared: bool,
    open: Option<OpenStorage>,
}

impl fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageManager")
            .field("dir", &self.dir)
            .field("state", &self.state)
            .field("cleared", &self.cleared)
            .finish()
    }
}

impl StorageManager {
    pub fn new<P: AsRef<Path>>(dir: P, config: StoreConfig) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            config,
            state: LifecycleState::Closed,
            cleared: false,
            open: None,
        }
    }

    /// Opens the store and the string tables, then runs `build` to open the
    /// caller's maps.
    ///
    /// With `force_rebuild` the directory is deleted first. If any step
    /// fails and the directory has not been cleared yet during this call,
    /// everything opened so far is released, the directory is deleted, and
    /// the whole sequence runs again. A second failure is returned. If the
    /// directory cannot be deleted, the first failure is returned with the
    /// deletion error attached as suppressed.
    pub fn open<T, F>(&mut self, force_rebuild: bool, mut build: F) -> Result<T, CacheError>
    where
        F: FnMut(&MapletFactory) -> Result<T, CacheError>,
    {
        if self.open.is_some() {
            self.close()?;
        }
        self.cleared = false;
        if force_rebuild {
            self.clear_storage()?;
        }

        loop {
            self.state = LifecycleState::Opening;
            match self.try_open(&mut build) {
                Ok((storage, value)) => {
                    tracing::info!(
                        target: "depcache.lifecycle",
                        dir = %self.dir.display(),
                        cleared = self.cleared,
                        maps = storage.store.stats().open_maps,
                        "storage opened"
                    );
                    self.open = Some(storage);
                    self.state = LifecycleState::Open;
                    return Ok(value);
                }
                Err(error) => {
                    self.state = LifecycleState::Failed;
                    if self.cleared {
                        tracing::error!(
                            target: "depcache.lifecycle",
                            dir = %self.dir.display(),
                            %error,
                            "storage failed to open after rebuild"
                        );
                        return Err(error);
                    }
                    tracing::warn!(
                        target: "depcache.lifecycle",
                        dir = %self.dir.display(),
                        %error,
                        rebuild_required = error.is_rebuild_required(),
                        "storage failed to open; clearing and retrying"
                    );
                    if let Err(clear_error) = self.clear_storage() {
                        let cleanup = format!("clear {}: {clear_error}", self.dir.display());
                        return Err(CacheError::OpenFailed {
                            source: Box::new(error),
                            suppressed: vec![cleanup],
                        });
                    }
                }
            }
        }
    }

    fn try_open<T, F>(&self, build: &mut F) -> Result<(OpenStorage, T), CacheError>
    where
        F: FnMut(&MapletFactory) -> Result<T, CacheError>,
    {
        std::fs::create_dir_all(&self.dir).map_err(StoreError::from)?;
        let store = Store::open(&self.dir, self.config.clone())?;
        let factory = MapletFactory::new(store.clone());

        let populated = open_enumerator(&store).and_then(|enumerator| {
            let value = build(&factory)?;
            Ok((enumerator, value))
        });

        match populated {
            Ok((enumerator, value)) => Ok((
                OpenStorage {
                    store,
                    factory,
                    enumerator,
                },
                value,
            )),
            Err(error) => {
                let suppressed = factory.release();
                store.close_immediately();
                if suppressed.is_empty() {
                    Err(error)
                } else {
                    Err(CacheError::OpenFailed {
                        source: Box::new(error),
                        suppressed,
                    })
                }
            }
        }
    }

    /// Deletes the cache directory, releasing the store first if open.
    /// Inside [`StorageManager::open`] this uses up the one rebuild.
    pub fn clear_storage(&mut self) -> Result<(), CacheError> {
        self.state = LifecycleState::Clearing;
        self.cleared = true;
        if let Some(open) = self.open.take() {
            open.factory.release();
            open.store.close_immediately();
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                self.state = LifecycleState::Failed;
                return Err(StoreError::from(e).into());
            }
        }
        tracing::info!(
            target: "depcache.lifecycle",
            dir = %self.dir.display(),
            "storage cleared"
        );
        self.state = LifecycleState::Closed;
        Ok(())
    }

    /// Makes all writes so far durable.
    pub fn commit(&self) -> Result<u64, CacheError> {
        let open = self.open.as_ref().ok_or(StoreError::Closed)?;
        Ok(open.store.commit()?)
    }

    /// Commits, closes every tracked map newest first, then the store.
    pub fn close(&mut self) -> Result<(), CacheError> {
        let Some(open) = self.open.take() else {
            return Ok(());
        };
        self.state = LifecycleState::Closing;
        let suppressed = open.factory.release();
        drop(open.enumerator);
        let result = open.store.close();
        self.state = LifecycleState::Closed;

        tracing::info!(
            target: "depcache.lifecycle",
            dir = %self.dir.display(),
            failed_maps = suppressed.len(),
            "storage closed"
        );
        match (result, suppressed.is_empty()) {
            (Ok(()), true) => Ok(()),
            (Ok(()), false) => Err(CacheError::Store(StoreError::Io(std::io::Error::other(
                suppressed.join("; "),
            )))),
            (Err(error), _) => Err(error.into()),
        }
    }

    pub fn factory(&self) -> Option<&MapletFactory> {
        self.open.as_ref().map(|open| &open.factory)
    }

    pub fn enumerator(&self) -> Option<Arc<Enumerator>> {
        self.open.as_ref().map(|open| Arc::clone(&open.enumerator))
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether the most recent [`StorageManager::open`] cleared the directory,
    /// automatically or because a rebuild was forced.
    pub fn was_cleared(&self) -> bool {
        self.cleared
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for StorageManager {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::error!(
                target: "depcache.lifecycle",
                dir = %self.dir.display(),
                %error,
                "failed to close storage on drop"
            );
        }
    }
}

fn open_enumerator(store: &Store) -> Result<Arc<Enumerator>, CacheError> {
    let hash_to_id = store.open_map::<Hash128Codec, VarIntCodec>(HASH_TO_ID_MAP)?;
    let id_to_string = store.open_map::<VarIntCodec, Utf8Codec>(ID_TO_STRING_MAP)?;
    Ok(Arc::new(CachingStringEnumerator::new(
        PersistentStringEnumerator::new(hash_to_id, id_to_string),
    )))
}
