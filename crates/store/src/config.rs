use std::fmt;
use std::sync::Arc;

use crate::StoreError;

/// Sink for failures that happen outside a caller's request, such as a
/// compaction attempted after a successful commit.
pub type BackgroundErrorHandler = Arc<dyn Fn(&StoreError) + Send + Sync>;

#[derive(Clone)]
pub struct StoreConfig {
    /// fsync the WAL after every commit.
    pub sync_on_commit: bool,
    /// WAL size in bytes above which a commit also compacts.
    pub compaction_threshold: u64,
    /// Fold the WAL into the snapshot on a clean close.
    pub compact_on_close: bool,
    /// Maximum entries per in-memory page before it splits.
    pub keys_per_page: usize,
    pub background_error_handler: Option<BackgroundErrorHandler>,
}

impl StoreConfig {
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    pub fn with_compaction_threshold(mut self, bytes: u64) -> Self {
        self.compaction_threshold = bytes;
        self
    }

    pub fn with_compact_on_close(mut self, compact: bool) -> Self {
        self.compact_on_close = compact;
        self
    }

    pub fn with_keys_per_page(mut self, keys: usize) -> Self {
        self.keys_per_page = keys.max(2);
        self
    }

    pub fn with_background_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&StoreError) + Send + Sync + 'static,
    {
        self.background_error_handler = Some(Arc::new(handler));
        self
    }

    pub(crate) fn report_background_error(&self, error: &StoreError) {
        match &self.background_error_handler {
            Some(handler) => handler(error),
            None => tracing::error!(
                target: "depcache.store",
                %error,
                "background store operation failed"
            ),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            compaction_threshold: 4 * 1024 * 1024,
            compact_on_close: true,
            keys_per_page: 48,
            background_error_handler: None,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("sync_on_commit", &self.sync_on_commit)
            .field("compaction_threshold", &self.compaction_threshold)
            .field("compact_on_close", &self.compact_on_close)
            .field("keys_per_page", &self.keys_per_page)
            .field(
                "background_error_handler",
                &self.background_error_handler.is_some(),
            )
            .finish()
    }
}
