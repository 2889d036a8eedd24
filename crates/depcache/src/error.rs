use store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The persisted cache cannot be trusted; the only recovery is to
    /// discard the whole directory and rebuild.
    #[error("cache must be rebuilt: {reason}")]
    RebuildRequired { reason: String },
    #[error("no string is registered under id {id}")]
    NotFound { id: i32 },
    #[error("id {id} was allocated twice")]
    IdCollision { id: i32 },
    #[error(transparent)]
    Store(StoreError),
    #[error("failed to open storage: {source}{}", render_suppressed(.suppressed))]
    OpenFailed {
        #[source]
        source: Box<CacheError>,
        /// Errors from closing partially opened resources, in close order.
        suppressed: Vec<String>,
    },
}

impl CacheError {
    /// True when the caller must invalidate the entire cache.
    pub fn is_rebuild_required(&self) -> bool {
        match self {
            CacheError::RebuildRequired { .. } | CacheError::IdCollision { .. } => true,
            CacheError::OpenFailed { source, .. } => source.is_rebuild_required(),
            _ => false,
        }
    }

    pub(crate) fn rebuild(reason: impl Into<String>) -> Self {
        CacheError::RebuildRequired {
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for CacheError {
    fn from(error: StoreError) -> Self {
        if error.is_corruption() {
            CacheError::rebuild(error.to_string())
        } else {
            CacheError::Store(error)
        }
    }
}

fn render_suppressed(suppressed: &[String]) -> String {
    if suppressed.is_empty() {
        String::new()
    } else {
        format!(" (suppressed: {})", suppressed.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn corruption_maps_to_rebuild_required() {
        let err: CacheError = StoreError::SchemaMismatch {
            name: "m".into(),
            stored: "a".into(),
            requested: "b".into(),
        }
        .into();
        assert!(err.is_rebuild_required());
        match &err {
            CacheError::RebuildRequired { reason } => {
                assert_eq!(reason, "map `m` was created as a but opened as b")
            }
            other => panic!("expected a rebuild, got {other:?}"),
        }

        let err: CacheError = StoreError::Locked(PathBuf::from("/tmp/x")).into();
        assert!(matches!(err, CacheError::Store(StoreError::Locked(_))));
        assert!(!err.is_rebuild_required());
    }

    #[test]
    fn open_failed_reports_source_and_suppressed() {
        let err = CacheError::OpenFailed {
            source: Box::new(CacheError::IdCollision { id: 3 }),
            suppressed: vec!["close a".into(), "close b".into()],
        };
        assert!(err.is_rebuild_required());
        let text = err.to_string();
        assert!(text.contains("id 3 was allocated twice"));
        assert!(text.contains("close a; close b"));
    }
}
