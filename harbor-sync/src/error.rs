//! Error types for harbor-sync.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local side of a sync could not be resolved to an absolute,
    /// symlink-free path (usually because it does not exist).
    #[error("cannot resolve sync path {path}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The change-detection backend failed to start watching.
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),
}

/// Convenience constructor for [`SyncError::Resolve`].
pub(crate) fn resolve_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Resolve {
        path: path.into(),
        source,
    }
}
