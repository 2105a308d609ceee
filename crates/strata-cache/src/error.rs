//! Cache errors

use std::path::PathBuf;
use strata_common::PatternError;

/// Errors raised by [`crate::ContentCache`]
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The file to hash could not be read
    #[error("cannot read {path}: {source}")]
    NotFound {
        /// File that was looked up
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Snapshot I/O failure
    #[error("snapshot i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot encoding failure
    #[error("snapshot format error: {0}")]
    Format(#[from] serde_json::Error),

    /// Unsupported snapshot version
    #[error("unsupported snapshot version {found} (expected {expected})")]
    SnapshotVersion {
        /// Version this build writes
        expected: u32,
        /// Version found on disk
        found: u32,
    },

    /// Invalid invalidation pattern
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

impl CacheError {
    /// Whether this error is an unreadable source file
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
