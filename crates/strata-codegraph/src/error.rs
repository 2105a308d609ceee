//! Analysis errors

use std::path::PathBuf;
use strata_common::PatternError;

/// Errors raised while analyzing a project
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Project root missing or not a directory
    #[error("project root {0} is not a directory")]
    InvalidRoot(PathBuf),

    /// Directory traversal failure
    #[error("failed to walk {path}: {message}")]
    Walk {
        /// Path being visited
        path: PathBuf,
        /// Walker message
        message: String,
    },

    /// Source file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Grammar could not be loaded or produced no tree
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// File path
        path: String,
        /// Parser message
        message: String,
    },

    /// Invalid exclude pattern
    #[error(transparent)]
    Pattern(#[from] PatternError),
}
