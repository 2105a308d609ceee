//! Error types for Strata Core
//!
//! - [`GraphError`]: task graph misuse
//! - [`ConfigError`]: configuration loading and validation
//! - [`StoreError`], [`UndoError`], [`ApplyError`]: collaborator failures
//! - [`TaskFailure`]: why a single task failed; recorded on the task, never
//!   propagated out of a run

use crate::task::TaskId;
use std::path::PathBuf;
use strata_resilience::ServiceError;

/// Task graph errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A task with this id is already registered
    #[error("task {0} already exists")]
    DuplicateId(TaskId),

    /// No task with this id
    #[error("task {0} not found")]
    UnknownTask(TaskId),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("failed to access {path}: {source}")]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or shape error
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Serialization failure
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid value
    #[error("invalid configuration value: {0}")]
    Invalid(String),
}

/// Task store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Create for an id that exists
    #[error("task {0} already stored")]
    AlreadyExists(TaskId),

    /// Update or read of an unknown id
    #[error("task {0} not stored")]
    NotFound(TaskId),

    /// Backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Undo journal errors
#[derive(Debug, thiserror::Error)]
pub enum UndoError {
    /// Backup or restore I/O failure
    #[error("undo i/o error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Token unknown or already settled
    #[error("unknown undo token {0}")]
    UnknownToken(String),
}

/// Output application errors
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// Write failure
    #[error("failed to write {path}: {source}")]
    Io {
        /// Target path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Output unusable for this target
    #[error("output rejected: {0}")]
    Rejected(String),
}

/// Why a task failed
#[derive(Debug, thiserror::Error)]
pub enum TaskFailure {
    /// Reasoning or decomposition service failed after resilience handling
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Decomposition produced unusable output
    #[error("malformed decomposition output: {0}")]
    MalformedDecomposition(String),

    /// Non-leaf task but no decomposer configured
    #[error("no decomposer configured for {0:?} tier task")]
    NoDecomposer(crate::task::Tier),

    /// Applying the output failed
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// Backup before applying failed
    #[error(transparent)]
    Undo(#[from] UndoError),

    /// Graph bookkeeping failed
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Execution panicked
    #[error("task execution panicked: {0}")]
    Panicked(String),
}

/// Orchestrator setup and submission errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Task graph rejected a task
    #[error(transparent)]
    Graph(#[from] GraphError),
}
