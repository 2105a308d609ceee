//! Strata Core
//!
//! Tiered task decomposition and bounded-parallel execution:
//! - [`Task`] and [`TaskGraph`]: tasks, dependencies and readiness
//! - [`Orchestrator`]: dispatch, decomposition, deadlock handling and
//!   cancellation
//! - Collaborator seams: [`ReasoningService`], [`Decomposer`],
//!   [`TaskStore`], [`UndoJournal`], [`OutputApplier`]
//!
//! Leaf tasks reuse cached results from [`strata_cache`], take prompt
//! context from [`strata_codegraph`] and reach the reasoning service
//! through [`strata_resilience`].
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_core::prelude::*;
//!
//! let orchestrator = Orchestrator::builder(OrchestratorConfig::default(), service)
//!     .with_decomposer(decomposer)
//!     .build()?;
//!
//! let root = Task::new(TaskKind::Refactor, Tier::System, "src", "split the storage layer");
//! let report = orchestrator.execute(root).await?;
//! println!("{} of {} tasks completed", report.completed, report.total);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod apply;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod orchestrator;
pub mod service;
pub mod store;
pub mod task;
pub mod undo;

pub use apply::{FileWriter, OutputApplier};
pub use config::{OrchestratorConfig, DECOMPOSITION_DEPENDENCY, REASONING_DEPENDENCY};
pub use error::{
    ApplyError, ConfigError, GraphError, OrchestratorError, StoreError, TaskFailure, UndoError,
};
pub use events::{RunPhase, RunReport, RunStatus, TaskErrorSummary, TaskEvent};
pub use graph::{TaskGraph, TaskStats};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, DEADLOCK_REASON};
pub use service::{
    Completion, CompletionRequest, Decomposer, DecompositionContext, FinishReason, Message,
    ReasoningService, ResponseFormat, Role,
};
pub use store::{InMemoryTaskStore, TaskStore};
pub use task::{Task, TaskId, TaskKind, TaskStatus, Tier};
pub use undo::{FileBackupJournal, UndoJournal, UndoToken};

/// Re-exports for common usage
pub mod prelude {
    pub use crate::{
        Completion, CompletionRequest, Decomposer, DecompositionContext, Orchestrator,
        OrchestratorConfig, ReasoningService, RunReport, RunStatus, Task, TaskGraph, TaskId,
        TaskKind, TaskStatus, Tier,
    };
    pub use strata_resilience::{ErrorKind, ServiceError};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
