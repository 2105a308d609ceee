//! Run phases, progress events and the final report

use crate::task::{TaskId, TaskStatus, Tier};
use serde::Serialize;
use std::time::Duration;

/// Orchestrator lifecycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Nothing started
    #[default]
    Idle,
    /// Validating the submitted graph
    Planning,
    /// Dispatching and executing tasks
    Executing,
    /// Settling leftovers and building the report
    Finalizing,
    /// Run finished
    Done,
}

/// Progress notification broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    /// A task entered the graph
    Registered {
        /// Task id
        id: TaskId,
        /// Parent, for decomposition children
        parent: Option<TaskId>,
        /// Tier
        tier: Tier,
    },
    /// A task changed status
    StatusChanged {
        /// Task id
        id: TaskId,
        /// New status
        status: TaskStatus,
        /// Error message for failures
        error: Option<String>,
    },
    /// A leaf result came from the cache
    CacheHit {
        /// Task id
        id: TaskId,
    },
    /// Remaining tasks could never run and were failed
    Deadlock {
        /// Tasks failed by deadlock resolution
        failed: Vec<TaskId>,
    },
    /// The orchestrator moved to a new phase
    PhaseChanged {
        /// New phase
        phase: RunPhase,
    },
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task completed
    Completed,
    /// Some tasks failed
    Partial,
    /// Cancellation stopped the run
    Cancelled,
}

/// Error recorded on one failed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskErrorSummary {
    /// Task id
    pub id: TaskId,
    /// Task target
    pub target: String,
    /// Error message
    pub error: String,
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Outcome
    pub status: RunStatus,
    /// Tasks in the graph, including decomposition children
    pub total: usize,
    /// Completed tasks
    pub completed: usize,
    /// Failed tasks
    pub failed: usize,
    /// Tasks left non-terminal
    pub pending: usize,
    /// Cancelled tasks
    pub cancelled: usize,
    /// One entry per failed task, in registration order
    pub errors: Vec<TaskErrorSummary>,
    /// Wall time of the run
    #[serde(with = "strata_common::serde_ms")]
    pub duration: Duration,
}

impl RunReport {
    /// Whether every task completed
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}
