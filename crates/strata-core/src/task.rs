//! Task model
//!
//! A [`Task`] is one unit of work at one granularity [`Tier`]. Tasks are
//! owned by the [`crate::TaskGraph`] and mutated only through it.

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use ulid::Ulid;

/// Task identifier
///
/// Freshly generated ids are ULIDs; any string is accepted so that callers
/// can name tasks themselves.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate new task ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// What a task does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Add new code
    Create,
    /// Change existing code
    Modify,
    /// Restructure without behavior change
    Refactor,
    /// Remove code
    Delete,
    /// Repair a defect
    Fix,
    /// Add or change tests
    Test,
}

impl TaskKind {
    /// Stable lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Refactor => "refactor",
            Self::Delete => "delete",
            Self::Fix => "fix",
            Self::Test => "test",
        }
    }
}

/// Granularity tier, coarsest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Whole system
    System,
    /// Subsystem or package
    Subsystem,
    /// Single module / file
    Module,
    /// Class or type
    Class,
    /// Single function (leaf)
    Function,
}

impl Tier {
    /// Next finer tier, `None` at the leaf
    #[must_use]
    pub fn next(&self) -> Option<Tier> {
        match self {
            Self::System => Some(Self::Subsystem),
            Self::Subsystem => Some(Self::Module),
            Self::Module => Some(Self::Class),
            Self::Class => Some(Self::Function),
            Self::Function => None,
        }
    }

    /// Whether this is the finest tier
    #[inline]
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Function)
    }

    /// Distance from the root tier
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Self::System => 0,
            Self::Subsystem => 1,
            Self::Module => 2,
            Self::Class => 3,
            Self::Function => 4,
        }
    }
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies or dispatch
    Pending,
    /// Being decomposed
    Planning,
    /// Runnable
    Ready,
    /// Executing
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Explicitly blocked
    Blocked,
    /// Abandoned by run cancellation
    Cancelled,
}

impl TaskStatus {
    /// Every status, in declaration order
    pub const ALL: [TaskStatus; 8] = [
        Self::Pending,
        Self::Planning,
        Self::Ready,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
        Self::Blocked,
        Self::Cancelled,
    ];

    /// Whether the task will never change again
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier
    pub id: TaskId,
    /// Task that produced this one during decomposition
    pub parent: Option<TaskId>,
    /// Children registered by decomposition, in order
    pub subtasks: Vec<TaskId>,
    /// What the task does
    pub kind: TaskKind,
    /// Granularity
    pub tier: Tier,
    /// Target; for leaf tasks `path/to/file` or `path/to/file::symbol`
    pub target: String,
    /// Free-text instruction
    pub instruction: String,
    /// Arbitrary structured context
    pub context: Map<String, Value>,
    /// Lifecycle state
    pub status: TaskStatus,
    /// Lower runs first among ready tasks
    pub priority: u32,
    /// Tasks that must complete first
    pub dependencies: IndexSet<TaskId>,
    /// Result payload once completed
    pub result: Option<Value>,
    /// Error message once failed
    pub error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// First transition to in-progress
    pub started_at: Option<DateTime<Utc>>,
    /// Transition to a terminal state
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Default priority
    pub const DEFAULT_PRIORITY: u32 = 50;

    /// Create new pending task
    #[must_use]
    pub fn new(
        kind: TaskKind,
        tier: Tier,
        target: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            parent: None,
            subtasks: Vec::new(),
            kind,
            tier,
            target: target.into(),
            instruction: instruction.into(),
            context: Map::new(),
            status: TaskStatus::Pending,
            priority: Self::DEFAULT_PRIORITY,
            dependencies: IndexSet::new(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// With explicit id
    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    /// With priority
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// With one more dependency
    #[inline]
    #[must_use]
    pub fn with_dependency(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    /// With a context value
    #[inline]
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Split the target into file and optional symbol
    #[must_use]
    pub fn target_parts(&self) -> (&str, Option<&str>) {
        match self.target.split_once("::") {
            Some((file, symbol)) if !symbol.is_empty() => (file, Some(symbol)),
            Some((file, _)) => (file, None),
            None => (&self.target, None),
        }
    }

    pub(crate) fn transition(&mut self, status: TaskStatus) {
        let now = Utc::now();
        if status == TaskStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() {
            self.completed_at = Some(now);
        } else {
            self.completed_at = None;
        }
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_descend_to_leaf() {
        let mut tier = Tier::System;
        let mut seen = vec![tier];
        while let Some(next) = tier.next() {
            assert!(next > tier);
            tier = next;
            seen.push(tier);
        }
        assert_eq!(seen.len(), 5);
        assert!(tier.is_leaf());
        assert_eq!(tier.depth(), 4);
    }

    #[test]
    fn target_parts_split_on_first_separator() {
        let t = Task::new(TaskKind::Modify, Tier::Function, "src/lib.rs::Graph::new", "x");
        assert_eq!(t.target_parts(), ("src/lib.rs", Some("Graph::new")));
        let t = Task::new(TaskKind::Modify, Tier::Function, "app.py", "x");
        assert_eq!(t.target_parts(), ("app.py", None));
        let t = Task::new(TaskKind::Modify, Tier::Function, "app.py::", "x");
        assert_eq!(t.target_parts(), ("app.py", None));
    }

    #[test]
    fn transitions_stamp_times() {
        let mut t = Task::new(TaskKind::Fix, Tier::Function, "a.py", "fix");
        t.transition(TaskStatus::InProgress);
        let started = t.started_at.unwrap();
        assert!(t.completed_at.is_none());

        t.transition(TaskStatus::Completed);
        assert_eq!(t.started_at, Some(started));
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn arbitrary_ids_are_accepted() {
        let t = Task::new(TaskKind::Create, Tier::Module, "m", "i").with_id("X-999");
        assert_eq!(t.id.as_str(), "X-999");
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn serializes_with_snake_case_enums() {
        let t = Task::new(TaskKind::Refactor, Tier::Class, "m.py::C", "tidy").with_id("T-1");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["id"], "T-1");
        assert_eq!(json["kind"], "refactor");
        assert_eq!(json["tier"], "class");
        assert_eq!(json["status"], "pending");
    }
}
