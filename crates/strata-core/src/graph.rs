//! Task graph
//!
//! The single source of truth for task state during a run. All reads and
//! mutations go through one lock, so a readiness query never observes a
//! half-applied status change.
//!
//! Dependencies on ids that are not registered are treated as satisfied.

use crate::error::GraphError;
use crate::task::{Task, TaskId, TaskStatus};
use indexmap::IndexMap;
use parking_lot::RwLock;
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Per-status task counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    /// All registered tasks
    pub total: usize,
    /// Pending tasks
    pub pending: usize,
    /// Tasks being decomposed
    pub planning: usize,
    /// Tasks marked ready
    pub ready: usize,
    /// Tasks executing
    pub in_progress: usize,
    /// Completed tasks
    pub completed: usize,
    /// Failed tasks
    pub failed: usize,
    /// Explicitly blocked tasks
    pub blocked: usize,
    /// Cancelled tasks
    pub cancelled: usize,
}

impl TaskStats {
    /// Count for one status
    #[must_use]
    pub fn count(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Planning => self.planning,
            TaskStatus::Ready => self.ready,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Blocked => self.blocked,
            TaskStatus::Cancelled => self.cancelled,
        }
    }

    fn bump(&mut self, status: TaskStatus) {
        self.total += 1;
        let slot = match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Planning => &mut self.planning,
            TaskStatus::Ready => &mut self.ready,
            TaskStatus::InProgress => &mut self.in_progress,
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Blocked => &mut self.blocked,
            TaskStatus::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }
}

/// Registry of tasks and their dependency edges
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: RwLock<IndexMap<TaskId, Task>>,
}

impl TaskGraph {
    /// Create empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task
    ///
    /// # Errors
    /// [`GraphError::DuplicateId`] if the id is taken
    pub fn add_task(&self, task: Task) -> Result<(), GraphError> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&task.id) {
            return Err(GraphError::DuplicateId(task.id));
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Register `child` as a subtask of `parent`
    ///
    /// # Errors
    /// [`GraphError::UnknownTask`] for a missing parent,
    /// [`GraphError::DuplicateId`] if the child id is taken
    pub fn attach_subtask(&self, parent: &TaskId, mut child: Task) -> Result<(), GraphError> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&child.id) {
            return Err(GraphError::DuplicateId(child.id));
        }
        let Some(owner) = tasks.get_mut(parent) else {
            return Err(GraphError::UnknownTask(parent.clone()));
        };
        owner.subtasks.push(child.id.clone());
        child.parent = Some(parent.clone());
        tasks.insert(child.id.clone(), child);
        Ok(())
    }

    /// Add a dependency edge `id -> dependency`
    ///
    /// # Errors
    /// [`GraphError::UnknownTask`] if `id` is missing
    pub fn add_dependency(&self, id: &TaskId, dependency: TaskId) -> Result<(), GraphError> {
        self.with_task(id, |task| {
            task.dependencies.insert(dependency);
        })
    }

    /// Snapshot of one task
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.read().get(id).cloned()
    }

    /// Whether `id` is registered
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.read().contains_key(id)
    }

    /// Number of registered tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    /// Whether no task is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Snapshot of every task in registration order
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.read().values().cloned().collect()
    }

    /// Pending tasks whose registered dependencies are all completed,
    /// ordered by ascending priority then registration order
    #[must_use]
    pub fn ready(&self) -> Vec<Task> {
        let tasks = self.tasks.read();
        let mut ready: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && Self::satisfied(&tasks, t))
            .cloned()
            .collect();
        ready.sort_by_key(|t| t.priority);
        ready
    }

    /// Pending tasks with at least one registered dependency not completed
    #[must_use]
    pub fn blocked(&self) -> Vec<Task> {
        let tasks = self.tasks.read();
        tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && !Self::satisfied(&tasks, t))
            .cloned()
            .collect()
    }

    /// Whether every task is terminal
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.tasks.read().values().all(|t| t.status.is_terminal())
    }

    /// Per-status counts
    #[must_use]
    pub fn stats(&self) -> TaskStats {
        let tasks = self.tasks.read();
        let mut stats = TaskStats::default();
        for task in tasks.values() {
            stats.bump(task.status);
        }
        stats
    }

    /// Set a task's status, stamping start and completion times
    ///
    /// # Errors
    /// [`GraphError::UnknownTask`] if `id` is missing
    pub fn update_status(&self, id: &TaskId, status: TaskStatus) -> Result<(), GraphError> {
        self.with_task(id, |task| task.transition(status))
    }

    /// Record a result payload
    ///
    /// # Errors
    /// [`GraphError::UnknownTask`] if `id` is missing
    pub fn set_result(&self, id: &TaskId, result: Value) -> Result<(), GraphError> {
        self.with_task(id, |task| task.result = Some(result))
    }

    /// Record an error message and mark the task failed
    ///
    /// # Errors
    /// [`GraphError::UnknownTask`] if `id` is missing
    pub fn set_error(&self, id: &TaskId, error: impl Into<String>) -> Result<(), GraphError> {
        let error = error.into();
        self.with_task(id, |task| {
            task.error = Some(error);
            task.transition(TaskStatus::Failed);
        })
    }

    /// Fail every pending task with `reason`, returning their ids
    ///
    /// Called once nothing is runnable or in flight; at that point every
    /// pending task is blocked.
    pub fn fail_blocked(&self, reason: &str) -> Vec<TaskId> {
        self.settle_where(|s| s == TaskStatus::Pending, TaskStatus::Failed, Some(reason))
    }

    /// Cancel every task that has not started, returning their ids
    pub fn cancel_pending(&self) -> Vec<TaskId> {
        self.settle_where(
            |s| {
                matches!(
                    s,
                    TaskStatus::Pending | TaskStatus::Ready | TaskStatus::Planning | TaskStatus::Blocked
                )
            },
            TaskStatus::Cancelled,
            None,
        )
    }

    /// Strongly connected groups of tasks in the dependency graph,
    /// including single tasks that depend on themselves
    #[must_use]
    pub fn detect_cycles(&self) -> Vec<Vec<TaskId>> {
        let tasks = self.tasks.read();
        let mut graph: DiGraph<&TaskId, ()> = DiGraph::with_capacity(tasks.len(), 0);
        let nodes: HashMap<&TaskId, _> = tasks.keys().map(|id| (id, graph.add_node(id))).collect();

        for (id, task) in tasks.iter() {
            for dep in &task.dependencies {
                if let Some(&to) = nodes.get(dep) {
                    graph.add_edge(nodes[id], to, ());
                }
            }
        }

        tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.first().is_some_and(|&n| graph.contains_edge(n, n))
            })
            .map(|scc| {
                let mut ids: Vec<TaskId> = scc.into_iter().map(|n| graph[n].clone()).collect();
                ids.sort();
                ids
            })
            .collect()
    }

    fn satisfied(tasks: &IndexMap<TaskId, Task>, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            tasks
                .get(dep)
                .is_none_or(|d| d.status == TaskStatus::Completed)
        })
    }

    fn with_task(&self, id: &TaskId, f: impl FnOnce(&mut Task)) -> Result<(), GraphError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownTask(id.clone()))?;
        f(task);
        Ok(())
    }

    fn settle_where(
        &self,
        select: impl Fn(TaskStatus) -> bool,
        status: TaskStatus,
        reason: Option<&str>,
    ) -> Vec<TaskId> {
        let mut tasks = self.tasks.write();
        let mut settled = Vec::new();
        for task in tasks.values_mut().filter(|t| select(t.status)) {
            if let Some(reason) = reason {
                task.error = Some(reason.to_string());
            }
            task.transition(status);
            settled.push(task.id.clone());
        }
        settled
    }
}
