//! Task persistence
//!
//! The orchestrator writes every task on registration and after every
//! status change. Store failures are logged and never fail a task.

use crate::error::StoreError;
use crate::task::{Task, TaskId};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Durable task storage
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a newly registered task
    ///
    /// # Errors
    /// [`StoreError::AlreadyExists`] for a known id, or a backend error
    async fn create_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Overwrite a stored task
    ///
    /// # Errors
    /// [`StoreError::NotFound`] for an unknown id, or a backend error
    async fn update_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Read a stored task
    ///
    /// # Errors
    /// Backend errors only; unknown ids yield `Ok(None)`
    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError>;
}

/// In-process store that also keeps every written version of each task
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, Task>,
    history: DashMap<TaskId, Vec<Task>>,
}

impl InMemoryTaskStore {
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored task count
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Every version written for `id`, oldest first
    #[must_use]
    pub fn history(&self, id: &TaskId) -> Vec<Task> {
        self.history.get(id).map(|h| h.clone()).unwrap_or_default()
    }

    fn record(&self, task: &Task) {
        self.history
            .entry(task.id.clone())
            .or_default()
            .push(task.clone());
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        match self.tasks.entry(task.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(task.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(task.clone());
                self.record(task);
                Ok(())
            }
        }
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        let Some(mut stored) = self.tasks.get_mut(&task.id) else {
            return Err(StoreError::NotFound(task.id.clone()));
        };
        *stored = task.clone();
        drop(stored);
        self.record(task);
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.get(id).map(|t| t.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskKind, TaskStatus, Tier};

    fn task() -> Task {
        Task::new(TaskKind::Create, Tier::Function, "a.py::f", "add f").with_id("T-1")
    }

    #[tokio::test]
    async fn create_update_get_keeps_history() {
        let store = InMemoryTaskStore::new();
        let mut t = task();
        store.create_task(&t).await.unwrap();

        t.status = TaskStatus::Completed;
        store.update_task(&t).await.unwrap();

        let stored = store.get_task(&t.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        let history = store.history(&t.id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_create_and_unknown_update_fail() {
        let store = InMemoryTaskStore::new();
        let t = task();
        store.create_task(&t).await.unwrap();
        assert_eq!(
            store.create_task(&t).await,
            Err(StoreError::AlreadyExists(t.id.clone()))
        );

        let other = task().with_id("T-2");
        assert_eq!(
            store.update_task(&other).await,
            Err(StoreError::NotFound(other.id.clone()))
        );
        assert!(store.get_task(&other.id).await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }
}
