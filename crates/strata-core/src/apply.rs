//! Output application
//!
//! Turns a leaf task's result payload into a change in the outside world.

use crate::error::ApplyError;
use crate::task::Task;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

/// Applies a generated result to its target
#[async_trait]
pub trait OutputApplier: Send + Sync {
    /// Apply `output` produced for `task` to `target`
    ///
    /// # Errors
    /// Any failure; the orchestrator rolls the target back and fails the task
    async fn apply(&self, task: &Task, target: &Path, output: &Value) -> Result<(), ApplyError>;
}

/// Writes the payload's `text` field over the target file
#[derive(Debug, Clone, Copy, Default)]
pub struct FileWriter;

#[async_trait]
impl OutputApplier for FileWriter {
    async fn apply(&self, _task: &Task, target: &Path, output: &Value) -> Result<(), ApplyError> {
        let Some(text) = output.get("text").and_then(Value::as_str) else {
            return Err(ApplyError::Rejected("payload has no text field".into()));
        };
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ApplyError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(target, text)
            .await
            .map_err(|source| ApplyError::Io {
                path: target.to_path_buf(),
                source,
            })?;
        tracing::debug!(target = %target.display(), bytes = text.len(), "output written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskKind, Tier};
    use serde_json::json;

    #[tokio::test]
    async fn writes_text_creating_directories() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("pkg/mod.py");
        let task = Task::new(TaskKind::Create, Tier::Function, "pkg/mod.py", "create");

        FileWriter
            .apply(&task, &target, &json!({"text": "x = 1\n"}))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(target).unwrap(), "x = 1\n");
    }

    #[tokio::test]
    async fn rejects_payload_without_text() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new(TaskKind::Create, Tier::Function, "a.py", "create");
        let err = FileWriter
            .apply(&task, &dir.path().join("a.py"), &json!({"n": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Rejected(_)));
    }
}
