//! Undo journal
//!
//! Before output is applied to a target the orchestrator takes a backup;
//! the backup is rolled back if applying fails and committed otherwise.

use crate::error::UndoError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use ulid::Ulid;

/// Handle to one backup
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UndoToken(String);

impl UndoToken {
    /// Fresh unique token
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Borrow as string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UndoToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UndoToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backup and restore of change targets
#[async_trait]
pub trait UndoJournal: Send + Sync {
    /// Capture the current state of `target`
    ///
    /// # Errors
    /// [`UndoError::Io`] if the target exists but cannot be copied
    async fn backup(&self, target: &Path) -> Result<UndoToken, UndoError>;

    /// Restore the state captured under `token` and forget it
    ///
    /// # Errors
    /// [`UndoError::UnknownToken`] or an I/O failure while restoring
    async fn rollback(&self, token: &UndoToken) -> Result<(), UndoError>;

    /// Discard the backup under `token`
    ///
    /// # Errors
    /// [`UndoError::UnknownToken`] for an unknown token
    async fn commit(&self, token: &UndoToken) -> Result<(), UndoError>;
}

#[derive(Debug, Clone)]
struct Backup {
    target: PathBuf,
    /// `None` when the target did not exist
    copy: Option<PathBuf>,
}

/// Journal that copies targets into a backup directory
#[derive(Debug)]
pub struct FileBackupJournal {
    dir: PathBuf,
    entries: DashMap<UndoToken, Backup>,
}

impl FileBackupJournal {
    /// Journal storing copies under `dir`, created on first backup
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: DashMap::new(),
        }
    }

    /// Backups neither rolled back nor committed
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.entries.len()
    }

    fn take(&self, token: &UndoToken) -> Result<Backup, UndoError> {
        self.entries
            .remove(token)
            .map(|(_, backup)| backup)
            .ok_or_else(|| UndoError::UnknownToken(token.to_string()))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> UndoError + '_ {
    move |source| UndoError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl UndoJournal for FileBackupJournal {
    async fn backup(&self, target: &Path) -> Result<UndoToken, UndoError> {
        let token = UndoToken::new();
        let copy = if tokio::fs::try_exists(target).await.map_err(io_error(target))? {
            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(io_error(&self.dir))?;
            let copy = self.dir.join(format!("{token}.bak"));
            tokio::fs::copy(target, &copy).await.map_err(io_error(target))?;
            Some(copy)
        } else {
            None
        };
        tracing::debug!(target = %target.display(), token = %token, existed = copy.is_some(), "backup taken");
        self.entries.insert(
            token.clone(),
            Backup {
                target: target.to_path_buf(),
                copy,
            },
        );
        Ok(token)
    }

    async fn rollback(&self, token: &UndoToken) -> Result<(), UndoError> {
        let backup = self.take(token)?;
        match &backup.copy {
            Some(copy) => {
                tokio::fs::copy(copy, &backup.target)
                    .await
                    .map_err(io_error(&backup.target))?;
                tokio::fs::remove_file(copy).await.map_err(io_error(copy))?;
            }
            None => match tokio::fs::remove_file(&backup.target).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(io_error(&backup.target)(err)),
            },
        }
        tracing::info!(target = %backup.target.display(), token = %token, "target rolled back");
        Ok(())
    }

    async fn commit(&self, token: &UndoToken) -> Result<(), UndoError> {
        let backup = self.take(token)?;
        if let Some(copy) = &backup.copy {
            tokio::fs::remove_file(copy).await.map_err(io_error(copy))?;
        }
        Ok(())
    }
}
