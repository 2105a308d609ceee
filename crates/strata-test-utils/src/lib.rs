//! Testing utilities for Strata workspace
//!
//! Scripted collaborators and task fixtures for orchestrator tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use strata_core::{
    ApplyError, Completion, CompletionRequest, Decomposer, DecompositionContext, FinishReason,
    OrchestratorConfig, OutputApplier, ReasoningService, Role, Task, TaskId, TaskKind, Tier,
    UndoError, UndoJournal, UndoToken,
};
use strata_resilience::{BreakerConfig, ResilienceConfig, RetryPolicy, ServiceError};

/// Leaf task with an explicit id
pub fn leaf(id: &str, target: &str) -> Task {
    Task::new(TaskKind::Modify, Tier::Function, target, format!("update {id}")).with_id(id)
}

/// Leaf task depending on `deps`
pub fn leaf_after(id: &str, target: &str, deps: &[&str]) -> Task {
    deps.iter()
        .fold(leaf(id, target), |task, dep| task.with_dependency(*dep))
}

/// Non-leaf task at `tier`
pub fn composite(id: &str, tier: Tier, target: &str) -> Task {
    Task::new(TaskKind::Refactor, tier, target, format!("plan {id}")).with_id(id)
}

/// Resilience settings that retry quickly and deterministically
pub fn fast_resilience() -> ResilienceConfig {
    ResilienceConfig {
        retry: RetryPolicy::default()
            .with_max_attempts(3)
            .with_backoff(Duration::from_millis(10), 2.0, Duration::from_millis(40))
            .with_jitter(false),
        breaker: BreakerConfig {
            failure_threshold: 50,
            recovery_timeout: Duration::from_secs(60),
        },
        attempt_timeout: Duration::from_secs(5),
        ..ResilienceConfig::default()
    }
}

/// Config with `workers` slots and fast resilience
pub fn test_config(workers: usize) -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_worker_pool_size(workers)
        .with_resilience(fast_resilience())
}

/// Reasoning service that replays scripted results and records every call
///
/// Without a script entry it answers `done: <first prompt line>`.
#[derive(Debug, Default)]
pub struct ScriptedReasoningService {
    latency: Duration,
    script: Mutex<VecDeque<Result<Completion, ServiceError>>>,
    failures: Mutex<Vec<(String, ServiceError)>>,
    requests: Mutex<Vec<CompletionRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedReasoningService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue the result of the next unscripted call
    pub fn push(&self, result: Result<Completion, ServiceError>) {
        self.script.lock().push_back(result);
    }

    /// Fail every call whose prompt mentions `marker`
    pub fn fail_when_prompt_contains(&self, marker: &str, error: ServiceError) {
        self.failures.lock().push((marker.to_string(), error));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// User messages in call order
    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .flat_map(|r| r.messages.iter())
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .collect()
    }

    /// Highest number of overlapping calls observed
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn answer(&self, request: &CompletionRequest) -> Result<Completion, ServiceError> {
        let failure = self.failures.lock().iter().find_map(|(marker, err)| {
            request
                .messages
                .iter()
                .any(|m| m.content.contains(marker.as_str()))
                .then(|| err.clone())
        });
        if let Some(err) = failure {
            return Err(err);
        }
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        let first_line = request
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.lines().next())
            .unwrap_or_default();
        Ok(completion(&format!("done: {first_line}")))
    }
}

/// Completion with plausible token counts
pub fn completion(text: &str) -> Completion {
    Completion {
        text: text.to_string(),
        input_tokens: 100,
        output_tokens: (text.len() / 4) as u64,
        finish_reason: FinishReason::Stop,
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoningService {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ServiceError> {
        self.requests.lock().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.answer(&request)
    }
}

/// Decomposer returning pre-planned children per parent id
#[derive(Debug, Default)]
pub struct ScriptedDecomposer {
    plans: Mutex<HashMap<TaskId, Vec<Task>>>,
    failures: Mutex<HashMap<TaskId, ServiceError>>,
    calls: Mutex<Vec<(TaskId, usize)>>,
}

impl ScriptedDecomposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Children returned when `parent` is decomposed
    #[must_use]
    pub fn with_plan(self, parent: &str, children: Vec<Task>) -> Self {
        self.plans.lock().insert(parent.into(), children);
        self
    }

    /// Error returned when `parent` is decomposed
    #[must_use]
    pub fn failing_for(self, parent: &str, error: ServiceError) -> Self {
        self.failures.lock().insert(parent.into(), error);
        self
    }

    /// `(task, sibling count)` per call
    pub fn calls(&self) -> Vec<(TaskId, usize)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Decomposer for ScriptedDecomposer {
    async fn decompose(
        &self,
        task: &Task,
        siblings: &[Task],
        _context: &DecompositionContext,
    ) -> Result<Vec<Task>, ServiceError> {
        self.calls.lock().push((task.id.clone(), siblings.len()));
        if let Some(err) = self.failures.lock().get(&task.id) {
            return Err(err.clone());
        }
        Ok(self.plans.lock().get(&task.id).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    Backup(PathBuf),
    Rollback(PathBuf),
    Commit(PathBuf),
}

/// In-memory undo journal that records what it was asked to do
#[derive(Debug, Default)]
pub struct RecordingUndoJournal {
    saved: Mutex<HashMap<UndoToken, (PathBuf, Option<Vec<u8>>)>>,
    actions: Mutex<Vec<UndoAction>>,
}

impl RecordingUndoJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<UndoAction> {
        self.actions.lock().clone()
    }

    fn take(&self, token: &UndoToken) -> Result<(PathBuf, Option<Vec<u8>>), UndoError> {
        self.saved
            .lock()
            .remove(token)
            .ok_or_else(|| UndoError::UnknownToken(token.to_string()))
    }
}

#[async_trait]
impl UndoJournal for RecordingUndoJournal {
    async fn backup(&self, target: &Path) -> Result<UndoToken, UndoError> {
        let token = UndoToken::new();
        let content = std::fs::read(target).ok();
        self.saved
            .lock()
            .insert(token.clone(), (target.to_path_buf(), content));
        self.actions
            .lock()
            .push(UndoAction::Backup(target.to_path_buf()));
        Ok(token)
    }

    async fn rollback(&self, token: &UndoToken) -> Result<(), UndoError> {
        let (path, content) = self.take(token)?;
        let restored = match content {
            Some(bytes) => std::fs::write(&path, bytes),
            None => std::fs::remove_file(&path).or(Ok(())),
        };
        restored.map_err(|source| UndoError::Io {
            path: path.clone(),
            source,
        })?;
        self.actions.lock().push(UndoAction::Rollback(path));
        Ok(())
    }

    async fn commit(&self, token: &UndoToken) -> Result<(), UndoError> {
        let (path, _) = self.take(token)?;
        self.actions.lock().push(UndoAction::Commit(path));
        Ok(())
    }
}

/// Applier that writes the payload text, except for targets containing a
/// marker: those get clobbered and then the apply fails
#[derive(Debug, Default)]
pub struct RecordingApplier {
    fail_marker: Option<String>,
    applied: Mutex<Vec<PathBuf>>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            applied: Mutex::default(),
        }
    }

    /// Targets applied successfully
    pub fn applied(&self) -> Vec<PathBuf> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl OutputApplier for RecordingApplier {
    async fn apply(&self, _task: &Task, target: &Path, output: &Value) -> Result<(), ApplyError> {
        let text = output
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let io = |source| ApplyError::Io {
            path: target.to_path_buf(),
            source,
        };

        let failing = self
            .fail_marker
            .as_deref()
            .is_some_and(|m| target.to_string_lossy().contains(m));
        if failing {
            std::fs::write(target, "half-written").map_err(io)?;
            return Err(ApplyError::Rejected(format!(
                "refusing {}",
                target.display()
            )));
        }

        std::fs::write(target, text).map_err(io)?;
        self.applied.lock().push(target.to_path_buf());
        Ok(())
    }
}
