//! Orchestrator
//!
//! Drives a [`TaskGraph`] to completion with bounded parallelism.
//!
//! # Workflow
//! 1. Log dependency cycles; they surface later as deadlock failures
//! 2. Dispatch ready tasks while fewer than `worker_pool_size` are in flight
//! 3. Leaf tasks consult the result cache, then call the reasoning service
//!    through its resilience layer and apply the output behind a backup
//! 4. Non-leaf tasks are decomposed and their children join the graph
//! 5. Once nothing is runnable or in flight, every blocked task fails
//! 6. Build the [`RunReport`]
//!
//! A failing task never aborts the run; its error is recorded on the task.

use crate::apply::OutputApplier;
use crate::config::{OrchestratorConfig, DECOMPOSITION_DEPENDENCY, REASONING_DEPENDENCY};
use crate::error::{OrchestratorError, TaskFailure};
use crate::events::{RunPhase, RunReport, RunStatus, TaskErrorSummary, TaskEvent};
use crate::graph::{TaskGraph, TaskStats};
use crate::service::{
    CompletionRequest, Decomposer, DecompositionContext, Message, ReasoningService, ResponseFormat,
};
use crate::store::{InMemoryTaskStore, TaskStore};
use crate::task::{Task, TaskId, TaskStatus};
use crate::undo::UndoJournal;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use strata_cache::ContentCache;
use strata_codegraph::CodeGraph;
use strata_resilience::{DependencyHealth, ResilienceLayer, ResilienceRegistry};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Error recorded on tasks failed by deadlock resolution
pub const DEADLOCK_REASON: &str = "deadlock: unmet dependencies";

const LEAF_INSTRUCTIONS: &str = "You carry out one function-level step of a larger change plan. \
Reply with the complete new content for the target only.";

enum Outcome {
    Completed(Value),
    /// Parent re-queued behind its children
    Deferred,
}

/// Everything a worker needs; shared between the run loop and workers
struct Shared {
    config: OrchestratorConfig,
    graph: Arc<TaskGraph>,
    service: Arc<dyn ReasoningService>,
    decomposer: Option<Arc<dyn Decomposer>>,
    store: Arc<dyn TaskStore>,
    cache: Option<ContentCache>,
    code_graph: Option<Arc<CodeGraph>>,
    undo: Option<Arc<dyn UndoJournal>>,
    applier: Option<Arc<dyn OutputApplier>>,
    reasoning: ResilienceLayer,
    decomposition: ResilienceLayer,
    events: broadcast::Sender<TaskEvent>,
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    service: Arc<dyn ReasoningService>,
    decomposer: Option<Arc<dyn Decomposer>>,
    store: Option<Arc<dyn TaskStore>>,
    cache: Option<ContentCache>,
    code_graph: Option<Arc<CodeGraph>>,
    undo: Option<Arc<dyn UndoJournal>>,
    applier: Option<Arc<dyn OutputApplier>>,
    registry: Option<Arc<ResilienceRegistry>>,
    graph: Option<Arc<TaskGraph>>,
}

impl OrchestratorBuilder {
    /// Decomposer for non-leaf tasks
    #[must_use]
    pub fn with_decomposer(mut self, decomposer: Arc<dyn Decomposer>) -> Self {
        self.decomposer = Some(decomposer);
        self
    }

    /// Task store; defaults to [`InMemoryTaskStore`]
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Result cache for leaf tasks
    #[must_use]
    pub fn with_cache(mut self, cache: ContentCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Code graph used to build prompt context
    #[must_use]
    pub fn with_code_graph(mut self, graph: Arc<CodeGraph>) -> Self {
        self.code_graph = Some(graph);
        self
    }

    /// Undo journal used when rollback is enabled
    #[must_use]
    pub fn with_undo_journal(mut self, journal: Arc<dyn UndoJournal>) -> Self {
        self.undo = Some(journal);
        self
    }

    /// Applier for leaf results
    #[must_use]
    pub fn with_applier(mut self, applier: Arc<dyn OutputApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    /// Share breakers and limiters with other components; defaults to a
    /// registry built from the configuration
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ResilienceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Run over an existing graph
    #[must_use]
    pub fn with_graph(mut self, graph: Arc<TaskGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Validate the configuration and build
    ///
    /// # Errors
    /// [`OrchestratorError::Config`] for invalid configuration
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        self.config.validate()?;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(self.config.resilience_registry()));
        let (events, _) = broadcast::channel(self.config.event_capacity);

        let shared = Shared {
            reasoning: registry.layer(REASONING_DEPENDENCY),
            decomposition: registry.layer(DECOMPOSITION_DEPENDENCY),
            graph: self.graph.unwrap_or_default(),
            service: self.service,
            decomposer: self.decomposer,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new())),
            cache: self.cache,
            code_graph: self.code_graph,
            undo: self.undo,
            applier: self.applier,
            events,
            config: self.config,
        };

        Ok(Orchestrator {
            shared: Arc::new(shared),
            registry,
            phase: RwLock::new(RunPhase::Idle),
            cancel: RwLock::new(CancellationToken::new()),
        })
    }
}

/// Bounded-parallel executor for a task graph
pub struct Orchestrator {
    shared: Arc<Shared>,
    registry: Arc<ResilienceRegistry>,
    phase: RwLock<RunPhase>,
    cancel: RwLock<CancellationToken>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.shared.config)
            .field("phase", &*self.phase.read())
            .field("tasks", &self.shared.graph.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Start building an orchestrator around `service`
    #[must_use]
    pub fn builder(
        config: OrchestratorConfig,
        service: Arc<dyn ReasoningService>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            service,
            decomposer: None,
            store: None,
            cache: None,
            code_graph: None,
            undo: None,
            applier: None,
            registry: None,
            graph: None,
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    /// The task graph
    #[inline]
    #[must_use]
    pub fn graph(&self) -> &Arc<TaskGraph> {
        &self.shared.graph
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> RunPhase {
        *self.phase.read()
    }

    /// Per-status task counts
    #[must_use]
    pub fn stats(&self) -> TaskStats {
        self.shared.graph.stats()
    }

    /// Breaker and limiter state of every dependency used so far
    #[must_use]
    pub fn health(&self) -> Vec<DependencyHealth> {
        self.registry.health()
    }

    /// Receive progress events from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.shared.events.subscribe()
    }

    /// Token that cancels the current (or next) run when triggered
    ///
    /// A run that ends cancelled installs a fresh token, so tokens taken
    /// before then have no effect on later runs.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.read().clone()
    }

    /// Stop dispatching; in-flight tasks finish, the rest are cancelled
    pub fn cancel(&self) {
        self.cancel.read().cancel();
    }

    /// Register a task and persist it
    ///
    /// # Errors
    /// [`OrchestratorError::Graph`] if the id is already registered
    pub async fn submit(&self, task: Task) -> Result<TaskId, OrchestratorError> {
        let id = task.id.clone();
        let (parent, tier) = (task.parent.clone(), task.tier);
        self.shared.graph.add_task(task)?;
        self.shared.emit(TaskEvent::Registered {
            id: id.clone(),
            parent,
            tier,
        });
        self.shared.persist_new(&id).await;
        Ok(id)
    }

    /// Submit `root` and run the graph to completion
    ///
    /// # Errors
    /// As [`Orchestrator::submit`]
    pub async fn execute(&self, root: Task) -> Result<RunReport, OrchestratorError> {
        self.submit(root).await?;
        Ok(self.run().await)
    }

    /// Run every registered task to a terminal state
    ///
    /// Individual task failures are recorded on the tasks and summarized in
    /// the report.
    pub async fn run(&self) -> RunReport {
        let started = Instant::now();
        let graph = &self.shared.graph;
        let cancel = self.cancellation_token();

        self.set_phase(RunPhase::Planning);
        let cycles = graph.detect_cycles();
        if !cycles.is_empty() {
            tracing::warn!(cycles = ?cycles, "dependency cycles present, affected tasks cannot run");
        }

        self.set_phase(RunPhase::Executing);
        tracing::info!(
            tasks = graph.len(),
            workers = self.shared.config.worker_pool_size,
            "run started"
        );

        let mut in_flight = JoinSet::new();
        let mut cancelled = false;
        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                tracing::info!(in_flight = in_flight.len(), "run cancelled, draining in-flight tasks");
            }

            if !cancelled {
                let free = self
                    .shared
                    .config
                    .worker_pool_size
                    .saturating_sub(in_flight.len());
                for task in graph.ready().into_iter().take(free) {
                    self.shared.mark(&task.id, TaskStatus::InProgress);
                    self.spawn(&mut in_flight, task);
                }
            }

            if in_flight.is_empty() {
                if !cancelled {
                    self.shared.resolve_deadlock().await;
                }
                break;
            }

            tokio::select! {
                joined = in_flight.join_next() => {
                    if let Some(Err(err)) = joined {
                        tracing::error!(error = %err, "worker aborted");
                    }
                }
                () = cancel.cancelled(), if !cancelled => {}
            }
        }

        self.set_phase(RunPhase::Finalizing);
        if cancel.is_cancelled() {
            *self.cancel.write() = CancellationToken::new();
        }
        if cancelled {
            for id in graph.cancel_pending() {
                self.shared.emit(TaskEvent::StatusChanged {
                    id: id.clone(),
                    status: TaskStatus::Cancelled,
                    error: None,
                });
                self.shared.persist(&id).await;
            }
        }

        let report = self.report(cancelled, started.elapsed());
        tracing::info!(
            status = ?report.status,
            completed = report.completed,
            failed = report.failed,
            cancelled = report.cancelled,
            duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            "run finished"
        );
        self.set_phase(RunPhase::Done);
        report
    }

    fn spawn(&self, in_flight: &mut JoinSet<()>, task: Task) {
        let shared = Arc::clone(&self.shared);
        in_flight.spawn(async move {
            let id = task.id.clone();
            if let Err(panic) = AssertUnwindSafe(shared.execute(task)).catch_unwind().await {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                shared.finish(&id, Err(TaskFailure::Panicked(message))).await;
            }
        });
    }

    fn set_phase(&self, phase: RunPhase) {
        *self.phase.write() = phase;
        self.shared.emit(TaskEvent::PhaseChanged { phase });
    }

    fn report(&self, cancelled: bool, duration: std::time::Duration) -> RunReport {
        let tasks = self.shared.graph.tasks();
        let stats = self.shared.graph.stats();
        let errors: Vec<TaskErrorSummary> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| TaskErrorSummary {
                id: t.id.clone(),
                target: t.target.clone(),
                error: t.error.clone().unwrap_or_default(),
            })
            .collect();
        let pending = stats.total - stats.completed - stats.failed - stats.cancelled;

        let status = if cancelled {
            RunStatus::Cancelled
        } else if stats.failed == 0 && pending == 0 {
            RunStatus::Completed
        } else {
            RunStatus::Partial
        };

        RunReport {
            status,
            total: stats.total,
            completed: stats.completed,
            failed: stats.failed,
            pending,
            cancelled: stats.cancelled,
            errors,
            duration,
        }
    }
}

impl Shared {
    fn emit(&self, event: TaskEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn mark(&self, id: &TaskId, status: TaskStatus) {
        match self.graph.update_status(id, status) {
            Ok(()) => self.emit(TaskEvent::StatusChanged {
                id: id.clone(),
                status,
                error: None,
            }),
            Err(err) => tracing::warn!(task = %id, error = %err, "status update dropped"),
        }
    }

    async fn persist(&self, id: &TaskId) {
        let Some(task) = self.graph.get(id) else {
            return;
        };
        if let Err(err) = self.store.update_task(&task).await {
            tracing::warn!(task = %id, error = %err, "failed to persist task");
        }
    }

    async fn persist_new(&self, id: &TaskId) {
        let Some(task) = self.graph.get(id) else {
            return;
        };
        if let Err(err) = self.store.create_task(&task).await {
            tracing::warn!(task = %id, error = %err, "failed to persist new task");
        }
    }

    #[tracing::instrument(skip_all, fields(task = %task.id, tier = ?task.tier))]
    async fn execute(&self, task: Task) {
        self.persist(&task.id).await;
        let outcome = if task.tier.is_leaf() {
            self.execute_leaf(&task).await.map(Outcome::Completed)
        } else {
            self.execute_composite(&task).await
        };
        self.finish(&task.id, outcome).await;
    }

    async fn finish(&self, id: &TaskId, outcome: Result<Outcome, TaskFailure>) {
        let settled = match outcome {
            Ok(Outcome::Completed(result)) => self
                .graph
                .set_result(id, result)
                .and_then(|()| self.graph.update_status(id, TaskStatus::Completed))
                .map(|()| (TaskStatus::Completed, None)),
            Ok(Outcome::Deferred) => self
                .graph
                .update_status(id, TaskStatus::Pending)
                .map(|()| (TaskStatus::Pending, None)),
            Err(failure) => {
                let message = failure.to_string();
                tracing::warn!(task = %id, error = %message, "task failed");
                self.graph
                    .set_error(id, message.clone())
                    .map(|()| (TaskStatus::Failed, Some(message)))
            }
        };

        match settled {
            Ok((status, error)) => {
                self.emit(TaskEvent::StatusChanged {
                    id: id.clone(),
                    status,
                    error,
                });
                self.persist(id).await;
            }
            Err(err) => tracing::error!(task = %id, error = %err, "task outcome dropped"),
        }
    }

    async fn resolve_deadlock(&self) {
        let blocked = self.graph.blocked();
        if blocked.is_empty() {
            return;
        }
        tracing::warn!(
            blocked = blocked.len(),
            cycles = ?self.graph.detect_cycles(),
            "no runnable tasks remain, failing blocked tasks"
        );
        let failed = self.graph.fail_blocked(DEADLOCK_REASON);
        for id in &failed {
            self.emit(TaskEvent::StatusChanged {
                id: id.clone(),
                status: TaskStatus::Failed,
                error: Some(DEADLOCK_REASON.to_string()),
            });
            self.persist(id).await;
        }
        self.emit(TaskEvent::Deadlock { failed });
    }

    async fn execute_leaf(&self, task: &Task) -> Result<Value, TaskFailure> {
        let (file, symbol) = task.target_parts();
        let path = self.config.project_root.join(file);
        let scope = self
            .config
            .cache_scope
            .clone()
            .unwrap_or_else(|| task.kind.as_str().to_string());

        if let Some(cached) = self.cached(task, &path, &scope).await {
            self.emit(TaskEvent::CacheHit {
                id: task.id.clone(),
            });
            self.apply(task, &path, &cached).await?;
            return Ok(cached);
        }

        let request = self.leaf_request(task, file, symbol);
        let completion = self
            .reasoning
            .call_metered(
                request.estimated_cost(),
                || self.service.complete(request.clone()),
                |c| Some(c.total_tokens()),
            )
            .await?;

        tracing::debug!(
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            "reasoning call completed"
        );
        let payload = json!({
            "text": completion.text,
            "input_tokens": completion.input_tokens,
            "output_tokens": completion.output_tokens,
            "finish_reason": completion.finish_reason,
        });

        if let Some(cache) = &self.cache {
            if let Err(err) = cache
                .store(&path, &scope, &task.target, payload.clone())
                .await
            {
                tracing::debug!(error = %err, "result not cached");
            }
        }

        self.apply(task, &path, &payload).await?;
        Ok(payload)
    }

    async fn cached(&self, task: &Task, path: &Path, scope: &str) -> Option<Value> {
        let cache = self.cache.as_ref()?;
        match cache.lookup(path, scope, &task.target).await {
            Ok(hit) => hit.map(|h| h.payload),
            Err(err) => {
                tracing::debug!(error = %err, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    fn leaf_request(&self, task: &Task, file: &str, symbol: Option<&str>) -> CompletionRequest {
        let mut prompt = format!(
            "{} {}\n\n{}\n",
            task.kind.as_str(),
            task.target,
            task.instruction
        );
        if !task.context.is_empty() {
            let _ = write!(prompt, "\nContext:\n{}\n", Value::Object(task.context.clone()));
        }
        if let Some(code) = self.code_context(file, symbol) {
            let _ = write!(prompt, "\nRelated code:\n{code}");
        }

        CompletionRequest {
            messages: vec![Message::system(LEAF_INSTRUCTIONS), Message::user(prompt)],
            max_output_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
            response_format: ResponseFormat::Text,
        }
    }

    fn code_context(&self, file: &str, symbol: Option<&str>) -> Option<String> {
        let graph = self.code_graph.as_ref()?;
        let symbol = symbol.map(|s| s.replace("::", ".")).unwrap_or_default();
        let element = graph.locate(file, &symbol)?;
        graph
            .context_for(&element.id, self.config.context_depth)
            .map(|ctx| ctx.render())
    }

    async fn apply(&self, task: &Task, path: &Path, output: &Value) -> Result<(), TaskFailure> {
        let Some(applier) = &self.applier else {
            return Ok(());
        };

        let backup = match self.undo.as_ref().filter(|_| self.config.rollback_enabled) {
            Some(journal) => Some((journal, journal.backup(path).await?)),
            None => None,
        };

        match applier.apply(task, path, output).await {
            Ok(()) => {
                if let Some((journal, token)) = &backup {
                    if let Err(err) = journal.commit(token).await {
                        tracing::warn!(error = %err, "failed to discard backup");
                    }
                }
                Ok(())
            }
            Err(err) => {
                if let Some((journal, token)) = &backup {
                    match journal.rollback(token).await {
                        Ok(()) => tracing::info!(target = %path.display(), "rolled back after failed apply"),
                        Err(rollback) => tracing::error!(
                            target = %path.display(),
                            error = %rollback,
                            "rollback failed"
                        ),
                    }
                }
                Err(err.into())
            }
        }
    }

    async fn execute_composite(&self, task: &Task) -> Result<Outcome, TaskFailure> {
        if self.config.materialize_child_dependencies && !task.subtasks.is_empty() {
            return Ok(Outcome::Completed(self.summarize(&task.id)));
        }

        let decomposer = self
            .decomposer
            .as_ref()
            .ok_or(TaskFailure::NoDecomposer(task.tier))?;
        let siblings = self.siblings(task);
        let (file, symbol) = task.target_parts();
        let context = DecompositionContext {
            depth: task.tier.depth(),
            max_subtasks: self.config.max_subtasks_per_task,
            code_context: self.code_context(file, symbol),
        };
        let estimated = u64::try_from(task.instruction.len() / 4)
            .unwrap_or(u64::MAX)
            .saturating_add(u64::from(self.config.max_output_tokens));

        let children = self
            .decomposition
            .call(estimated, || decomposer.decompose(task, &siblings, &context))
            .await?;
        self.validate_children(task, &children)?;

        let mut ids = Vec::with_capacity(children.len());
        for mut child in children {
            child.status = TaskStatus::Pending;
            let id = child.id.clone();
            let tier = child.tier;
            self.graph.attach_subtask(&task.id, child)?;
            self.emit(TaskEvent::Registered {
                id: id.clone(),
                parent: Some(task.id.clone()),
                tier,
            });
            self.persist_new(&id).await;
            ids.push(id);
        }
        tracing::info!(subtasks = ids.len(), "task decomposed");

        if self.config.materialize_child_dependencies && !ids.is_empty() {
            for id in ids {
                self.graph.add_dependency(&task.id, id)?;
            }
            return Ok(Outcome::Deferred);
        }
        Ok(Outcome::Completed(self.summarize(&task.id)))
    }

    fn validate_children(&self, task: &Task, children: &[Task]) -> Result<(), TaskFailure> {
        let limit = self.config.max_subtasks_per_task;
        if children.len() > limit {
            return Err(TaskFailure::MalformedDecomposition(format!(
                "{} subtasks exceeds the limit of {limit}",
                children.len()
            )));
        }
        let mut seen = HashSet::new();
        for child in children {
            if child.tier <= task.tier {
                return Err(TaskFailure::MalformedDecomposition(format!(
                    "subtask {} at {:?} tier is not finer than {:?}",
                    child.id, child.tier, task.tier
                )));
            }
            if !seen.insert(&child.id) || self.graph.contains(&child.id) {
                return Err(TaskFailure::MalformedDecomposition(format!(
                    "duplicate subtask id {}",
                    child.id
                )));
            }
        }
        Ok(())
    }

    fn siblings(&self, task: &Task) -> Vec<Task> {
        let Some(parent) = task.parent.as_ref().and_then(|p| self.graph.get(p)) else {
            return Vec::new();
        };
        parent
            .subtasks
            .iter()
            .filter(|id| **id != task.id)
            .filter_map(|id| self.graph.get(id))
            .collect()
    }

    fn summarize(&self, id: &TaskId) -> Value {
        let subtasks = self.graph.get(id).map(|t| t.subtasks).unwrap_or_default();
        let statuses: Vec<Value> = subtasks
            .iter()
            .filter_map(|child| self.graph.get(child))
            .map(|child| json!({ "id": child.id, "status": child.status }))
            .collect();
        json!({ "subtasks": statuses })
    }
}
