//! Dispatch order, parallelism bounds, deadlock handling and cancellation

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{
    InMemoryTaskStore, Orchestrator, OrchestratorConfig, OrchestratorError, RunPhase, RunStatus,
    TaskEvent, TaskId, TaskStatus, TaskStore, DEADLOCK_REASON,
};
use strata_resilience::ServiceError;
use strata_test_utils::{leaf, leaf_after, test_config, ScriptedReasoningService};

fn orchestrator(config: OrchestratorConfig, service: &Arc<ScriptedReasoningService>) -> Orchestrator {
    Orchestrator::builder(config, service.clone()).build().unwrap()
}

fn status(orch: &Orchestrator, id: &str) -> TaskStatus {
    orch.graph().get(&TaskId::from(id)).unwrap().status
}

#[tokio::test(start_paused = true)]
async fn dependents_wait_then_run_in_parallel() {
    let service = Arc::new(ScriptedReasoningService::new().with_latency(Duration::from_millis(50)));
    let orch = orchestrator(test_config(2), &service);

    orch.submit(leaf("A", "src/a.py")).await.unwrap();
    orch.submit(leaf_after("B", "src/b.py", &["A"])).await.unwrap();
    orch.submit(leaf_after("C", "src/c.py", &["A"])).await.unwrap();

    let report = orch.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!((report.total, report.completed, report.failed), (3, 3, 0));
    assert!(report.errors.is_empty());
    assert_eq!(service.max_concurrency(), 2);

    let prompts = service.prompts();
    assert!(prompts[0].contains("update A"));

    let a = orch.graph().get(&"A".into()).unwrap();
    for dependent in ["B", "C"] {
        let t = orch.graph().get(&dependent.into()).unwrap();
        assert!(t.started_at.unwrap() >= a.completed_at.unwrap());
    }
}

#[tokio::test(start_paused = true)]
async fn pool_size_bounds_concurrency() {
    let service = Arc::new(ScriptedReasoningService::new().with_latency(Duration::from_millis(20)));
    let orch = orchestrator(test_config(2), &service);
    for i in 0..6 {
        orch.submit(leaf(&format!("T{i}"), &format!("m{i}.py"))).await.unwrap();
    }

    let report = orch.run().await;

    assert_eq!(report.completed, 6);
    assert_eq!(service.calls(), 6);
    assert_eq!(service.max_concurrency(), 2);
}

#[tokio::test]
async fn priority_decides_dispatch_order() {
    let service = Arc::new(ScriptedReasoningService::new());
    let orch = orchestrator(test_config(1), &service);
    orch.submit(leaf("later", "a.py").with_priority(90)).await.unwrap();
    orch.submit(leaf("sooner", "b.py").with_priority(1)).await.unwrap();

    orch.run().await;

    let prompts = service.prompts();
    assert!(prompts[0].contains("update sooner"));
    assert!(prompts[1].contains("update later"));
}

#[tokio::test]
async fn dangling_dependency_does_not_block() {
    let service = Arc::new(ScriptedReasoningService::new());
    let orch = orchestrator(test_config(2), &service);
    orch.submit(leaf_after("A", "a.py", &["X-999"])).await.unwrap();

    let report = orch.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(status(&orch, "A"), TaskStatus::Completed);
}

#[tokio::test]
async fn mutual_dependency_fails_both_with_deadlock_reason() {
    let service = Arc::new(ScriptedReasoningService::new());
    let orch = orchestrator(test_config(2), &service);
    let mut events = orch.subscribe();
    orch.submit(leaf_after("E", "e.py", &["F"])).await.unwrap();
    orch.submit(leaf_after("F", "f.py", &["E"])).await.unwrap();

    let report = orch.run().await;

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.failed, 2);
    assert_eq!(service.calls(), 0);
    for summary in &report.errors {
        assert_eq!(summary.error, DEADLOCK_REASON);
    }
    assert!(orch.graph().is_complete());

    let mut deadlocks = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let TaskEvent::Deadlock { failed } = event {
            deadlocks.push(failed);
        }
    }
    assert_eq!(deadlocks.len(), 1);
    assert_eq!(deadlocks[0].len(), 2);

    // nothing left to fail on a second pass
    let again = orch.run().await;
    assert_eq!(again.failed, 2);
    assert!(orch.graph().fail_blocked(DEADLOCK_REASON).is_empty());
}

#[tokio::test]
async fn failed_dependency_strands_dependents() {
    let service = Arc::new(ScriptedReasoningService::new());
    service.fail_when_prompt_contains("update A", ServiceError::invalid("prompt rejected"));
    let orch = orchestrator(test_config(2), &service);
    orch.submit(leaf("A", "a.py")).await.unwrap();
    orch.submit(leaf_after("B", "b.py", &["A"])).await.unwrap();
    orch.submit(leaf("C", "c.py")).await.unwrap();

    let report = orch.run().await;

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!((report.completed, report.failed), (1, 2));
    let a = orch.graph().get(&"A".into()).unwrap();
    assert!(a.error.unwrap().contains("prompt rejected"));
    let b = orch.graph().get(&"B".into()).unwrap();
    assert_eq!(b.error.as_deref(), Some(DEADLOCK_REASON));
    assert_eq!(status(&orch, "C"), TaskStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried() {
    let service = Arc::new(ScriptedReasoningService::new());
    service.push(Err(ServiceError::transient("connection reset")));
    let orch = orchestrator(test_config(1), &service);
    orch.submit(leaf("A", "a.py")).await.unwrap();

    let report = orch.run().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(service.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn open_breaker_fails_fast_without_calling_service() {
    let mut config = test_config(1);
    config.resilience.breaker.failure_threshold = 1;
    let service = Arc::new(ScriptedReasoningService::new());
    service.fail_when_prompt_contains("update A", ServiceError::invalid("bad"));
    let orch = orchestrator(config, &service);
    orch.submit(leaf("A", "a.py").with_priority(1)).await.unwrap();
    orch.submit(leaf("B", "b.py").with_priority(2)).await.unwrap();

    let report = orch.run().await;

    assert_eq!(report.failed, 2);
    assert_eq!(service.calls(), 1);
    let b = orch.graph().get(&"B".into()).unwrap();
    assert!(b.error.unwrap().contains("circuit open"));

    let health = orch.health();
    let reasoning = health.iter().find(|h| h.name == "reasoning").unwrap();
    assert_eq!(reasoning.state, strata_resilience::CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn cancellation_drains_in_flight_and_cancels_rest() {
    let service = Arc::new(ScriptedReasoningService::new().with_latency(Duration::from_millis(100)));
    let orch = orchestrator(test_config(1), &service);
    for id in ["first", "second", "third"] {
        orch.submit(leaf(id, &format!("{id}.py"))).await.unwrap();
    }

    let token = orch.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
    });
    let report = orch.run().await;

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!((report.completed, report.cancelled), (1, 2));
    assert_eq!(status(&orch, "first"), TaskStatus::Completed);
    assert_eq!(status(&orch, "third"), TaskStatus::Cancelled);
    assert_eq!(service.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn orchestrator_runs_again_after_cancelled_run() {
    let service = Arc::new(ScriptedReasoningService::new().with_latency(Duration::from_millis(100)));
    let orch = orchestrator(test_config(1), &service);
    orch.submit(leaf("first", "first.py")).await.unwrap();
    orch.submit(leaf("second", "second.py")).await.unwrap();

    let stale = orch.cancellation_token();
    let token = stale.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
    });
    assert_eq!(orch.run().await.status, RunStatus::Cancelled);
    assert!(!orch.cancellation_token().is_cancelled());

    orch.submit(leaf("later", "later.py")).await.unwrap();
    let report = orch.run().await;

    assert_eq!(status(&orch, "later"), TaskStatus::Completed);
    assert_eq!(status(&orch, "second"), TaskStatus::Cancelled);
    assert_ne!(report.status, RunStatus::Cancelled);
    assert_eq!((report.completed, report.cancelled), (2, 1));
    assert!(stale.is_cancelled());
    assert_eq!(service.calls(), 2);
}

#[tokio::test]
async fn phases_and_status_events_are_broadcast() {
    let service = Arc::new(ScriptedReasoningService::new());
    let orch = orchestrator(test_config(1), &service);
    let mut events = orch.subscribe();
    orch.submit(leaf("A", "a.py")).await.unwrap();

    orch.run().await;

    let mut phases = Vec::new();
    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            TaskEvent::PhaseChanged { phase } => phases.push(phase),
            TaskEvent::StatusChanged { status, .. } => statuses.push(status),
            _ => {}
        }
    }
    assert_eq!(
        phases,
        vec![RunPhase::Planning, RunPhase::Executing, RunPhase::Finalizing, RunPhase::Done]
    );
    assert_eq!(statuses, vec![TaskStatus::InProgress, TaskStatus::Completed]);
    assert_eq!(orch.phase(), RunPhase::Done);
}

#[tokio::test]
async fn every_status_change_is_persisted() {
    let service = Arc::new(ScriptedReasoningService::new());
    let store = Arc::new(InMemoryTaskStore::new());
    let orch = Orchestrator::builder(test_config(1), service.clone())
        .with_store(store.clone())
        .build()
        .unwrap();
    let id = orch.submit(leaf("A", "a.py")).await.unwrap();

    orch.run().await;

    let stored = store.get_task(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert!(stored.result.is_some());
    let history: Vec<TaskStatus> = store.history(&id).iter().map(|t| t.status).collect();
    assert_eq!(history.first(), Some(&TaskStatus::Pending));
    assert!(history.contains(&TaskStatus::InProgress));
    assert_eq!(history.last(), Some(&TaskStatus::Completed));
}

#[tokio::test]
async fn duplicate_submission_and_bad_config_are_rejected() {
    let service = Arc::new(ScriptedReasoningService::new());
    let orch = orchestrator(test_config(1), &service);
    orch.submit(leaf("A", "a.py")).await.unwrap();
    assert!(matches!(
        orch.submit(leaf("A", "a.py")).await,
        Err(OrchestratorError::Graph(_))
    ));

    let built = Orchestrator::builder(test_config(0), service.clone()).build();
    assert!(matches!(built, Err(OrchestratorError::Config(_))));
}
