//! Hierarchical decomposition of non-leaf tasks

use pretty_assertions::assert_eq;
use std::sync::Arc;
use strata_core::{
    Orchestrator, OrchestratorConfig, RunStatus, Task, TaskId, TaskStatus, Tier, DEADLOCK_REASON,
};
use strata_resilience::ServiceError;
use strata_test_utils::{
    composite, leaf, leaf_after, test_config, ScriptedDecomposer, ScriptedReasoningService,
};

fn build(
    config: OrchestratorConfig,
    service: &Arc<ScriptedReasoningService>,
    decomposer: &Arc<ScriptedDecomposer>,
) -> Orchestrator {
    Orchestrator::builder(config, service.clone())
        .with_decomposer(decomposer.clone())
        .build()
        .unwrap()
}

fn get(orch: &Orchestrator, id: &str) -> Task {
    orch.graph().get(&TaskId::from(id)).unwrap()
}

fn module_plan() -> ScriptedDecomposer {
    ScriptedDecomposer::new().with_plan(
        "R",
        vec![
            leaf("C1", "app.py::load"),
            leaf_after("C2", "app.py::save", &["C1"]),
        ],
    )
}

#[tokio::test]
async fn children_join_the_graph_and_run() {
    let service = Arc::new(ScriptedReasoningService::new());
    let decomposer = Arc::new(module_plan());
    let orch = build(test_config(2), &service, &decomposer);

    let report = orch
        .execute(composite("R", Tier::Module, "app.py"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!((report.total, report.completed), (3, 3));
    assert_eq!(service.calls(), 2);

    let root = get(&orch, "R");
    assert_eq!(root.subtasks, vec![TaskId::from("C1"), TaskId::from("C2")]);
    assert_eq!(root.result.unwrap()["subtasks"].as_array().unwrap().len(), 2);
    assert_eq!(get(&orch, "C1").parent, Some(TaskId::from("R")));
    assert_eq!(decomposer.calls(), vec![(TaskId::from("R"), 0)]);

    let prompts = service.prompts();
    assert!(prompts[0].contains("update C1"));
}

#[tokio::test]
async fn nested_decomposition_sees_siblings() {
    let service = Arc::new(ScriptedReasoningService::new());
    let decomposer = Arc::new(
        ScriptedDecomposer::new()
            .with_plan(
                "R",
                vec![
                    composite("S1", Tier::Subsystem, "storage"),
                    composite("S2", Tier::Subsystem, "api"),
                ],
            )
            .with_plan("S1", vec![leaf("L1", "storage/db.py::open")])
            .with_plan("S2", vec![leaf("L2", "api/routes.py::index")]),
    );
    let orch = build(test_config(4), &service, &decomposer);

    let report = orch
        .execute(composite("R", Tier::System, "."))
        .await
        .unwrap();

    assert_eq!(report.completed, 5);
    let mut calls = decomposer.calls();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            (TaskId::from("R"), 0),
            (TaskId::from("S1"), 1),
            (TaskId::from("S2"), 1),
        ]
    );
    assert_eq!(get(&orch, "L2").parent, Some(TaskId::from("S2")));
}

#[tokio::test]
async fn materialized_parent_completes_after_children() {
    let service = Arc::new(ScriptedReasoningService::new());
    let decomposer = Arc::new(module_plan());
    let orch = build(
        test_config(2).with_materialized_children(true),
        &service,
        &decomposer,
    );

    let report = orch
        .execute(composite("R", Tier::Module, "app.py"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    let root = get(&orch, "R");
    let last_child = get(&orch, "C2");
    assert!(root.completed_at.unwrap() >= last_child.completed_at.unwrap());
    assert!(root.dependencies.contains(&TaskId::from("C1")));

    let statuses: Vec<&str> = root.result.as_ref().unwrap()["subtasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["completed", "completed"]);
    // decomposed once even though it was dispatched twice
    assert_eq!(decomposer.calls().len(), 1);
}

#[tokio::test]
async fn materialized_parent_of_failed_child_fails() {
    let service = Arc::new(ScriptedReasoningService::new());
    service.fail_when_prompt_contains("update C1", ServiceError::invalid("rejected"));
    let decomposer = Arc::new(module_plan());
    let orch = build(
        test_config(2).with_materialized_children(true),
        &service,
        &decomposer,
    );

    let report = orch
        .execute(composite("R", Tier::Module, "app.py"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.failed, 3);
    assert_eq!(get(&orch, "R").error.as_deref(), Some(DEADLOCK_REASON));
}

#[tokio::test]
async fn oversized_plan_is_malformed() {
    let service = Arc::new(ScriptedReasoningService::new());
    let decomposer = Arc::new(module_plan());
    let orch = build(test_config(2).with_max_subtasks(1), &service, &decomposer);

    let report = orch
        .execute(composite("R", Tier::Module, "app.py"))
        .await
        .unwrap();

    assert_eq!((report.total, report.failed), (1, 1));
    let error = get(&orch, "R").error.unwrap();
    assert!(error.contains("malformed decomposition output"));
    assert!(error.contains("limit of 1"));
}

#[tokio::test]
async fn children_must_be_finer_than_parent() {
    let service = Arc::new(ScriptedReasoningService::new());
    let decomposer = Arc::new(
        ScriptedDecomposer::new()
            .with_plan("R", vec![composite("same", Tier::Module, "other.py")]),
    );
    let orch = build(test_config(1), &service, &decomposer);

    orch.execute(composite("R", Tier::Module, "app.py"))
        .await
        .unwrap();

    assert_eq!(get(&orch, "R").status, TaskStatus::Failed);
    assert!(!orch.graph().contains(&TaskId::from("same")));
}

#[tokio::test]
async fn decomposition_errors_fail_the_parent() {
    let service = Arc::new(ScriptedReasoningService::new());
    let decomposer = Arc::new(
        ScriptedDecomposer::new().failing_for("R", ServiceError::malformed("not a task list")),
    );
    let orch = build(test_config(1), &service, &decomposer);

    let report = orch
        .execute(composite("R", Tier::Module, "app.py"))
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert!(report.errors[0].error.contains("not a task list"));
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn composite_without_decomposer_fails() {
    let service = Arc::new(ScriptedReasoningService::new());
    let orch = Orchestrator::builder(test_config(1), service.clone())
        .build()
        .unwrap();

    let report = orch
        .execute(composite("R", Tier::Class, "app.py::User"))
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert!(report.errors[0].error.contains("no decomposer"));
}
