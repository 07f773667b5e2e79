//! End-to-end orchestration: planning, execution order, failure isolation,
//! cancellation and session recording

use dpo_agents::{AgentConfig, AgentError, AgentKind, CollaboratorError};
use dpo_core::{
    DpoConfig, KeywordPlanner, ModelPlanner, Orchestrator, OrchestratorError, Planner, PlanningError,
    ACTIVE_DATASET, CANCELLED_NOTE,
};
use dpo_memory::{RecordStatus, SessionContext};
use dpo_test_utils::{sample_collaborators, Behaviour, RecordingAgent, ScriptedAgent, StubModel};
use dpo_types::{
    ErrorClass, InputRef, PlannedStep, SessionId, Task, TaskId, TaskKind, TaskStatus, Value, Workflow,
    WorkflowStatus,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn config() -> DpoConfig {
    DpoConfig::default().with_agents(AgentConfig::default().with_backoff(Duration::from_millis(1)))
}

fn orchestrator() -> Orchestrator {
    Orchestrator::from_config(config(), sample_collaborators()).unwrap()
}

fn session() -> SessionId {
    SessionId::new("test-session")
}

fn workflow(tasks: Vec<Task>) -> Workflow {
    tasks
        .into_iter()
        .fold(Workflow::new(session(), "handwritten"), Workflow::with_task)
}

fn sales() -> InputRef {
    InputRef::Dataset("sales".into())
}

fn status_of(result: &dpo_types::WorkflowResult, id: &str) -> TaskStatus {
    result.result(&TaskId::new(id)).map(|r| r.status()).unwrap()
}

#[tokio::test]
async fn plans_and_runs_a_chain() {
    let orchestrator = orchestrator();
    let result = orchestrator
        .handle_request(&session(), "load sales then filter where amount > 100 then sum of amount by region")
        .await
        .unwrap();

    assert_eq!(result.status, WorkflowStatus::Succeeded);
    assert_eq!(result.results.len(), 3);
    let ids: Vec<&str> = result.results.iter().map(|r| r.task_id().as_str()).collect();
    assert_eq!(ids, vec!["t1", "t2", "t3"]);
    let table = result.final_output().and_then(Value::as_table).unwrap();
    assert_eq!(table.row_count(), 2);
}

#[tokio::test]
async fn failed_task_only_skips_its_dependents() {
    let wf = workflow(vec![
        Task::new("good", TaskKind::Extract).with_input(sales()),
        Task::new("bad", TaskKind::Extract).with_input(InputRef::Dataset("missing".into())),
        Task::new("profile", TaskKind::Profile).depends_on("good"),
        Task::new("after-bad", TaskKind::Transform)
            .depends_on("bad")
            .with_param("op", "head"),
    ]);
    let result = orchestrator().run(&wf).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(status_of(&result, "good"), TaskStatus::Success);
    assert_eq!(status_of(&result, "profile"), TaskStatus::Success);
    let bad = result.result(&TaskId::new("bad")).unwrap();
    assert_eq!(bad.error().map(|e| e.class), Some(ErrorClass::DataAccess));
    let skipped = result.result(&TaskId::new("after-bad")).unwrap();
    assert_eq!(skipped.status(), TaskStatus::Skipped);
    assert!(skipped.note().unwrap().contains("bad"));
}

#[tokio::test]
async fn optional_failure_does_not_fail_the_workflow() {
    let wf = workflow(vec![
        Task::new("enrich", TaskKind::Extract)
            .with_input(InputRef::Dataset("missing".into()))
            .optional(true),
        Task::new("profile", TaskKind::Profile).with_input(sales()),
    ]);
    let result = orchestrator().run(&wf).await.unwrap();
    assert_eq!(result.status, WorkflowStatus::Succeeded);
    assert_eq!(result.failed().count(), 1);
}

#[tokio::test]
async fn dependents_see_every_dependency_output() {
    let wf = workflow(vec![
        Task::new("t1", TaskKind::Extract).with_input(sales()),
        Task::new("t2", TaskKind::Transform)
            .depends_on("t1")
            .with_param("op", "filter")
            .with_param("column", "amount")
            .with_param("operator", ">")
            .with_param("value", 100_i64),
        Task::new("t3", TaskKind::Transform)
            .depends_on("t1")
            .with_param("op", "head")
            .with_param("n", 2_i64),
        Task::new("t4", TaskKind::CustomCode)
            .depends_on("t2")
            .depends_on("t3")
            .with_param("code", "import table\ntable.rows(t2) + table.rows(t3)")
            .with_param("imports", "table"),
    ]);
    let result = orchestrator().run(&wf).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Succeeded);
    let ids: Vec<&str> = result.results.iter().map(|r| r.task_id().as_str()).collect();
    assert_eq!(ids, vec!["t1", "t2", "t3", "t4"]);
    assert_eq!(result.final_output().and_then(Value::as_f64), Some(5.0));
}

#[tokio::test]
async fn invalid_workflow_is_rejected_before_running() {
    let wf = workflow(vec![
        Task::new("a", TaskKind::Transform).depends_on("b"),
        Task::new("b", TaskKind::Transform).depends_on("a"),
    ]);
    let err = orchestrator().run(&wf).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidWorkflow(_)));
}

#[tokio::test]
async fn agent_panic_becomes_a_failed_result() {
    let orchestrator = Orchestrator::builder()
        .with_config(config())
        .with_collaborators(sample_collaborators())
        .with_agent(ScriptedAgent::new(AgentKind::Profiling, Behaviour::Panic))
        .build()
        .unwrap();
    let wf = workflow(vec![
        Task::new("load", TaskKind::Extract).with_input(sales()),
        Task::new("profile", TaskKind::Profile).depends_on("load"),
    ]);
    let result = orchestrator.run(&wf).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(status_of(&result, "load"), TaskStatus::Success);
    let profile = result.result(&TaskId::new("profile")).unwrap();
    assert_eq!(profile.error().map(|e| e.class), Some(ErrorClass::Execution));
}

#[tokio::test]
async fn agent_error_is_reported_with_its_class() {
    let agent = ScriptedAgent::new(
        AgentKind::Profiling,
        Behaviour::Fail(AgentError::invalid("no numeric columns")),
    );
    let orchestrator = Orchestrator::builder()
        .with_config(config())
        .with_collaborators(sample_collaborators())
        .with_agent(agent.clone())
        .build()
        .unwrap();
    let task = Task::new("p", TaskKind::Profile).with_input(sales());
    let result = orchestrator.dispatch(&task, Default::default()).await;

    assert_eq!(result.status(), TaskStatus::Failed);
    assert_eq!(result.error().map(|e| e.class), Some(ErrorClass::InvalidTask));
    assert_eq!(agent.runs(), 1);
}

fn recorded(etl: &Arc<RecordingAgent>, profiling: &Arc<RecordingAgent>) -> Orchestrator {
    Orchestrator::builder()
        .with_config(config())
        .with_collaborators(sample_collaborators())
        .with_agent(etl.clone())
        .with_agent(profiling.clone())
        .build()
        .unwrap()
}

#[tokio::test]
async fn one_failure_leaves_independent_work_alone() {
    let etl = RecordingAgent::new(AgentKind::Etl);
    let profiling = RecordingAgent::new(AgentKind::Profiling);
    let wf = workflow(vec![
        Task::new("a", TaskKind::Extract).with_input(sales()),
        Task::new("b", TaskKind::Transform).depends_on("a").with_param("fail", true),
        Task::new("c", TaskKind::Profile).with_input(sales()),
    ]);
    let result = recorded(&etl, &profiling).run(&wf).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Failed);
    assert_eq!(status_of(&result, "a"), TaskStatus::Success);
    assert_eq!(status_of(&result, "b"), TaskStatus::Failed);
    assert_eq!(status_of(&result, "c"), TaskStatus::Success);
    assert_eq!(result.result(&TaskId::new("c")).and_then(|r| r.output()), Some(&Value::Int(1)));
}

#[tokio::test]
async fn agent_stats_count_each_dispatch() {
    let etl = RecordingAgent::new(AgentKind::Etl);
    let profiling = RecordingAgent::new(AgentKind::Profiling);
    let orchestrator = recorded(&etl, &profiling);
    let wf = workflow(vec![
        Task::new("a", TaskKind::Extract).with_input(sales()),
        Task::new("b", TaskKind::Transform).depends_on("a").with_param("fail", true),
        Task::new("c", TaskKind::Profile).with_input(sales()),
    ]);
    orchestrator.run(&wf).await.unwrap();

    let stats = orchestrator.agent_stats();
    let of = |kind: AgentKind| stats.iter().find(|s| s.agent == kind).unwrap();
    assert_eq!((of(AgentKind::Etl).executions, of(AgentKind::Etl).failures), (2, 1));
    assert_eq!((of(AgentKind::Profiling).executions, of(AgentKind::Profiling).successes), (1, 1));
    assert_eq!(of(AgentKind::Query).executions, 0);
}

#[tokio::test]
async fn no_task_starts_before_its_dependencies_finish() {
    let etl = RecordingAgent::new(AgentKind::Etl);
    let profiling = RecordingAgent::new(AgentKind::Profiling);
    let wf = workflow(vec![
        Task::new("t1", TaskKind::Extract).with_param("sleep_ms", 30i64),
        Task::new("t2", TaskKind::Transform).depends_on("t1").with_param("sleep_ms", 10i64),
        Task::new("t3", TaskKind::Profile).depends_on("t1").with_param("sleep_ms", 50i64),
        Task::new("t4", TaskKind::Transform).depends_on("t2").depends_on("t3"),
        Task::new("t5", TaskKind::Extract).with_param("sleep_ms", 5i64),
        Task::new("t6", TaskKind::Profile).depends_on("t5").depends_on("t2"),
    ]);
    let result = recorded(&etl, &profiling).run(&wf).await.unwrap();
    assert_eq!(result.status, WorkflowStatus::Succeeded);

    let event = |id: &str| etl.event(id).or_else(|| profiling.event(id)).unwrap();
    for task in &wf.tasks {
        let started = event(task.id.as_str()).started;
        for dep in &task.dependencies {
            assert!(
                started >= event(dep.as_str()).finished,
                "{} started before {} finished",
                task.id,
                dep
            );
        }
    }
    assert_eq!(etl.events().len() + profiling.events().len(), 6);
}

#[tokio::test]
async fn ready_task_does_not_wait_for_unrelated_work() {
    let etl = RecordingAgent::new(AgentKind::Etl);
    let profiling = RecordingAgent::new(AgentKind::Profiling);
    let wf = workflow(vec![
        Task::new("a", TaskKind::Profile).with_input(sales()).with_param("sleep_ms", 300i64),
        Task::new("b", TaskKind::Extract).with_input(sales()),
        Task::new("c", TaskKind::Profile).depends_on("b"),
    ]);

    let started = Instant::now();
    let result = recorded(&etl, &profiling).run(&wf).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.status, WorkflowStatus::Succeeded);
    let a = profiling.event("a").unwrap();
    let c = profiling.event("c").unwrap();
    assert!(c.finished < a.finished, "c waited for a");
    assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
}

#[tokio::test]
async fn cancellation_skips_undispatched_tasks() {
    let slow = ScriptedAgent::new(AgentKind::Etl, Behaviour::Sleep(Duration::from_millis(200)));
    let orchestrator = Orchestrator::builder()
        .with_config(config())
        .with_collaborators(sample_collaborators())
        .with_agent(slow.clone())
        .build()
        .unwrap();
    let wf = workflow(vec![
        Task::new("load", TaskKind::Extract).with_input(sales()),
        Task::new("clean", TaskKind::Transform).depends_on("load"),
    ]);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let result = orchestrator.run_with_cancel(&wf, cancel).await.unwrap();

    assert_eq!(result.status, WorkflowStatus::Cancelled);
    assert_eq!(status_of(&result, "load"), TaskStatus::Success);
    let clean = result.result(&TaskId::new("clean")).unwrap();
    assert_eq!(clean.note(), Some(CANCELLED_NOTE));
    assert_eq!(slow.runs(), 1);
}

#[tokio::test]
async fn pre_cancelled_run_dispatches_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let wf = workflow(vec![Task::new("load", TaskKind::Extract).with_input(sales())]);
    let result = orchestrator().run_with_cancel(&wf, cancel).await.unwrap();
    assert_eq!(result.status, WorkflowStatus::Cancelled);
    assert_eq!(result.skipped().count(), 1);
}

#[tokio::test]
async fn worker_pool_bounds_concurrency() {
    let slow = ScriptedAgent::new(AgentKind::Profiling, Behaviour::Sleep(Duration::from_millis(100)));
    let orchestrator = Orchestrator::builder()
        .with_config(config().with_max_workers(2))
        .with_collaborators(sample_collaborators())
        .with_agent(slow)
        .build()
        .unwrap();
    let wf = workflow(
        (0..4)
            .map(|i| Task::new(format!("p{i}"), TaskKind::Profile).with_input(sales()))
            .collect(),
    );

    let started = Instant::now();
    let result = orchestrator.run(&wf).await.unwrap();
    assert_eq!(result.status, WorkflowStatus::Succeeded);
    assert!(started.elapsed() >= Duration::from_millis(190));
}

#[tokio::test]
async fn repeated_work_is_served_from_cache() {
    let orchestrator = orchestrator();
    let wf = workflow(vec![
        Task::new("load", TaskKind::Extract).with_input(sales()),
        Task::new("profile", TaskKind::Profile).depends_on("load"),
    ]);
    let first = orchestrator.run(&wf).await.unwrap();
    let second = orchestrator.run(&wf).await.unwrap();

    let hit = |r: &dpo_types::WorkflowResult| r.result(&TaskId::new("profile")).map(|t| t.cache_hit());
    assert_eq!(hit(&first), Some(false));
    assert_eq!(hit(&second), Some(true));
    assert_eq!(first.final_output(), second.final_output());
}

#[tokio::test]
async fn unplannable_request_becomes_custom_code() {
    let orchestrator = orchestrator();
    let context = SessionContext::empty(session());
    let wf = orchestrator.plan("hello there", &context).await.unwrap();

    assert_eq!(wf.len(), 1);
    assert_eq!(wf.tasks[0].kind, TaskKind::CustomCode);
    assert_eq!(wf.tasks[0].param_str("question"), Some("hello there"));
    assert_eq!(wf.tasks[0].input, InputRef::None);
}

#[tokio::test]
async fn blank_request_is_a_planning_error() {
    let orchestrator = orchestrator();
    let err = orchestrator.handle_request(&session(), "   ").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Planning(PlanningError::EmptyRequest)));

    let log = orchestrator
        .memory()
        .execution_log(&session(), Some(RecordStatus::Error), None);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].operation, "plan");
}

#[tokio::test]
async fn requests_are_remembered_across_turns() {
    let orchestrator = orchestrator();
    orchestrator
        .handle_request(&session(), "load sales then profile it")
        .await
        .unwrap();

    let context = orchestrator.memory().get_context(&session());
    assert_eq!(context.turns.len(), 1);
    assert_eq!(context.turns[0].prompt, "load sales then profile it");
    assert_eq!(context.scratch_str(ACTIVE_DATASET), Some("sales"));
    let log = orchestrator.memory().execution_log(&session(), None, None);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].operation, "workflow");
    assert_eq!(log[0].status, RecordStatus::Success);

    // the follow-up names no dataset and picks up the active one
    let wf = orchestrator.plan("profile it again", &context).await.unwrap();
    assert_eq!(wf.tasks[0].input, sales());
    assert_eq!(wf.tasks[1].kind, TaskKind::Profile);
}

#[tokio::test]
async fn export_writes_the_result_to_storage() {
    let orchestrator = orchestrator();
    let wf = workflow(vec![Task::new("load", TaskKind::Extract).with_input(sales())]);
    let result = orchestrator.run(&wf).await.unwrap();
    orchestrator.export(&result, "runs/latest").await.unwrap();

    let stored = orchestrator
        .collaborators()
        .storage
        .get("runs/latest")
        .await
        .unwrap()
        .unwrap();
    let Value::Map(map) = stored else {
        panic!("exported result should be a map");
    };
    assert_eq!(map.get("status"), Some(&Value::Str("succeeded".into())));
}

#[tokio::test]
async fn model_planner_degrades_to_keywords() {
    let model = StubModel::unavailable();
    let planner = ModelPlanner::new(model.clone());
    let context = SessionContext::empty(session());
    let datasets = vec!["sales".to_string()];

    let steps = planner.plan("load sales then profile it", &context, &datasets).await.unwrap();
    let expected = KeywordPlanner
        .plan("load sales then profile it", &context, &datasets)
        .await
        .unwrap();
    assert_eq!(steps, expected);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn model_plan_is_used_when_valid() {
    let plan = vec![
        PlannedStep::new(TaskKind::Extract).with_input(sales()),
        PlannedStep::new(TaskKind::Profile).after(0),
    ];
    let orchestrator = Orchestrator::builder()
        .with_config(config())
        .with_collaborators(sample_collaborators())
        .with_planner(Arc::new(ModelPlanner::new(StubModel::plan(plan))))
        .build()
        .unwrap();

    let result = orchestrator
        .handle_request(&session(), "tell me about my sales")
        .await
        .unwrap();
    assert_eq!(result.status, WorkflowStatus::Succeeded);
    assert_eq!(result.results.len(), 2);
}

#[tokio::test]
async fn model_errors_other_than_unavailable_still_fall_back() {
    let model = StubModel::answering(Err(CollaboratorError::malformed("stub", "not json")));
    let planner = ModelPlanner::new(model);
    let steps = planner
        .plan("profile sales", &SessionContext::empty(session()), &["sales".to_string()])
        .await
        .unwrap();
    assert_eq!(steps.last().map(|s| s.kind), Some(TaskKind::Profile));
}
