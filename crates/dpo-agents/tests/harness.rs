//! Harness behaviour: input resolution, cache reuse, retry policy

use async_trait::async_trait;
use dpo_agents::collaborators::{InMemoryTabular, PlainTextExtractor, TabularData};
use dpo_agents::{
    Agent, AgentConfig, AgentError, AgentHarness, AgentKind, CollaboratorError, Collaborators, EtlAgent, TaskInput,
};
use dpo_cache::CacheManager;
use dpo_sandbox::{PolicyViolation, SandboxError};
use dpo_types::{InputRef, Scalar, Table, Task, TaskKind, Value};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fails the first `failures` calls with `error`, then echoes the row count
struct Flaky {
    calls: AtomicUsize,
    failures: usize,
    error: AgentError,
}

impl Flaky {
    fn new(failures: usize, error: AgentError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failures,
            error,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for Flaky {
    fn kind(&self) -> AgentKind {
        AgentKind::Profiling
    }

    fn supports(&self, kind: TaskKind) -> bool {
        kind == TaskKind::Profile
    }

    async fn run(&self, _task: &Task, input: &TaskInput) -> Result<Value, AgentError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(self.error.clone());
        }
        Ok(Value::Int(input.table()?.row_count() as i64))
    }
}

fn sales() -> Table {
    Table::from_rows(
        ["region", "sales"],
        vec![
            vec![Scalar::from("north"), Scalar::Int(1)],
            vec![Scalar::from("south"), Scalar::Int(2)],
        ],
    )
    .unwrap()
}

fn collaborators() -> Collaborators {
    Collaborators::in_memory()
        .with_tabular(Arc::new(InMemoryTabular::new().with_table("sales", sales())))
        .with_documents(Arc::new(
            PlainTextExtractor::new().with_document("memo", "a|b\n1|2\n3|4\n5|6"),
        ))
}

fn harness(agent: Arc<dyn Agent>) -> AgentHarness {
    AgentHarness::new(
        agent,
        collaborators(),
        CacheManager::in_memory(100, Duration::from_secs(60)),
        AgentConfig::default().with_backoff(Duration::from_millis(1)),
    )
}

fn profile(input: InputRef) -> Task {
    Task::new("p", TaskKind::Profile).with_input(input)
}

#[tokio::test]
async fn retries_a_transient_failure_once() {
    let agent = Flaky::new(1, CollaboratorError::DataAccess("blip".into()).into());
    let out = harness(agent.clone())
        .execute(&profile(InputRef::Dataset("sales".into())), BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(out.value, Value::Int(2));
    assert_eq!(agent.calls(), 2);
}

#[tokio::test]
async fn gives_up_after_the_retry() {
    let agent = Flaky::new(5, SandboxError::Timeout { elapsed_ms: 5 }.into());
    let err = harness(agent.clone())
        .execute(&profile(InputRef::Dataset("sales".into())), BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Sandbox(SandboxError::Timeout { .. })));
    assert_eq!(agent.calls(), 2);
}

#[tokio::test]
async fn never_retries_policy_violations() {
    let agent = Flaky::new(5, PolicyViolation::ForbiddenModule { module: "os".into() }.into());
    let err = harness(agent.clone())
        .execute(&profile(InputRef::Dataset("sales".into())), BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Policy(_)));
    assert_eq!(agent.calls(), 1);
}

#[tokio::test]
async fn second_run_is_served_from_cache() {
    let agent = Flaky::new(0, AgentError::invalid("unused"));
    let harness = harness(agent.clone());
    let task = profile(InputRef::Dataset("sales".into()));

    let first = harness.execute(&task, BTreeMap::new()).await.unwrap();
    let second = harness.execute(&task, BTreeMap::new()).await.unwrap();
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.value, second.value);
    assert_eq!(agent.calls(), 1);
}

#[tokio::test]
async fn dependency_output_becomes_primary_input() {
    let agent = Flaky::new(0, AgentError::invalid("unused"));
    let task = Task::new("p", TaskKind::Profile).depends_on("t1");
    let deps = BTreeMap::from([("t1".to_string(), Value::Table(sales().head(1)))]);
    let out = harness(agent).execute(&task, deps).await.unwrap();
    assert_eq!(out.value, Value::Int(1));
}

#[tokio::test]
async fn documents_resolve_to_their_first_table() {
    let agent = Flaky::new(0, AgentError::invalid("unused"));
    let out = harness(agent)
        .execute(&profile(InputRef::Document("memo".into())), BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(out.value, Value::Int(3));
}

#[tokio::test]
async fn unknown_dataset_fails_after_retry() {
    let agent = Flaky::new(0, AgentError::invalid("unused"));
    let err = harness(agent.clone())
        .execute(&profile(InputRef::Dataset("nope".into())), BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Collaborator(CollaboratorError::DataAccess(_))));
    assert_eq!(agent.calls(), 0);
}

#[tokio::test]
async fn join_partner_content_is_part_of_the_cache_key() {
    let managers = |name: &str| {
        Table::from_rows(
            ["region", "manager"],
            vec![
                vec![Scalar::from("north"), Scalar::from(name)],
                vec![Scalar::from("south"), Scalar::from(name)],
            ],
        )
        .unwrap()
    };
    let tabular = Arc::new(
        InMemoryTabular::new()
            .with_table("sales", sales())
            .with_table("regions", managers("ana")),
    );
    let collaborators = Collaborators::in_memory().with_tabular(tabular.clone());
    let harness = AgentHarness::new(
        Arc::new(EtlAgent::new(Arc::clone(&collaborators.storage))),
        collaborators,
        CacheManager::in_memory(100, Duration::from_secs(60)),
        AgentConfig::default(),
    );
    let join = Task::new("j", TaskKind::Transform)
        .with_input(InputRef::Dataset("sales".into()))
        .with_param("op", "join")
        .with_param("with", "regions")
        .with_param("on", "region");
    let manager = |value: &Value| {
        let table = value.as_table().unwrap();
        table.column("manager").unwrap()[0].clone()
    };

    let first = harness.execute(&join, BTreeMap::new()).await.unwrap();
    assert!(!first.cache_hit);
    assert_eq!(manager(&first.value), Scalar::from("ana"));

    tabular.register("regions", managers("zed")).await.unwrap();
    let second = harness.execute(&join, BTreeMap::new()).await.unwrap();
    assert!(!second.cache_hit);
    assert_eq!(manager(&second.value), Scalar::from("zed"));

    let third = harness.execute(&join, BTreeMap::new()).await.unwrap();
    assert!(third.cache_hit);
}
