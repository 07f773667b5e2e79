//! Testing utilities for the DPO workspace
//!
//! Shared fixtures: sample tables, preloaded collaborators and agents that
//! misbehave on purpose.

#![allow(missing_docs)]

use async_trait::async_trait;
use dpo_agents::collaborators::{
    CollaboratorError, InMemoryTabular, Inference, InferTarget, PlainTextExtractor, TextUnderstanding,
};
use dpo_agents::{Agent, AgentError, AgentKind, Collaborators, TaskInput};
use dpo_sandbox::CodeSnippet;
use dpo_types::{PlannedStep, Scalar, Table, Task, TaskKind, Value};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Five sales rows; `amount` is missing for the east region
pub fn sales_table() -> Table {
    Table::from_rows(
        ["region", "product", "amount", "units"],
        vec![
            vec!["north".into(), "widget".into(), Scalar::Int(120), Scalar::Int(3)],
            vec!["south".into(), "widget".into(), Scalar::Int(80), Scalar::Int(2)],
            vec!["north".into(), "gadget".into(), Scalar::Int(200), Scalar::Int(5)],
            vec!["east".into(), "gadget".into(), Scalar::Null, Scalar::Int(1)],
            vec!["south".into(), "gizmo".into(), Scalar::Int(150), Scalar::Int(4)],
        ],
    )
    .unwrap()
}

pub fn regions_table() -> Table {
    Table::from_rows(
        ["region", "manager"],
        vec![
            vec![Scalar::from("north"), Scalar::from("ana")],
            vec![Scalar::from("south"), Scalar::from("bo")],
            vec![Scalar::from("east"), Scalar::from("cy")],
        ],
    )
    .unwrap()
}

pub const MEMO: &str = "Quarterly memo, 2024-03-31. Revenue grew 12% to $1,200.\n\
\n\
region|target\n\
north|300\n\
south|250\n";

/// In-memory collaborators holding `sales`, `regions` and the `memo` document
pub fn sample_collaborators() -> Collaborators {
    Collaborators::in_memory()
        .with_tabular(Arc::new(
            InMemoryTabular::new()
                .with_table("sales", sales_table())
                .with_table("regions", regions_table()),
        ))
        .with_documents(Arc::new(PlainTextExtractor::new().with_document("memo", MEMO)))
}

/// Model that answers every call the same way and counts calls
pub struct StubModel {
    answer: Result<Inference, CollaboratorError>,
    calls: AtomicUsize,
}

impl StubModel {
    pub fn snippet(source: &str) -> Arc<Self> {
        Self::answering(Ok(Inference::Snippet(CodeSnippet::new(source))))
    }

    pub fn plan(steps: Vec<PlannedStep>) -> Arc<Self> {
        Self::answering(Ok(Inference::Plan(steps)))
    }

    pub fn unavailable() -> Arc<Self> {
        Self::answering(Err(CollaboratorError::unavailable("stub", "connection refused")))
    }

    pub fn answering(answer: Result<Inference, CollaboratorError>) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextUnderstanding for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn infer(&self, _prompt: &str, _hint: &str, _target: InferTarget) -> Result<Inference, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

/// What a [`ScriptedAgent`] does when run
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Return this value
    Return(Value),
    /// Fail with this error
    Fail(AgentError),
    /// Panic
    Panic,
    /// Sleep, then return the row count of the input table (or 0)
    Sleep(Duration),
}

/// Agent standing in for a real one of the given kind
pub struct ScriptedAgent {
    kind: AgentKind,
    behaviour: Behaviour,
    runs: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(kind: AgentKind, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behaviour,
            runs: AtomicUsize::new(0),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn supports(&self, _kind: TaskKind) -> bool {
        true
    }

    async fn run(&self, _task: &Task, input: &TaskInput) -> Result<Value, AgentError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Return(value) => Ok(value.clone()),
            Behaviour::Fail(err) => Err(err.clone()),
            Behaviour::Panic => panic!("scripted agent panic"),
            Behaviour::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                let rows = input.primary.primary_table().map_or(0, Table::row_count);
                Ok(Value::Int(rows as i64))
            }
        }
    }

    fn cacheable(&self, _task: &Task) -> bool {
        false
    }
}

/// One task run seen by a [`RecordingAgent`]
#[derive(Debug, Clone)]
pub struct RunEvent {
    pub task_id: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Agent that takes its instructions from task params and records when each
/// task started and finished
///
/// `sleep_ms` delays the task, `fail = true` makes it fail with
/// [`AgentError::InvalidTask`]. Successful runs return `1`.
pub struct RecordingAgent {
    kind: AgentKind,
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingAgent {
    pub fn new(kind: AgentKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            events: Mutex::new(Vec::new()),
        })
    }

    /// Finished runs, in completion order
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    pub fn event(&self, task_id: &str) -> Option<RunEvent> {
        self.events.lock().iter().find(|e| e.task_id == task_id).cloned()
    }
}

#[async_trait]
impl Agent for RecordingAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn supports(&self, _kind: TaskKind) -> bool {
        true
    }

    async fn run(&self, task: &Task, _input: &TaskInput) -> Result<Value, AgentError> {
        let started = Instant::now();
        if let Some(Scalar::Int(ms)) = task.param("sleep_ms") {
            tokio::time::sleep(Duration::from_millis(u64::try_from(*ms).unwrap_or(0))).await;
        }
        self.events.lock().push(RunEvent {
            task_id: task.id.to_string(),
            started,
            finished: Instant::now(),
        });
        if task.param("fail").and_then(Scalar::as_bool) == Some(true) {
            return Err(AgentError::invalid(format!("{} told to fail", task.id)));
        }
        Ok(Value::Int(1))
    }

    fn cacheable(&self, _task: &Task) -> bool {
        false
    }
}
