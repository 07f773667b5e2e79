//! Workflows, planned steps and aggregated results

use crate::task::{InputRef, Task, TaskId, TaskKind, TaskResult, TaskStatus};
use crate::value::Params;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use ulid::Ulid;

/// Correlation id of one workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(Ulid);

impl WorkflowId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversation session identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random session id
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One step proposed by a planner, before ids are assigned
///
/// `depends_on` holds indices of earlier steps in the same plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub kind: TaskKind,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub input: InputRef,
    #[serde(default)]
    pub depends_on: Vec<usize>,
    #[serde(default)]
    pub optional: bool,
}

impl PlannedStep {
    #[must_use]
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            params: Params::new(),
            input: InputRef::None,
            depends_on: Vec::new(),
            optional: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_input(mut self, input: InputRef) -> Self {
        self.input = input;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    #[inline]
    #[must_use]
    pub fn after(mut self, index: usize) -> Self {
        if !self.depends_on.contains(&index) {
            self.depends_on.push(index);
        }
        self
    }
}

/// Ordered collection of tasks produced from one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub session_id: SessionId,
    pub request: String,
    pub tasks: Vec<Task>,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    #[must_use]
    pub fn new(session_id: SessionId, request: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(),
            session_id,
            request: request.into(),
            tasks: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    #[must_use]
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Overall outcome of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkflowStatus::Succeeded => "succeeded",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        })
    }
}

/// Aggregated results of a workflow, in workflow order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: WorkflowId,
    pub session_id: SessionId,
    pub status: WorkflowStatus,
    pub results: Vec<TaskResult>,
    pub duration: Duration,
}

impl WorkflowResult {
    #[must_use]
    pub fn result(&self, id: &TaskId) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.task_id() == id)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &TaskResult> {
        self.with_status(TaskStatus::Success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskResult> {
        self.with_status(TaskStatus::Failed)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &TaskResult> {
        self.with_status(TaskStatus::Skipped)
    }

    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Succeeded
    }

    /// Output of the last successful task, the answer shown to a user
    #[must_use]
    pub fn final_output(&self) -> Option<&crate::value::Value> {
        self.results.iter().rev().find_map(TaskResult::output)
    }

    fn with_status(&self, status: TaskStatus) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(move |r| r.status() == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ErrorClass, TaskError};
    use crate::value::Value;

    #[test]
    fn workflow_lookup() {
        let wf = Workflow::new("s1".into(), "load sales")
            .with_task(Task::new("t1", TaskKind::Extract))
            .with_task(Task::new("t2", TaskKind::Profile).depends_on("t1"));
        assert_eq!(wf.len(), 2);
        assert_eq!(wf.task(&"t2".into()).unwrap().kind, TaskKind::Profile);
        assert!(wf.task(&"t9".into()).is_none());
    }

    #[test]
    fn result_accessors_filter_by_status() {
        let result = WorkflowResult {
            workflow_id: WorkflowId::new(),
            session_id: "s".into(),
            status: WorkflowStatus::Failed,
            results: vec![
                TaskResult::success("a".into(), Value::Int(1), Duration::ZERO, false),
                TaskResult::failed("b".into(), TaskError::new(ErrorClass::Execution, "x"), Duration::ZERO),
                TaskResult::skipped("c".into(), "dependency b failed"),
            ],
            duration: Duration::ZERO,
        };
        assert_eq!(result.succeeded().count(), 1);
        assert_eq!(result.failed().count(), 1);
        assert_eq!(result.skipped().count(), 1);
        assert_eq!(result.final_output(), Some(&Value::Int(1)));
        assert!(!result.is_success());
    }

    #[test]
    fn planned_step_deserializes_with_defaults() {
        let step: PlannedStep =
            serde_json::from_str(r#"{"kind": "transform", "params": {"op": "head", "n": 5}, "depends_on": [0]}"#)
                .unwrap();
        assert_eq!(step.kind, TaskKind::Transform);
        assert_eq!(step.depends_on, vec![0]);
        assert!(step.input.is_none());
    }
}
