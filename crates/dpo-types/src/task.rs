//! Tasks and their results

use crate::value::{Params, Scalar, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Task identifier, unique within a workflow
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Closed set of task kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Extract,
    Transform,
    Query,
    Profile,
    CustomCode,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::Extract,
        TaskKind::Transform,
        TaskKind::Query,
        TaskKind::Profile,
        TaskKind::CustomCode,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Extract => "extract",
            TaskKind::Transform => "transform",
            TaskKind::Query => "query",
            TaskKind::Profile => "profile",
            TaskKind::CustomCode => "custom-code",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = UnknownTaskKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "extract" | "load" => Ok(TaskKind::Extract),
            "transform" => Ok(TaskKind::Transform),
            "query" | "analyze" | "analyse" => Ok(TaskKind::Query),
            "profile" => Ok(TaskKind::Profile),
            "custom-code" | "custom" | "code" => Ok(TaskKind::CustomCode),
            _ => Err(UnknownTaskKind(s.to_string())),
        }
    }
}

/// Returned when a string names no task kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task kind: {0}")]
pub struct UnknownTaskKind(pub String);

/// Where a task's primary input comes from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "source", content = "name", rename_all = "snake_case")]
pub enum InputRef {
    /// Consume the dependencies' outputs
    #[default]
    None,
    /// A dataset held by the tabular collaborator
    Dataset(String),
    /// A document held by the extraction collaborator
    Document(String),
}

impl InputRef {
    #[inline]
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, InputRef::None)
    }

    /// Name of the dataset or document, if any
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            InputRef::None => None,
            InputRef::Dataset(n) | InputRef::Document(n) => Some(n),
        }
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRef::None => f.write_str("-"),
            InputRef::Dataset(n) => write!(f, "dataset:{n}"),
            InputRef::Document(n) => write!(f, "document:{n}"),
        }
    }
}

/// A unit of work in a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    #[serde(default)]
    pub input: InputRef,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Failure of an optional task does not fail the workflow
    #[serde(default)]
    pub optional: bool,
}

impl Task {
    #[must_use]
    pub fn new(id: impl Into<TaskId>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind,
            input: InputRef::None,
            params: Params::new(),
            dependencies: Vec::new(),
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
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    #[inline]
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// String parameter, if present and textual
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Scalar::as_str)
    }

    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Scalar> {
        self.params.get(key)
    }
}

/// Outcome category of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        })
    }
}

/// Error taxonomy shared by every component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Planning,
    UnsupportedTask,
    InvalidTask,
    ForbiddenModule,
    ForbiddenPattern,
    SnippetTooComplex,
    Malformed,
    ExecutionTimeout,
    Execution,
    DataAccess,
    Extraction,
    Storage,
    PlannerUnavailable,
    Cancelled,
}

impl ErrorClass {
    /// Transient classes worth a single retry
    #[inline]
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorClass::ExecutionTimeout
                | ErrorClass::DataAccess
                | ErrorClass::Extraction
                | ErrorClass::Storage
                | ErrorClass::PlannerUnavailable
        )
    }

    /// Rejections raised by the snippet policy
    #[inline]
    #[must_use]
    pub fn is_policy(self) -> bool {
        matches!(
            self,
            ErrorClass::ForbiddenModule
                | ErrorClass::ForbiddenPattern
                | ErrorClass::SnippetTooComplex
                | ErrorClass::Malformed
        )
    }
}

/// Error carried by a failed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub class: ErrorClass,
    pub message: String,
}

impl TaskError {
    #[must_use]
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.class, self.message)
    }
}

/// Immutable result of one task
///
/// Only the `success`, `failed` and `skipped` constructors create one, so
/// `error` is present exactly when the status is `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    task_id: TaskId,
    status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<TaskError>,
    duration: Duration,
    cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl TaskResult {
    #[must_use]
    pub fn success(task_id: TaskId, output: Value, duration: Duration, cache_hit: bool) -> Self {
        Self {
            task_id,
            status: TaskStatus::Success,
            output: Some(output),
            error: None,
            duration,
            cache_hit,
            note: None,
        }
    }

    #[must_use]
    pub fn failed(task_id: TaskId, error: TaskError, duration: Duration) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            output: None,
            error: Some(error),
            duration,
            cache_hit: false,
            note: None,
        }
    }

    /// A task that was never dispatched
    #[must_use]
    pub fn skipped(task_id: TaskId, note: impl Into<String>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Skipped,
            output: None,
            error: None,
            duration: Duration::ZERO,
            cache_hit: false,
            note: Some(note.into()),
        }
    }

    #[inline]
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    #[inline]
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    #[inline]
    #[must_use]
    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[inline]
    #[must_use]
    pub fn cache_hit(&self) -> bool {
        self.cache_hit
    }

    #[inline]
    #[must_use]
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}
