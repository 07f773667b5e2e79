//! The agent abstraction

use crate::error::AgentError;
use async_trait::async_trait;
use dpo_types::{ContentHash, InputRef, Task, TaskKind, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Capability family of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Extract and transform tabular data
    Etl,
    /// Answer questions by running generated snippets
    Query,
    /// Describe the quality and shape of a dataset
    Profiling,
}

impl AgentKind {
    /// Every kind, in registration order
    pub const ALL: [AgentKind; 3] = [AgentKind::Etl, AgentKind::Query, AgentKind::Profiling];

    /// Lowercase name used in logs and config
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Etl => "etl",
            AgentKind::Query => "query",
            AgentKind::Profiling => "profiling",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved input of one task
///
/// `primary` is the loaded dataset or document when the task names one,
/// otherwise the output of its first dependency. `dependencies` holds every
/// dependency output by task id. `references` holds the other datasets the
/// task names in its parameters (a join partner), loaded by name.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInput {
    /// Dataset, document or first dependency output
    pub primary: Value,
    /// Dependency outputs by task id
    pub dependencies: BTreeMap<String, Value>,
    /// Datasets named in the task's parameters
    pub references: BTreeMap<String, Value>,
    /// Where `primary` came from
    pub source: InputRef,
}

impl TaskInput {
    /// Input with no dependencies or references
    #[must_use]
    pub fn new(primary: Value) -> Self {
        Self {
            primary,
            dependencies: BTreeMap::new(),
            references: BTreeMap::new(),
            source: InputRef::None,
        }
    }

    /// Add a dependency output
    #[must_use]
    pub fn with_dependency(mut self, id: impl Into<String>, value: Value) -> Self {
        self.dependencies.insert(id.into(), value);
        self
    }

    /// Add a dataset referenced by name
    #[must_use]
    pub fn with_reference(mut self, name: impl Into<String>, value: Value) -> Self {
        self.references.insert(name.into(), value);
        self
    }

    /// Record where the primary value came from
    #[must_use]
    pub fn with_source(mut self, source: InputRef) -> Self {
        self.source = source;
        self
    }

    /// Content fingerprint over the primary value, every dependency and
    /// every referenced dataset
    ///
    /// Depends on content only, not on where the primary data came from.
    #[must_use]
    pub fn fingerprint(&self) -> ContentHash {
        let by_name = |values: &BTreeMap<String, Value>| -> serde_json::Map<String, serde_json::Value> {
            values.iter().map(|(id, v)| (id.clone(), v.to_json())).collect()
        };
        let doc = serde_json::json!({
            "primary": self.primary.to_json(),
            "dependencies": by_name(&self.dependencies),
            "references": by_name(&self.references),
        });
        ContentHash::compute(doc.to_string().as_bytes())
    }

    /// The table this task works on
    ///
    /// # Errors
    /// [`AgentError::MissingInput`] when no table can be found.
    pub fn table(&self) -> Result<&dpo_types::Table, AgentError> {
        self.primary.primary_table().ok_or_else(|| {
            AgentError::MissingInput(format!("expected a table, got {}", self.primary.type_name()))
        })
    }
}

/// A capability-specific task handler
///
/// Agents are stateless between calls: everything they need arrives in the
/// task and its resolved input.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Capability family, used for routing and stats
    fn kind(&self) -> AgentKind;

    /// Whether this agent handles tasks of `kind`
    fn supports(&self, kind: TaskKind) -> bool;

    /// Produce the task's value
    async fn run(&self, task: &Task, input: &TaskInput) -> Result<Value, AgentError>;

    /// Whether results of `task` may be served from cache
    fn cacheable(&self, _task: &Task) -> bool {
        true
    }

    /// Datasets `task` names besides its input, loaded into
    /// [`TaskInput::references`] before [`Agent::run`]
    fn references(&self, _task: &Task) -> Vec<String> {
        Vec::new()
    }
}
