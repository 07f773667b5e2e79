//! Error types for DPO Core
//!
//! Only planning failures, invalid workflows and storage failures reach
//! callers: task failures are data, carried in `TaskResult`.

use dpo_agents::CollaboratorError;
use dpo_memory::MemoryError;
use dpo_types::{ErrorClass, TaskId};
use std::path::PathBuf;

/// Main orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// No workflow could be planned
    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    /// Structurally unsound workflow
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(#[from] GraphError),

    /// Persisting a result failed
    #[error("storage failed: {0}")]
    Storage(#[from] CollaboratorError),

    #[error("memory store: {0}")]
    Memory(#[from] MemoryError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Planning(PlanningError::Unavailable(_)) => ErrorClass::PlannerUnavailable,
            Self::Planning(_) | Self::InvalidWorkflow(_) | Self::Config(_) => ErrorClass::Planning,
            Self::Storage(e) => e.class(),
            Self::Memory(_) => ErrorClass::Storage,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            Self::Planning(e) => e.is_retryable(),
            Self::Memory(e) => e.is_retryable(),
            Self::InvalidWorkflow(_) | Self::Config(_) => false,
        }
    }
}

/// Planner failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanningError {
    /// Blank request
    #[error("request is empty")]
    EmptyRequest,

    /// The request was understood but maps to no task
    #[error("no task could be inferred from: {0}")]
    NoTaskInferred(String),

    /// The planning collaborator could not be used
    #[error("planner unavailable: {0}")]
    Unavailable(String),

    /// A planned step refers to a step that does not precede it
    #[error("step {step} depends on step {dependency}, which does not precede it")]
    BadStepReference { step: usize, dependency: usize },
}

impl PlanningError {
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Workflow graph validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate task id: {0}")]
    DuplicateId(TaskId),

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("task {0} depends on itself")]
    SelfDependency(TaskId),

    #[error("dependency cycle through task {0}")]
    CycleDetected(TaskId),
}

/// Configuration loading and validation failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(OrchestratorError::Planning(PlanningError::Unavailable("down".into())).is_retryable());
        assert!(!OrchestratorError::Planning(PlanningError::EmptyRequest).is_retryable());
        assert!(!OrchestratorError::InvalidWorkflow(GraphError::CycleDetected("a".into())).is_retryable());
        assert!(OrchestratorError::Storage(CollaboratorError::Storage("disk".into())).is_retryable());
    }

    #[test]
    fn classes() {
        assert_eq!(
            OrchestratorError::Planning(PlanningError::Unavailable("x".into())).class(),
            ErrorClass::PlannerUnavailable
        );
        assert_eq!(
            OrchestratorError::Planning(PlanningError::EmptyRequest).class(),
            ErrorClass::Planning
        );
    }
}
