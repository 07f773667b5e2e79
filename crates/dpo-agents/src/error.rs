//! Agent errors

use crate::agent::AgentKind;
use crate::collaborators::CollaboratorError;
use dpo_sandbox::{PolicyViolation, SandboxError};
use dpo_types::{ErrorClass, TableError, TaskError, TaskKind};

/// Why an agent could not produce a value
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    /// Task kind routed to the wrong agent
    #[error("{agent} agent does not handle {kind} tasks")]
    Unsupported { agent: AgentKind, kind: TaskKind },

    /// Bad or missing parameters
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// The dataset, document or dependency output is absent
    #[error("task has no input: {0}")]
    MissingInput(String),

    /// Generated snippet rejected before execution
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    /// Snippet failed while running
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// A collaborator failed
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl AgentError {
    /// Shorthand for [`AgentError::InvalidTask`]
    #[inline]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidTask(message.into())
    }

    /// Stable class reported on the task error
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unsupported { .. } => ErrorClass::UnsupportedTask,
            Self::InvalidTask(_) | Self::MissingInput(_) => ErrorClass::InvalidTask,
            Self::Policy(v) => v.class(),
            Self::Sandbox(e) => e.class(),
            Self::Collaborator(e) => e.class(),
        }
    }

    /// Worth one more attempt
    ///
    /// Policy rejections and bad parameters never are; sandbox errors only
    /// on timeout.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sandbox(e) => e.is_retryable(),
            Self::Collaborator(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Failure record for the task result
    #[must_use]
    pub fn to_task_error(&self) -> TaskError {
        TaskError::new(self.class(), self.to_string())
    }
}

impl From<TableError> for AgentError {
    fn from(err: TableError) -> Self {
        Self::InvalidTask(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let policy = AgentError::from(PolicyViolation::ForbiddenModule { module: "os".into() });
        assert_eq!(policy.class(), ErrorClass::ForbiddenModule);
        assert!(!policy.is_retryable());

        let timeout = AgentError::from(SandboxError::Timeout { elapsed_ms: 10 });
        assert_eq!(timeout.class(), ErrorClass::ExecutionTimeout);
        assert!(timeout.is_retryable());

        let fault = AgentError::from(SandboxError::execution("division by zero"));
        assert!(!fault.is_retryable());

        let data = AgentError::from(CollaboratorError::DataAccess("gone".into()));
        assert!(data.is_retryable());

        let table = AgentError::from(TableError::UnknownColumn("x".into()));
        assert_eq!(table.to_task_error().class, ErrorClass::InvalidTask);
    }
}
