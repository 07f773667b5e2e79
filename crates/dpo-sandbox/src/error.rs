//! Error types for policy validation and sandboxed execution

use dpo_types::ErrorClass;

/// Reasons a snippet is rejected before execution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    /// Import or module reference outside the allow-list
    #[error("forbidden module: {module}")]
    ForbiddenModule { module: String },

    /// Dangerous construct matched by the deny-list
    #[error("forbidden pattern ({category}): {matched}")]
    ForbiddenPattern {
        category: &'static str,
        matched: String,
    },

    /// Size or statement-count bound exceeded
    #[error("snippet too complex: {reason}")]
    SnippetTooComplex { reason: String },

    /// Not a valid program in the restricted language
    #[error("malformed snippet at line {line}: {message}")]
    Malformed { line: usize, message: String },
}

impl PolicyViolation {
    /// Stable class reported on the task error
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ForbiddenModule { .. } => ErrorClass::ForbiddenModule,
            Self::ForbiddenPattern { .. } => ErrorClass::ForbiddenPattern,
            Self::SnippetTooComplex { .. } => ErrorClass::SnippetTooComplex,
            Self::Malformed { .. } => ErrorClass::Malformed,
        }
    }
}

/// Execution failures
///
/// Messages never carry host internals: interpreter panics surface as a
/// generic execution error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    /// Wall-clock limit reached
    #[error("execution timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Runtime fault in the snippet
    #[error("execution error: {message}")]
    Execution { message: String },

    /// Result larger than the configured bound
    #[error("execution error: output of {size} bytes exceeds limit of {limit}")]
    OutputTooLarge { size: usize, limit: usize },
}

impl SandboxError {
    /// Runtime fault with a caller-facing message
    #[inline]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Stable class reported on the task error
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } => ErrorClass::ExecutionTimeout,
            Self::Execution { .. } | Self::OutputTooLarge { .. } => ErrorClass::Execution,
        }
    }

    /// Only timeouts are worth retrying
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
