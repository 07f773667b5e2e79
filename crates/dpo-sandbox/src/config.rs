//! Policy and sandbox limits

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy validator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Modules a snippet may use; names outside the built-in set are ignored
    pub allowed_modules: Vec<String>,
    /// Maximum snippet size in bytes
    pub max_bytes: usize,
    /// Maximum number of statements
    pub max_statements: usize,
}

impl PolicyConfig {
    /// Defaults: all built-in modules, 4 KiB, 64 statements
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the module allow-list
    #[inline]
    #[must_use]
    pub fn with_allowed_modules<S: Into<String>>(mut self, modules: impl IntoIterator<Item = S>) -> Self {
        self.allowed_modules = modules.into_iter().map(Into::into).collect();
        self
    }

    /// Cap snippet size in bytes
    #[inline]
    #[must_use]
    pub fn with_max_bytes(mut self, max: usize) -> Self {
        self.max_bytes = max;
        self
    }

    /// Cap the statement count
    #[inline]
    #[must_use]
    pub fn with_max_statements(mut self, max: usize) -> Self {
        self.max_statements = max;
        self
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_modules: crate::builtins::MODULES.iter().map(|m| m.name.to_string()).collect(),
            max_bytes: 4096,
            max_statements: 64,
        }
    }
}

/// Sandbox resource limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock limit per execution
    pub timeout_ms: u64,
    /// Evaluation steps per execution
    pub fuel: u64,
    /// Maximum JSON size of the result
    pub max_output_bytes: usize,
    /// How long to wait for a cancelled worker to wind down
    pub teardown_grace_ms: u64,
}

impl SandboxConfig {
    /// Default limits
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-execution wall-clock limit
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Grace period for a cancelled worker
    #[inline]
    #[must_use]
    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    /// Set the wall-clock limit
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the step budget
    #[inline]
    #[must_use]
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    /// Cap the result size in bytes
    #[inline]
    #[must_use]
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            fuel: 5_000_000,
            max_output_bytes: 4 * 1024 * 1024,
            teardown_grace_ms: 2_000,
        }
    }
}
