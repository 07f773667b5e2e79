//! Memory store configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bounds and persistence for the session store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Turns (and execution records) kept per session
    pub max_history: usize,
    /// Where session snapshots are saved between runs
    pub dir: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_history: 100,
            dir: None,
        }
    }
}

impl MemoryConfig {
    /// Cap per-session history
    #[must_use]
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// Persist snapshots under `dir`
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}
