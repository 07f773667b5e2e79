//! Agent harness settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry and caching behaviour of an agent harness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Attempts per task, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further one
    pub backoff_ms: u64,
    /// Serve and store results through the cache manager
    pub cache_results: bool,
    /// Result lifetime; the cache manager's default when unset
    pub result_ttl_secs: Option<u64>,
}

impl AgentConfig {
    /// Defaults
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before the first retry
    #[inline]
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Result lifetime, if overridden
    #[inline]
    #[must_use]
    pub fn result_ttl(&self) -> Option<Duration> {
        self.result_ttl_secs.map(Duration::from_secs)
    }

    /// Set the attempt count, at least one
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the first retry delay
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Turn result caching on or off
    #[inline]
    #[must_use]
    pub fn with_cache_results(mut self, enabled: bool) -> Self {
        self.cache_results = enabled;
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_ms: 100,
            cache_results: true,
            result_ttl_secs: None,
        }
    }
}
