//! Error types for the cache

use std::path::PathBuf;

/// Cache failures
///
/// Only the durable tier can fail; the in-process tier is infallible.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// IO error in the durable tier
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Blob could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// I/O failure on `path`
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Durable-tier faults are usually transient
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}
