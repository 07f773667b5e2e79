//! Memory store errors

use dpo_types::SessionId;
use std::path::PathBuf;

/// Session store errors
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// No session with this id has been recorded
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// Snapshot written by an incompatible format version
    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// Reading or writing a snapshot file failed
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot JSON could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MemoryError {
    /// I/O failure on `path`
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the operation might succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}
