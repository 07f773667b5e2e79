//! Session data: turns, scratch state and execution records

use crate::ring::BoundedRing;
use chrono::{DateTime, Utc};
use dpo_types::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One request/response exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// User request text
    pub prompt: String,
    /// Short description of what was returned
    pub response_summary: String,
    /// When the turn was recorded
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Turn stamped with the current time
    #[must_use]
    pub fn new(prompt: impl Into<String>, response_summary: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response_summary: response_summary.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome recorded for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Completed normally
    Success,
    /// Completed with something worth flagging
    Warning,
    /// Failed
    Error,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// Log line for something the orchestrator did on behalf of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// What was done, e.g. `workflow`
    pub operation: String,
    /// How it ended
    pub status: RecordStatus,
    /// When it was logged
    pub timestamp: DateTime<Utc>,
    /// Free-form payload, `null` when absent
    #[serde(default)]
    pub details: serde_json::Value,
}

impl ExecutionRecord {
    /// Record without details, stamped now
    #[must_use]
    pub fn new(operation: impl Into<String>, status: RecordStatus) -> Self {
        Self {
            operation: operation.into(),
            status,
            timestamp: Utc::now(),
            details: serde_json::Value::Null,
        }
    }

    /// Attach a details payload
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Read-only view of a session handed to planners
///
/// A clone: later writes to the store do not show up here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Session this view was taken from
    pub session_id: SessionId,
    /// Oldest first
    pub turns: Vec<Turn>,
    /// Scratch entries at the time of the read
    pub scratch: BTreeMap<String, serde_json::Value>,
}

impl SessionContext {
    /// Empty context for a session with no history
    #[must_use]
    pub fn empty(session_id: SessionId) -> Self {
        Self {
            session_id,
            turns: Vec::new(),
            scratch: BTreeMap::new(),
        }
    }

    /// Most recent turn, if any
    #[must_use]
    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// String-valued scratch entry
    #[must_use]
    pub fn scratch_str(&self, key: &str) -> Option<&str> {
        self.scratch.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Serialisable copy of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Format version, see [`SessionSnapshot::VERSION`]
    pub version: u32,
    /// Session the snapshot belongs to
    pub session_id: SessionId,
    /// Turns oldest first
    pub turns: Vec<Turn>,
    /// Scratch state
    #[serde(default)]
    pub scratch: BTreeMap<String, serde_json::Value>,
    /// Execution log oldest first
    #[serde(default)]
    pub executions: Vec<ExecutionRecord>,
    /// Time of export
    pub exported_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Snapshot format written by this version
    pub const VERSION: u32 = 1;
}

/// Mutable per-session state, guarded by the store's per-session lock
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) turns: BoundedRing<Turn>,
    pub(crate) scratch: BTreeMap<String, serde_json::Value>,
    pub(crate) executions: BoundedRing<ExecutionRecord>,
}

impl Session {
    pub(crate) fn new(max_history: usize) -> Self {
        Self {
            turns: BoundedRing::new(max_history),
            scratch: BTreeMap::new(),
            executions: BoundedRing::new(max_history),
        }
    }

    pub(crate) fn from_snapshot(snapshot: SessionSnapshot, max_history: usize) -> Self {
        Self {
            turns: BoundedRing::from_items(max_history, snapshot.turns),
            scratch: snapshot.scratch,
            executions: BoundedRing::from_items(max_history, snapshot.executions),
        }
    }

    pub(crate) fn context(&self, session_id: &SessionId) -> SessionContext {
        SessionContext {
            session_id: session_id.clone(),
            turns: self.turns.to_vec(),
            scratch: self.scratch.clone(),
        }
    }

    pub(crate) fn snapshot(&self, session_id: &SessionId) -> SessionSnapshot {
        SessionSnapshot {
            version: SessionSnapshot::VERSION,
            session_id: session_id.clone(),
            turns: self.turns.to_vec(),
            scratch: self.scratch.clone(),
            executions: self.executions.to_vec(),
            exported_at: Utc::now(),
        }
    }
}
