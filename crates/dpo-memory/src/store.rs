//! Session store
//!
//! Each session sits behind its own `RwLock`; the outer `DashMap` is only
//! held long enough to fetch the session handle, so sessions never contend
//! with each other.

use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::session::{ExecutionRecord, RecordStatus, Session, SessionContext, SessionSnapshot, Turn};
use dashmap::DashMap;
use dpo_types::{ContentHash, SessionId};
use parking_lot::RwLock;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

/// Aggregate counts across all sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    /// Sessions held
    pub sessions: usize,
    /// Turns across all sessions
    pub turns: usize,
    /// Scratch keys across all sessions
    pub scratch_keys: usize,
    /// Execution records across all sessions
    pub executions: usize,
    /// Configured per-session bound
    pub max_history: usize,
}

/// Owner of all session state
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<RwLock<Session>>>,
    config: MemoryConfig,
}

impl SessionStore {
    /// Empty store
    #[must_use]
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
        }
    }

    /// Configuration the store was built with
    #[inline]
    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Per-session turn bound
    #[inline]
    #[must_use]
    pub fn max_history(&self) -> usize {
        self.config.max_history
    }

    fn session(&self, id: &SessionId) -> Option<Arc<RwLock<Session>>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn session_or_create(&self, id: &SessionId) -> Arc<RwLock<Session>> {
        if let Some(session) = self.session(id) {
            return session;
        }
        let max_history = self.config.max_history;
        Arc::clone(
            self.sessions
                .entry(id.clone())
                .or_insert_with(|| Arc::new(RwLock::new(Session::new(max_history))))
                .value(),
        )
    }

    /// Append a turn, evicting the oldest one past the bound
    pub fn record(&self, id: &SessionId, turn: Turn) {
        let session = self.session_or_create(id);
        let evicted = session.write().turns.push(turn);
        if evicted.is_some() {
            tracing::debug!(session_id = %id, "evicted oldest turn");
        }
    }

    /// Cloned view of a session; unknown sessions give an empty context
    #[must_use]
    pub fn get_context(&self, id: &SessionId) -> SessionContext {
        match self.session(id) {
            Some(session) => session.read().context(id),
            None => SessionContext::empty(id.clone()),
        }
    }

    /// Up to `limit` most recent turns, oldest first
    #[must_use]
    pub fn recent_turns(&self, id: &SessionId, limit: usize) -> Vec<Turn> {
        self.session(id)
            .map(|session| session.read().turns.recent(limit))
            .unwrap_or_default()
    }

    /// Snapshot of one session for persistence or transfer
    ///
    /// Fails with [`MemoryError::UnknownSession`] when nothing was recorded for `id`.
    ///
    /// ```
    /// use dpo_memory::{MemoryConfig, SessionStore, Turn};
    /// use dpo_types::SessionId;
    ///
    /// let id = SessionId::new("s1");
    /// let source = SessionStore::new(MemoryConfig::default());
    /// source.record(&id, Turn::new("load sales", "loaded 12 rows"));
    ///
    /// let target = SessionStore::new(MemoryConfig::default());
    /// target.import(source.export(&id)?)?;
    /// assert_eq!(target.recent_turns(&id, 10).len(), 1);
    /// assert!(source.export(&SessionId::new("nobody")).is_err());
    /// # Ok::<(), dpo_memory::MemoryError>(())
    /// ```
    pub fn export(&self, id: &SessionId) -> Result<SessionSnapshot, MemoryError> {
        let session = self
            .session(id)
            .ok_or_else(|| MemoryError::UnknownSession(id.clone()))?;
        let snapshot = session.read().snapshot(id);
        Ok(snapshot)
    }

    /// Replace a session with the contents of a snapshot
    ///
    /// Snapshots longer than this store's bound keep their newest turns.
    pub fn import(&self, snapshot: SessionSnapshot) -> Result<(), MemoryError> {
        if snapshot.version != SessionSnapshot::VERSION {
            return Err(MemoryError::UnsupportedVersion {
                found: snapshot.version,
                expected: SessionSnapshot::VERSION,
            });
        }
        let id = snapshot.session_id.clone();
        let session = Session::from_snapshot(snapshot, self.config.max_history);
        self.sessions.insert(id.clone(), Arc::new(RwLock::new(session)));
        tracing::debug!(session_id = %id, "imported session snapshot");
        Ok(())
    }

    /// Set a scratch value, creating the session if needed
    pub fn set_scratch(&self, id: &SessionId, key: impl Into<String>, value: serde_json::Value) {
        let session = self.session_or_create(id);
        session.write().scratch.insert(key.into(), value);
    }

    /// Scratch value for `key`
    #[must_use]
    pub fn get_scratch(&self, id: &SessionId, key: &str) -> Option<serde_json::Value> {
        self.session(id)
            .and_then(|session| session.read().scratch.get(key).cloned())
    }

    /// Remove and return a scratch value
    pub fn remove_scratch(&self, id: &SessionId, key: &str) -> Option<serde_json::Value> {
        self.session(id)
            .and_then(|session| session.write().scratch.remove(key))
    }

    /// Append to the session's execution log
    pub fn log_execution(&self, id: &SessionId, record: ExecutionRecord) {
        let session = self.session_or_create(id);
        session.write().executions.push(record);
    }

    /// Execution records, oldest first, optionally filtered by status
    #[must_use]
    pub fn execution_log(
        &self,
        id: &SessionId,
        status: Option<RecordStatus>,
        limit: Option<usize>,
    ) -> Vec<ExecutionRecord> {
        let Some(session) = self.session(id) else {
            return Vec::new();
        };
        let guard = session.read();
        let matching: Vec<ExecutionRecord> = guard
            .executions
            .iter()
            .filter(|record| status.map_or(true, |s| record.status == s))
            .cloned()
            .collect();
        match limit {
            Some(limit) => matching[matching.len().saturating_sub(limit)..].to_vec(),
            None => matching,
        }
    }

    /// Forget a session; returns whether it existed
    pub fn clear(&self, id: &SessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Forget every session
    pub fn clear_all(&self) {
        self.sessions.clear();
    }

    /// Ids of all sessions, sorted
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Totals across all sessions
    #[must_use]
    pub fn summary(&self) -> StoreSummary {
        let mut summary = StoreSummary {
            sessions: 0,
            turns: 0,
            scratch_keys: 0,
            executions: 0,
            max_history: self.config.max_history,
        };
        for entry in &self.sessions {
            let session = entry.value().read();
            summary.sessions += 1;
            summary.turns += session.turns.len();
            summary.scratch_keys += session.scratch.len();
            summary.executions += session.executions.len();
        }
        summary
    }

    /// Write one snapshot file per session into `dir`
    ///
    /// Files are named by a hash of the session id and written through a
    /// temporary file and rename.
    pub async fn save_to(&self, dir: &Path) -> Result<usize, MemoryError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| MemoryError::io(dir, e))?;

        let snapshots: Vec<SessionSnapshot> = self
            .sessions
            .iter()
            .map(|entry| entry.value().read().snapshot(entry.key()))
            .collect();

        for snapshot in &snapshots {
            let path = dir.join(snapshot_file_name(&snapshot.session_id));
            let tmp = dir.join(format!(".{}.tmp", ulid::Ulid::new()));
            let blob = serde_json::to_vec_pretty(snapshot)?;
            tokio::fs::write(&tmp, &blob)
                .await
                .map_err(|e| MemoryError::io(&tmp, e))?;
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(MemoryError::io(path, e));
            }
        }
        tracing::info!(sessions = snapshots.len(), dir = %dir.display(), "saved session snapshots");
        Ok(snapshots.len())
    }

    /// Import every readable snapshot in `dir`
    ///
    /// A missing directory loads nothing. Unreadable or outdated files are
    /// skipped with a warning.
    pub async fn load_from(&self, dir: &Path) -> Result<usize, MemoryError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(MemoryError::io(dir, e)),
        };

        let mut loaded = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MemoryError::io(dir, e))?
        {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| MemoryError::io(&path, e))?;
            let imported = serde_json::from_slice::<SessionSnapshot>(&bytes)
                .map_err(MemoryError::from)
                .and_then(|snapshot| self.import(snapshot));
            match imported {
                Ok(()) => loaded += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping session snapshot"),
            }
        }
        tracing::info!(sessions = loaded, dir = %dir.display(), "loaded session snapshots");
        Ok(loaded)
    }
}

fn snapshot_file_name(id: &SessionId) -> String {
    format!("{}.json", ContentHash::compute(id.as_str().as_bytes()))
}
