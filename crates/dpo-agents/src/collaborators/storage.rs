//! Structured storage for exported results

use super::CollaboratorError;
use async_trait::async_trait;
use dashmap::DashMap;
use dpo_types::{ContentHash, Value};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;

/// Key-value sink for results that outlive a run
#[async_trait]
pub trait StructuredStorage: Send + Sync {
    /// Store `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: &Value) -> Result<(), CollaboratorError>;

    /// Value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Value>, CollaboratorError>;
}

/// Process-local storage
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    items: DashMap<String, Value>,
}

impl InMemoryStorage {
    /// Empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored items
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl StructuredStorage for InMemoryStorage {
    async fn put(&self, key: &str, value: &Value) -> Result<(), CollaboratorError> {
        self.items.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CollaboratorError> {
        Ok(self.items.get(key).map(|v| v.value().clone()))
    }
}

#[derive(Serialize, Deserialize)]
struct StoredValue {
    version: u32,
    key: String,
    value: Value,
}

const STORED_VERSION: u32 = 1;

/// One versioned JSON file per key
///
/// File names are hashes of the key, so any key is safe to use.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Storage rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", ContentHash::compute(key.as_bytes())))
    }
}

fn storage_err(path: &std::path::Path, e: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::Storage(format!("{}: {e}", path.display()))
}

#[async_trait]
impl StructuredStorage for FsStorage {
    async fn put(&self, key: &str, value: &Value) -> Result<(), CollaboratorError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| storage_err(&self.root, e))?;
        let path = self.path_for(key);
        let blob = serde_json::to_vec_pretty(&StoredValue {
            version: STORED_VERSION,
            key: key.to_string(),
            value: value.clone(),
        })
        .map_err(|e| storage_err(&path, e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, blob)
            .await
            .map_err(|e| storage_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_err(&path, e))
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CollaboratorError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err(&path, e)),
        };
        let stored: StoredValue = serde_json::from_slice(&bytes).map_err(|e| storage_err(&path, e))?;
        if stored.version != STORED_VERSION || stored.key != key {
            return Err(storage_err(&path, "unexpected stored value"));
        }
        Ok(Some(stored.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path().join("exports"));
        assert_eq!(storage.get("reports/q1").await.unwrap(), None);
        storage.put("reports/q1", &Value::Int(12)).await.unwrap();
        assert_eq!(storage.get("reports/q1").await.unwrap(), Some(Value::Int(12)));
    }

    #[tokio::test]
    async fn fs_storage_failure_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();
        let err = FsStorage::new(&file).put("k", &Value::Null).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Storage(_)));
    }

    #[tokio::test]
    async fn memory_storage_overwrites() {
        let storage = InMemoryStorage::new();
        storage.put("k", &Value::Int(1)).await.unwrap();
        storage.put("k", &Value::Int(2)).await.unwrap();
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get("k").await.unwrap(), Some(Value::Int(2)));
    }
}
