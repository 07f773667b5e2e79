//! Durable (tier-2) stores
//!
//! [`FsStore`] keeps one versioned JSON blob per key under a directory,
//! sharded by the first two hex characters of the key. Writes go to a
//! temporary file that is renamed into place, so readers never see a
//! partially written blob.

use crate::entry::{CacheEntry, StoredEntry};
use crate::error::CacheError;
use crate::key::CacheKey;
use async_trait::async_trait;
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Durable key → entry store
#[async_trait]
pub trait DurableStore: Send + Sync + Debug {
    /// Load an entry; a missing, unreadable or outdated blob is `None`
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    async fn store(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    async fn remove(&self, key: &CacheKey) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    /// Number of stored blobs, expired ones included
    async fn count(&self) -> Result<usize, CacheError>;

    /// Store name for logs and stats
    fn name(&self) -> &'static str;
}

/// Store that keeps nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl DurableStore for NullStore {
    async fn load(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(None)
    }

    async fn store(&self, _entry: &CacheEntry) -> Result<(), CacheError> {
        Ok(())
    }

    async fn remove(&self, _key: &CacheKey) -> Result<(), CacheError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn count(&self) -> Result<usize, CacheError> {
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

/// Filesystem-backed store
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Store blobs under `root`, creating it lazily on first write
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the blobs
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        let hex = key.to_string();
        self.root.join(&hex[..2]).join(format!("{hex}.json"))
    }
}

#[async_trait]
impl DurableStore for FsStore {
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, e)),
        };

        match serde_json::from_slice::<StoredEntry>(&bytes) {
            Ok(stored) if stored.version == StoredEntry::VERSION && stored.entry.key == *key => {
                Ok(Some(stored.entry))
            }
            Ok(stored) => {
                tracing::debug!(key = %key.short(), version = stored.version, "discarding outdated cache blob");
                self.remove(key).await?;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(key = %key.short(), error = %e, "discarding corrupt cache blob");
                self.remove(key).await?;
                Ok(None)
            }
        }
    }

    async fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let path = self.path_for(&entry.key);
        let dir = path.parent().map_or_else(|| self.root.clone(), Path::to_path_buf);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(&dir, e))?;

        let blob = serde_json::to_vec(&StoredEntry {
            version: StoredEntry::VERSION,
            entry: entry.clone(),
        })?;
        let tmp = dir.join(format!(".{}.tmp", ulid::Ulid::new()));
        tokio::fs::write(&tmp, &blob)
            .await
            .map_err(|e| CacheError::io(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CacheError::io(path, e));
        }
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    async fn clear(&self) -> Result<(), CacheError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(&self.root, e)),
        }
    }

    async fn count(&self) -> Result<usize, CacheError> {
        let mut shards = match tokio::fs::read_dir(&self.root).await {
            Ok(shards) => shards,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };
        let mut total = 0;
        while let Some(shard) = shards
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.root, e))?
        {
            let shard_path = shard.path();
            if !shard_path.is_dir() {
                continue;
            }
            let mut blobs = tokio::fs::read_dir(&shard_path)
                .await
                .map_err(|e| CacheError::io(&shard_path, e))?;
            while let Some(blob) = blobs
                .next_entry()
                .await
                .map_err(|e| CacheError::io(&shard_path, e))?
            {
                if blob.path().extension().is_some_and(|ext| ext == "json") {
                    total += 1;
                }
            }
        }
        Ok(total)
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpo_types::Value;
    use std::time::Duration;

    #[tokio::test]
    async fn fs_store_round_trip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let entry = CacheEntry::new(CacheKey::named("k"), Value::Int(7), Duration::from_secs(60));

        store.store(&entry).await.unwrap();
        assert_eq!(store.load(&entry.key).await.unwrap(), Some(entry.clone()));

        store.remove(&entry.key).await.unwrap();
        assert_eq!(store.load(&entry.key).await.unwrap(), None);
        // removing twice is fine
        store.remove(&entry.key).await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_blob_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let key = CacheKey::named("broken");
        let path = store.path_for(&key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        assert_eq!(store.load(&key).await.unwrap(), None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn outdated_version_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let entry = CacheEntry::new(CacheKey::named("v0"), Value::Null, Duration::from_secs(60));
        let blob = serde_json::json!({ "version": 0, "entry": entry });
        let path = store.path_for(&entry.key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, blob.to_string()).unwrap();

        assert_eq!(store.load(&entry.key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        let store = FsStore::new(&root);
        for i in 0..3 {
            let entry = CacheEntry::new(CacheKey::named(&i.to_string()), Value::Int(i), Duration::from_secs(60));
            store.store(&entry).await.unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 3);
        store.clear().await.unwrap();
        assert!(!root.exists());
        assert_eq!(store.count().await.unwrap(), 0);
        store.clear().await.unwrap();
    }
}
