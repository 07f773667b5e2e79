//! Two-tier Cache Manager
//!
//! Tier 1 is a moka map whose per-entry expiry follows each entry's own TTL.
//! Tier 2 is a [`DurableStore`]. Reads go tier 1 → tier 2 (promoting on a
//! durable hit); writes go to both tiers before returning. Expired entries
//! are never returned, even if eviction has not caught up yet.

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::store::{DurableStore, FsStore, NullStore};
use chrono::Utc;
use dpo_types::Value;
use moka::future::Cache;
use moka::Expiry;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Expire each tier-1 entry when its own TTL runs out
struct EntryExpiry;

impl Expiry<CacheKey, Arc<CacheEntry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.remaining(Utc::now()))
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.remaining(Utc::now()))
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    computations: AtomicU64,
    durable_write_failures: AtomicU64,
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Approximate tier-1 entry count
    pub entries: u64,
    /// Lookups answered from either tier
    pub hits: u64,
    /// Lookups that found nothing live
    pub misses: u64,
    /// Tier-2 hits copied into tier 1
    pub promotions: u64,
    /// Times a `get_or_compute` producer actually ran
    pub computations: u64,
    /// Tier-2 writes that failed and were only logged
    pub durable_write_failures: u64,
    /// Name of the durable tier, `"none"` when disabled
    pub durable_tier: &'static str,
}

impl CacheStats {
    /// Fraction of lookups served from cache
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cache Manager shared by all agents
///
/// Construct once and hand out clones; clones share both tiers and the
/// counters.
#[derive(Clone)]
pub struct CacheManager {
    inner: Cache<CacheKey, Arc<CacheEntry>>,
    durable: Arc<dyn DurableStore>,
    default_ttl: Duration,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("entries", &self.inner.entry_count())
            .field("durable", &self.durable.name())
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl CacheManager {
    /// Create a manager over an explicit durable store
    #[must_use]
    pub fn new(max_entries: u64, default_ttl: Duration, durable: Arc<dyn DurableStore>) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryExpiry)
            .build();
        Self {
            inner,
            durable,
            default_ttl,
            counters: Arc::new(Counters::default()),
        }
    }

    /// In-process only
    #[must_use]
    pub fn in_memory(max_entries: u64, default_ttl: Duration) -> Self {
        Self::new(max_entries, default_ttl, Arc::new(NullStore))
    }

    /// Build from configuration; a configured directory enables [`FsStore`]
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        let durable: Arc<dyn DurableStore> = match &config.dir {
            Some(dir) => Arc::new(FsStore::new(dir)),
            None => Arc::new(NullStore),
        };
        Self::new(config.max_entries, config.default_ttl(), durable)
    }

    /// TTL used by `put`
    #[inline]
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live value
    pub async fn get(&self, key: &CacheKey) -> Result<Option<Value>, CacheError> {
        if let Some(entry) = self.lookup_fresh(key).await? {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(entry.value.clone()));
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Store a value in both tiers
    ///
    /// `ttl` of `None` uses the configured default.
    pub async fn put(&self, key: CacheKey, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let entry = Arc::new(CacheEntry::new(key, value, ttl.unwrap_or(self.default_ttl)));
        self.durable.store(&entry).await?;
        self.inner.insert(key, entry).await;
        tracing::debug!(cache_key = %key.short(), "cache put");
        Ok(())
    }

    /// Drop a key from both tiers
    pub async fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.inner.invalidate(key).await;
        self.durable.remove(key).await
    }

    /// Drop everything from both tiers
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
        self.durable.clear().await
    }

    /// Return the cached value for `key`, or run `compute` and cache its result
    ///
    /// Concurrent callers for the same key share one computation: exactly one
    /// producer runs and the others wait for its outcome. A failed
    /// computation is handed to every waiter and nothing is cached. The
    /// returned flag is `true` when the value did not come from this call's
    /// own producer.
    ///
    /// A failing durable write is logged and counted; the computed value is
    /// still returned and kept in tier 1.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: CacheKey,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<(Value, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Clone + Send + Sync + 'static,
    {
        let now = Utc::now();
        if let Some(entry) = self.inner.get(&key).await {
            if entry.is_fresh(now) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok((entry.value.clone(), true));
            }
            self.inner.invalidate(&key).await;
        }

        let ttl = ttl.unwrap_or(self.default_ttl);
        let promoted = AtomicBool::new(false);
        let (durable, counters, promoted_flag) = (&self.durable, &self.counters, &promoted);
        let init = async move {
            match durable.load(&key).await {
                Ok(Some(entry)) if entry.is_fresh(Utc::now()) => {
                    promoted_flag.store(true, Ordering::Relaxed);
                    return Ok(Arc::new(entry));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(cache_key = %key.short(), error = %e, "durable cache read failed");
                }
            }

            counters.computations.fetch_add(1, Ordering::Relaxed);
            let value = compute().await?;
            let entry = Arc::new(CacheEntry::new(key, value, ttl));
            if let Err(e) = durable.store(&entry).await {
                counters
                    .durable_write_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(cache_key = %key.short(), error = %e, "durable cache write failed");
            }
            Ok(entry)
        };

        let entry = self
            .inner
            .entry(key)
            .or_try_insert_with(init)
            .await
            .map_err(|shared: Arc<E>| Arc::try_unwrap(shared).unwrap_or_else(|arc| (*arc).clone()))?;

        let was_promoted = promoted.load(Ordering::Relaxed);
        let hit = !entry.is_fresh() || was_promoted;
        if hit {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
        if was_promoted {
            self.counters.promotions.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(cache_key = %key.short(), hit, promoted = was_promoted, "cache read-through");
        Ok((entry.into_value().value.clone(), hit))
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.inner.entry_count(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            durable_write_failures: self.counters.durable_write_failures.load(Ordering::Relaxed),
            durable_tier: self.durable.name(),
        }
    }

    /// Number of blobs in the durable tier
    pub async fn durable_entries(&self) -> Result<usize, CacheError> {
        self.durable.count().await
    }

    async fn lookup_fresh(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        let now = Utc::now();
        if let Some(entry) = self.inner.get(key).await {
            if entry.is_fresh(now) {
                return Ok(Some(entry));
            }
            self.inner.invalidate(key).await;
        }

        match self.durable.load(key).await? {
            Some(entry) if entry.is_fresh(now) => {
                let entry = Arc::new(entry);
                self.inner.insert(*key, Arc::clone(&entry)).await;
                self.counters.promotions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache_key = %key.short(), "promoted durable cache entry");
                Ok(Some(entry))
            }
            Some(_) => {
                self.durable.remove(key).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get() {
        let cache = CacheManager::in_memory(100, Duration::from_secs(60));
        let key = CacheKey::named("a");
        assert_eq!(cache.get(&key).await.unwrap(), None);
        cache.put(key, Value::Int(3), None).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(Value::Int(3)));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.durable_tier, "null");
    }

    #[tokio::test]
    async fn invalidate_removes_value() {
        let cache = CacheManager::default();
        let key = CacheKey::named("b");
        cache.put(key, Value::Bool(true), None).await.unwrap();
        cache.invalidate(&key).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn second_compute_is_a_hit() {
        let cache = CacheManager::default();
        let key = CacheKey::named("c");
        let (v, hit) = cache
            .get_or_compute(key, None, || async { Ok::<_, String>(Value::Int(1)) })
            .await
            .unwrap();
        assert_eq!((v, hit), (Value::Int(1), false));

        let (v, hit) = cache
            .get_or_compute(key, None, || async { Ok::<_, String>(Value::Int(2)) })
            .await
            .unwrap();
        assert_eq!((v, hit), (Value::Int(1), true));
        assert_eq!(cache.stats().computations, 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = CacheManager::default();
        let key = CacheKey::named("d");
        let err = cache
            .get_or_compute(key, None, || async { Err::<Value, _>("boom".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err, "boom");

        let (v, hit) = cache
            .get_or_compute(key, None, || async { Ok::<_, String>(Value::Int(5)) })
            .await
            .unwrap();
        assert_eq!((v, hit), (Value::Int(5), false));
    }

    #[test]
    fn hit_rate_handles_empty() {
        let stats = CacheManager::default().stats();
        assert_eq!(stats.hit_rate(), 0.0);
    }
}
