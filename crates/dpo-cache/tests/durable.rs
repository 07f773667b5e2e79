//! Tier-2 persistence and promotion

use dpo_cache::{CacheConfig, CacheKey, CacheManager, FsStore};
use dpo_types::{ContentHash, Params, Scalar, Value};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn durable_tier_survives_a_new_manager() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::default().with_dir(dir.path());
    let params: Params = [("op".to_string(), Scalar::from("profile"))].into_iter().collect();
    let key = CacheKey::derive("profiling", &params, &ContentHash::compute(b"sales"));

    let first = CacheManager::from_config(&config);
    first.put(key, Value::Float(1.5), None).await.unwrap();
    assert_eq!(first.durable_entries().await.unwrap(), 1);

    let second = CacheManager::from_config(&config);
    assert_eq!(second.get(&key).await.unwrap(), Some(Value::Float(1.5)));
    let stats = second.stats();
    assert_eq!(stats.promotions, 1);
    assert_eq!(stats.durable_tier, "fs");
}

#[tokio::test]
async fn read_through_promotes_without_computing() {
    let dir = tempfile::tempdir().unwrap();
    let key = CacheKey::named("promoted");
    CacheManager::new(10, Duration::from_secs(60), Arc::new(FsStore::new(dir.path())))
        .put(key, Value::Int(7), None)
        .await
        .unwrap();

    let cache = CacheManager::new(10, Duration::from_secs(60), Arc::new(FsStore::new(dir.path())));
    let (value, hit) = cache
        .get_or_compute(key, None, || async { Ok::<_, String>(Value::Int(0)) })
        .await
        .unwrap();
    assert_eq!(value, Value::Int(7));
    assert!(hit);
    assert_eq!(cache.stats().computations, 0);
}

#[tokio::test]
async fn durable_write_failure_does_not_fail_read_through() {
    let dir = tempfile::tempdir().unwrap();
    // a regular file where the store expects a directory
    let blocked = dir.path().join("blocked");
    std::fs::write(&blocked, b"").unwrap();
    let cache = CacheManager::new(10, Duration::from_secs(60), Arc::new(FsStore::new(&blocked)));
    let key = CacheKey::named("unwritable");

    let (value, hit) = cache
        .get_or_compute(key, None, || async { Ok::<_, String>(Value::Bool(true)) })
        .await
        .unwrap();
    assert_eq!((value, hit), (Value::Bool(true), false));
    assert_eq!(cache.stats().durable_write_failures, 1);

    let err = cache.put(key, Value::Null, None).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn clear_empties_both_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::from_config(&CacheConfig::default().with_dir(dir.path().join("c")));
    for i in 0..4 {
        cache
            .put(CacheKey::named(&i.to_string()), Value::Int(i), None)
            .await
            .unwrap();
    }
    cache.clear().await.unwrap();
    assert_eq!(cache.durable_entries().await.unwrap(), 0);
    assert_eq!(cache.get(&CacheKey::named("0")).await.unwrap(), None);
}
