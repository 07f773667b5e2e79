//! Concurrent read-through shares one computation per key

use dpo_cache::{CacheKey, CacheManager};
use dpo_types::Value;
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_computation() {
    let cache = CacheManager::in_memory(1_000, Duration::from_secs(60));
    let runs = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::named("expensive");

    let handles = (0..32).map(|_| {
        let cache = cache.clone();
        let runs = Arc::clone(&runs);
        tokio::spawn(async move {
            cache
                .get_or_compute(key, None, || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, String>(Value::Int(42))
                })
                .await
        })
    });

    let outcomes: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(outcomes.iter().all(|(v, _)| *v == Value::Int(42)));
    let misses = outcomes.iter().filter(|(_, hit)| !hit).count();
    assert_eq!(misses, 1, "only the producer reports a miss");
    assert_eq!(cache.stats().computations, 1);
}

#[tokio::test]
async fn distinct_keys_compute_independently() {
    let cache = CacheManager::in_memory(1_000, Duration::from_secs(60));
    let runs = AtomicUsize::new(0);

    let calls = (0..8).map(|i| {
        let cache = &cache;
        let runs = &runs;
        async move {
            cache
                .get_or_compute(CacheKey::named(&format!("k{i}")), None, || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(Value::Int(i))
                })
                .await
                .unwrap()
        }
    });
    let values = join_all(calls).await;

    assert_eq!(runs.load(Ordering::SeqCst), 8);
    for (i, (value, hit)) in values.into_iter().enumerate() {
        assert_eq!(value, Value::Int(i as i64));
        assert!(!hit);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_failure_reaches_every_waiter_and_is_not_cached() {
    let cache = CacheManager::in_memory(1_000, Duration::from_secs(60));
    let key = CacheKey::named("flaky");

    let handles = (0..8).map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute(key, None, || async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err::<Value, _>("source unavailable".to_string())
                })
                .await
        })
    });
    for joined in join_all(handles).await {
        assert_eq!(joined.unwrap().unwrap_err(), "source unavailable");
    }

    assert_eq!(cache.get(&key).await.unwrap(), None);
}
