#![cfg(feature = "redis-tests")]
//! Behavior against a live Redis server.
//!
//! Reads `ROWCACHE_REDIS_URL` (default `redis://127.0.0.1:6379/`). Every
//! test uses its own key prefix and lock names.

use std::time::Duration;

use rowcache_storage::{CacheContext, LockOutcome, RedisStore, UnlockOutcome};
use rowcache_test_utils::{fixtures, init_tracing, RowCacheConfig};
use tokio::time::Instant;

async fn redis_context(prefix: &str) -> CacheContext<RedisStore> {
    init_tracing();
    let base = RowCacheConfig::from_env().expect("valid ROWCACHE_* environment");
    let url = base
        .redis_url
        .clone()
        .unwrap_or_else(|| "redis://127.0.0.1:6379/".to_string());
    let config = fixtures::fast_config()
        .with_key_prefix(prefix)
        .with_redis_url(url);
    CacheContext::connect(config)
        .await
        .expect("Failed to connect to redis")
}

fn unique(name: &str) -> String {
    format!("{}-{}", name, rowcache_core::HolderId::new().as_field())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queue_lock_waiter_sees_token_pushed_on_shared_store() {
    let ctx = redis_context("rt-queue").await;
    let name = unique("job");
    let holder = ctx.queue_lock(name.clone());
    holder.lock().await.unwrap();

    let waiter_ctx = ctx.clone();
    let waiter_name = name.clone();
    let waiting = tokio::spawn(async move {
        let started = Instant::now();
        let result = waiter_ctx
            .queue_lock(waiter_name)
            .with_wait(Duration::from_secs(5))
            .lock()
            .await;
        (result, started.elapsed())
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let released = Instant::now();
    holder.unlock().await.unwrap();
    assert!(released.elapsed() < Duration::from_secs(1));

    let (result, waited) = waiting.await.unwrap();
    assert!(result.is_ok(), "waiter failed: {:?}", result);
    assert!(waited < Duration::from_secs(2));
}

#[tokio::test]
async fn test_reentrant_lock_round_trip() {
    let ctx = redis_context("rt-lock").await;
    let name = unique("resource");
    let a = ctx.lock(name.clone());
    let b = ctx.lock(name);

    assert!(a.acquire().await.unwrap().is_acquired());
    assert!(a.acquire().await.unwrap().is_acquired());
    assert!(!b.acquire().await.unwrap().is_acquired());
    assert_eq!(b.unlock().await.unwrap(), UnlockOutcome::NotHeld);
    assert_eq!(
        a.unlock().await.unwrap(),
        UnlockOutcome::PartiallyReleased { remaining_count: 1 }
    );
    assert_eq!(a.unlock().await.unwrap(), UnlockOutcome::FullyReleased);
    assert_eq!(
        b.lock(Duration::from_secs(1)).await.unwrap(),
        LockOutcome::Acquired
    );
    assert_eq!(b.unlock().await.unwrap(), UnlockOutcome::FullyReleased);
}
