//! Effect cache behaviour against a real SQLite database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docket::effects::{EffectCache, EffectError, EffectKey};
use docket::{DbContext, DocId, RunId, Sha256Hex};
use tempfile::TempDir;

async fn setup() -> (TempDir, DbContext) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = DbContext::from_sqlite_path(&dir.path().join("docket.db")).unwrap();
    ctx.migrate().await.unwrap();
    (dir, ctx)
}

fn key(step: &str, content: &[u8]) -> EffectKey {
    let run = RunId::parse("run-effects").unwrap();
    let sha = Sha256Hex::digest(content);
    let doc = DocId::from_raw_sha(&sha);
    EffectKey::step(&run, step, &doc, 1, sha.as_str()).unwrap()
}

#[tokio::test]
async fn sequential_calls_execute_once_and_replay() {
    let (_dir, ctx) = setup().await;
    let cache = ctx.effect_cache();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = key("store-raw", b"raw bytes");

    let first = {
        let calls = Arc::clone(&calls);
        cache
            .call(&key, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!({"uri": "file:///objects/raw", "length": 9}))
            })
            .await
            .unwrap()
    };
    let second = {
        let calls = Arc::clone(&calls);
        cache
            .call(&key, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!({"uri": "other"}))
            })
            .await
            .unwrap()
    };

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.response, second.response);
    assert_eq!(ctx.side_effects().count().await.unwrap(), 1);

    let looked_up: Option<serde_json::Value> = cache.lookup(&key).await.unwrap();
    assert_eq!(looked_up, Some(first.response));
}

#[tokio::test]
async fn concurrent_same_process_calls_execute_once() {
    let (_dir, ctx) = setup().await;
    let cache = ctx.effect_cache();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = key("parse", b"same content");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            cache
                .call(&key, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(42u32)
                })
                .await
                .unwrap()
        }));
    }

    let outcomes = futures::future::join_all(handles).await;
    let replayed = outcomes
        .iter()
        .filter(|o| o.as_ref().unwrap().replayed)
        .count();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(replayed, 7);
    assert!(outcomes.iter().all(|o| o.as_ref().unwrap().response == 42));
    assert_eq!(cache.in_flight(), 0);
    assert_eq!(ctx.side_effects().count().await.unwrap(), 1);
}

#[tokio::test]
async fn separate_caches_share_the_database_lock() {
    let (_dir, ctx) = setup().await;
    // Two caches model two processes: no shared in-process guards.
    let a = EffectCache::new(ctx.pool().clone());
    let b = EffectCache::new(ctx.pool().clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let key = key("render", b"page image");

    let run = |cache: EffectCache| {
        let calls = Arc::clone(&calls);
        let key = key.clone();
        tokio::spawn(async move {
            cache
                .call(&key, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok("rendered".to_string())
                })
                .await
                .unwrap()
        })
    };

    let (first, second) = tokio::join!(run(a), run(b));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_ne!(first.replayed, second.replayed);
    assert_eq!(first.response, second.response);
}

#[tokio::test]
async fn failed_effect_records_nothing_and_retries() {
    let (_dir, ctx) = setup().await;
    let cache = ctx.effect_cache();
    let key = key("ocr-page", b"flaky");

    let err = cache
        .call(&key, || async { Err::<u32, _>(anyhow::anyhow!("endpoint down")) })
        .await
        .unwrap_err();
    assert!(matches!(err, EffectError::Failed(_)));
    assert!(!err.is_retryable());
    assert_eq!(ctx.side_effects().count().await.unwrap(), 0);

    let retried = cache.call(&key, || async { Ok(7u32) }).await.unwrap();
    assert!(!retried.replayed);
    assert_eq!(retried.response, 7);
}

#[tokio::test]
async fn distinct_content_gets_distinct_effects() {
    let (_dir, ctx) = setup().await;
    let cache = ctx.effect_cache();

    let old = cache
        .call(&key("store-raw", b"v1"), || async { Ok(1u32) })
        .await
        .unwrap();
    let edited = cache
        .call(&key("store-raw", b"v2"), || async { Ok(2u32) })
        .await
        .unwrap();

    assert!(!old.replayed);
    assert!(!edited.replayed);
    assert_eq!(edited.response, 2);

    let keys = ctx.side_effects().keys_for_run("run-effects").await.unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| k.starts_with("run-effects|store-raw|")));
}

#[tokio::test]
async fn context_caches_share_in_process_guards() {
    let (_dir, ctx) = setup().await;
    let key = key("store-parse", b"shared guards");
    let calls = Arc::new(AtomicUsize::new(0));
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let holder = {
        let cache = ctx.effect_cache();
        let calls = Arc::clone(&calls);
        let key = key.clone();
        tokio::spawn(async move {
            cache
                .call(&key, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok(7u32)
                })
                .await
                .unwrap()
        })
    };
    started_rx.await.unwrap();

    // A cache fetched separately from the same context sees the held key.
    assert_eq!(ctx.effect_cache().in_flight(), 1);

    let waiter = {
        let cache = ctx.effect_cache();
        let calls = Arc::clone(&calls);
        let key = key.clone();
        tokio::spawn(async move {
            cache
                .call(&key, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(8u32)
                })
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    release_tx.send(()).unwrap();

    let first = holder.await.unwrap();
    let second = waiter.await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(second.response, 7);
    assert_eq!(ctx.effect_cache().in_flight(), 0);
}
