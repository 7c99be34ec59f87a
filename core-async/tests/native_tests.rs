//! Integration tests for the core-async facade.

use core_async::{sync, task, time};
use std::sync::Arc;

#[tokio::test]
async fn test_task_spawn() {
    let handle = task::spawn(async { 42 });
    let result = handle.await.unwrap();
    assert_eq!(result, 42);
}

#[tokio::test(start_paused = true)]
async fn test_sleep_follows_runtime_clock() {
    let start = time::Instant::now();
    time::sleep(time::Duration::from_secs(60)).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= time::Duration::from_secs(60));
    assert!(elapsed < time::Duration::from_secs(61));
}

#[tokio::test]
async fn test_timeout_failure() {
    let result = time::timeout(time::Duration::from_millis(10), async {
        time::sleep(time::Duration::from_millis(200)).await;
        42
    })
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_semaphore_limits_permits() {
    let semaphore = Arc::new(sync::Semaphore::new(2));
    let first = semaphore.clone().acquire_owned().await.unwrap();
    let _second = semaphore.clone().acquire_owned().await.unwrap();

    assert_eq!(semaphore.available_permits(), 0);
    drop(first);
    assert_eq!(semaphore.available_permits(), 1);
}

#[tokio::test]
async fn test_join_set_collects_all() {
    let mut set = task::JoinSet::new();
    for i in 0..5u32 {
        set.spawn(async move { i * 2 });
    }

    let mut results = Vec::new();
    while let Some(result) = set.join_next().await {
        results.push(result.unwrap());
    }
    results.sort_unstable();
    assert_eq!(results, vec![0, 2, 4, 6, 8]);
}

#[tokio::test]
async fn test_cancellation_token_wakes_waiters() {
    let token = sync::CancellationToken::new();
    let child = token.child_token();

    let waiter = task::spawn(async move {
        child.cancelled().await;
        "stopped"
    });

    token.cancel();
    assert_eq!(waiter.await.unwrap(), "stopped");
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn test_watch_channel() {
    let (tx, mut rx) = sync::watch::channel(0usize);
    tx.send(3).unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), 3);
}

#[test]
fn test_wall_clock_helpers() {
    let millis = time::now_millis();
    let secs = time::now_secs();
    assert!(millis > 0);
    assert!(secs.abs_diff(millis / 1000) <= 1);
}
