//! Single-flight refresh behaviour under concurrency, timeout and reset.

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::SecureStore;
use core_auth::{AuthError, Credential, CredentialStore, SingleFlightRefresh, SourceKind};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, EventStream};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

// ============================================================================
// Test Doubles
// ============================================================================

#[derive(Default)]
struct MemorySecureStore {
    storage: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait::async_trait]
impl SecureStore for MemorySecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
        self.storage
            .lock()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
        Ok(self.storage.lock().await.get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
        self.storage.lock().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.storage.lock().await.keys().cloned().collect())
    }

    async fn clear_all(&self) -> BridgeResult<()> {
        self.storage.lock().await.clear();
        Ok(())
    }
}

fn setup() -> (Arc<SingleFlightRefresh>, CredentialStore, EventBus) {
    let store = CredentialStore::new(Arc::new(MemorySecureStore::default()));
    let bus = EventBus::new(64);
    let refresher = Arc::new(SingleFlightRefresh::new(
        SourceKind::WeRead,
        store.clone(),
        bus.clone(),
    ));
    (refresher, store, bus)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_refreshes_run_the_refresh_fn_once() {
    let (refresher, store, _bus) = setup();
    let calls = Arc::new(AtomicUsize::new(0));

    let make_call = |calls: Arc<AtomicUsize>| {
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Credential::new("wr_skey=fresh"))
        }
    };

    let (first, second) = tokio::join!(
        refresher.refresh(make_call(calls.clone())),
        refresher.refresh(make_call(calls.clone())),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.secret(), "wr_skey=fresh");

    let stored = store.get_credential(SourceKind::WeRead).await.unwrap().unwrap();
    assert_eq!(stored.secret(), "wr_skey=fresh");
    assert!(!refresher.is_refreshing().await);
}

#[tokio::test(start_paused = true)]
async fn test_slot_is_cleared_so_a_later_refresh_runs_again() {
    let (refresher, _store, _bus) = setup();
    let calls = Arc::new(AtomicUsize::new(0));

    for expected in 1..=2 {
        let counter = calls.clone();
        refresher
            .refresh(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Credential::new("cookie"))
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_shared_by_every_waiter() {
    let (refresher, store, _bus) = setup();

    let failing = || async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err(AuthError::SessionExpired(SourceKind::WeRead))
    };

    let (a, b) = tokio::join!(refresher.refresh(failing), refresher.refresh(failing));
    assert_eq!(a, Err(AuthError::SessionExpired(SourceKind::WeRead)));
    assert_eq!(a, b);
    assert!(store.get_credential(SourceKind::WeRead).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_times_out_after_fifteen_seconds() {
    let (refresher, _store, _bus) = setup();
    let started = tokio::time::Instant::now();

    let result = refresher
        .refresh(|| async {
            futures::future::pending::<()>().await;
            Ok(Credential::new("never"))
        })
        .await;

    assert!(matches!(
        result,
        Err(AuthError::OperationTimeout { timeout_secs: 15, .. })
    ));
    assert!(started.elapsed() >= Duration::from_secs(15));
    assert!(started.elapsed() < Duration::from_secs(16));
}

#[tokio::test(start_paused = true)]
async fn test_reset_cancels_in_flight_waiters() {
    let (refresher, _store, _bus) = setup();

    let waiter = {
        let refresher = refresher.clone();
        tokio::spawn(async move {
            refresher
                .refresh(|| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(Credential::new("late"))
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(refresher.is_refreshing().await);

    refresher.reset().await;
    let result = waiter.await.unwrap();
    assert_eq!(result, Err(AuthError::RefreshCancelled));
    assert!(!refresher.is_refreshing().await);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_emits_lifecycle_events() {
    let (refresher, _store, bus) = setup();
    let mut stream =
        EventStream::new(bus.subscribe()).filter(|event| matches!(event, CoreEvent::Auth(_)));

    refresher
        .refresh(|| async { Ok(Credential::new("cookie")) })
        .await
        .unwrap();

    assert_eq!(
        stream.recv().await.unwrap(),
        CoreEvent::Auth(AuthEvent::CredentialRefreshing {
            source: "weRead".to_string()
        })
    );
    assert_eq!(
        stream.recv().await.unwrap(),
        CoreEvent::Auth(AuthEvent::CredentialRefreshed {
            source: "weRead".to_string()
        })
    );
}
