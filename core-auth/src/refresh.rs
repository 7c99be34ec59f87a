//! # Single-Flight Credential Refresh
//!
//! When several workers hit an expired session at the same time only one
//! refresh may run. The first caller starts it; everyone arriving while it is
//! in flight awaits the same shared future and receives the same outcome.
//!
//! ```text
//! worker A ──refresh()──┐
//!                       ├──> [slot: Shared<refresh_fn + store>] ──> Credential
//! worker B ──refresh()──┘            (cleared once settled)
//! ```
//!
//! A refresh is bounded by a timeout (default 15s). `reset()` aborts an
//! in-flight attempt; its waiters receive `AuthError::RefreshCancelled`.

use crate::credential_store::CredentialStore;
use crate::error::{AuthError, Result};
use crate::types::{Credential, SourceKind};
use core_async::sync::Mutex;
use core_async::time::{timeout, Duration};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use futures::future::{abortable, AbortHandle, BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument, warn};

/// Default upper bound for a single refresh attempt.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

type SharedRefresh = Shared<BoxFuture<'static, Result<Credential>>>;

struct InFlight {
    id: u64,
    future: SharedRefresh,
    abort: AbortHandle,
}

/// Coordinates credential refreshes for one source.
pub struct SingleFlightRefresh {
    source: SourceKind,
    store: CredentialStore,
    event_bus: EventBus,
    timeout: Duration,
    slot: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
}

impl SingleFlightRefresh {
    pub fn new(source: SourceKind, store: CredentialStore, event_bus: EventBus) -> Self {
        Self {
            source,
            store,
            event_bus,
            timeout: DEFAULT_REFRESH_TIMEOUT,
            slot: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// Whether a refresh is currently in flight.
    pub async fn is_refreshing(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Refresh the credential, joining an in-flight attempt if there is one.
    ///
    /// `refresh_fn` is only invoked when this call starts a new attempt. On
    /// success the new credential is written to the `CredentialStore` before
    /// any waiter observes it.
    #[instrument(skip(self, refresh_fn), fields(source = %self.source))]
    pub async fn refresh<F, Fut>(&self, refresh_fn: F) -> Result<Credential>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Credential>> + Send + 'static,
    {
        let (id, future) = {
            let mut slot = self.slot.lock().await;
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!(attempt = in_flight.id, "Joining in-flight credential refresh");
                    (in_flight.id, in_flight.future.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let attempt = run_attempt(
                        self.source,
                        self.store.clone(),
                        self.event_bus.clone(),
                        self.timeout,
                        refresh_fn(),
                    );
                    let (attempt, abort) = abortable(attempt);
                    let future = attempt
                        .map(|outcome| outcome.unwrap_or(Err(AuthError::RefreshCancelled)))
                        .boxed()
                        .shared();

                    *slot = Some(InFlight {
                        id,
                        future: future.clone(),
                        abort,
                    });
                    (id, future)
                }
            }
        };

        let result = future.await;

        let mut slot = self.slot.lock().await;
        if slot.as_ref().map_or(false, |in_flight| in_flight.id == id) {
            *slot = None;
        }

        result
    }

    /// Abort any in-flight refresh and clear the slot.
    pub async fn reset(&self) {
        if let Some(in_flight) = self.slot.lock().await.take() {
            warn!(source = %self.source, attempt = in_flight.id, "Aborting in-flight credential refresh");
            in_flight.abort.abort();
        }
    }
}

async fn run_attempt<Fut>(
    source: SourceKind,
    store: CredentialStore,
    event_bus: EventBus,
    limit: Duration,
    refresh: Fut,
) -> Result<Credential>
where
    Fut: Future<Output = Result<Credential>> + Send + 'static,
{
    let source_key = source.as_str().to_string();
    event_bus
        .emit(CoreEvent::Auth(AuthEvent::CredentialRefreshing {
            source: source_key.clone(),
        }))
        .ok();

    let outcome = match timeout(limit, refresh).await {
        Ok(Ok(credential)) => store
            .update_credential(source, &credential)
            .await
            .map(|_| credential),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(AuthError::OperationTimeout {
            operation: "credential refresh".to_string(),
            timeout_secs: limit.as_secs(),
        }),
    };

    match &outcome {
        Ok(_) => {
            info!(source = %source, "Credential refreshed");
            event_bus
                .emit(CoreEvent::Auth(AuthEvent::CredentialRefreshed { source: source_key }))
                .ok();
        }
        Err(e) => {
            warn!(source = %source, error = %e, "Credential refresh failed");
            event_bus
                .emit(CoreEvent::Auth(AuthEvent::CredentialRefreshFailed {
                    source: source_key,
                    message: e.to_string(),
                    recoverable: e.is_recoverable(),
                }))
                .ok();
        }
    }

    outcome
}
