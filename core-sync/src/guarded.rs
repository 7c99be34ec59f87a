//! Guarded remote calls: rate limiting, retries and one credential refresh on
//! session expiry.

use crate::error::Result;
use crate::rate_limiter::TokenBucketLimiter;
use async_trait::async_trait;
use core_auth::{Credential, SingleFlightRefresh, SourceKind};
use core_runtime::events::FailureKind;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Obtains a fresh session credential for a source (re-login, cookie renewal).
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh_credential(&self) -> core_auth::Result<Credential>;
}

struct RefreshBinding {
    single_flight: Arc<SingleFlightRefresh>,
    refresher: Arc<dyn CredentialRefresher>,
}

/// Wraps every remote call made on behalf of one source.
pub struct GuardedClient {
    source: SourceKind,
    limiter: Option<Arc<TokenBucketLimiter>>,
    refresh: Option<RefreshBinding>,
}

impl GuardedClient {
    /// Calls pass straight through until a limiter or refresher is attached.
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            limiter: None,
            refresh: None,
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<TokenBucketLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_refresh(
        mut self,
        single_flight: Arc<SingleFlightRefresh>,
        refresher: Arc<dyn CredentialRefresher>,
    ) -> Self {
        self.refresh = Some(RefreshBinding {
            single_flight,
            refresher,
        });
        self
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn limiter(&self) -> Option<&Arc<TokenBucketLimiter>> {
        self.limiter.as_ref()
    }

    /// Run `op` through the limiter. On session expiry refresh the credential
    /// once (shared with concurrent callers) and retry the call once.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let error = match self.run(&mut op).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if error.kind() != FailureKind::AuthExpired {
            return Err(error);
        }
        let Some(binding) = &self.refresh else {
            debug!(source = %self.source, "Session expired and no refresher configured");
            return Err(error);
        };

        info!(source = %self.source, error = %error, "Session expired, refreshing credential");
        let refresher = binding.refresher.clone();
        binding
            .single_flight
            .refresh(move || async move { refresher.refresh_credential().await })
            .await?;

        self.run(&mut op).await.map_err(|e| {
            warn!(source = %self.source, error = %e, "Call failed after credential refresh");
            e
        })
    }

    async fn run<T, F, Fut>(&self, op: &mut F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match &self.limiter {
            Some(limiter) => limiter.execute(|| op()).await,
            None => op().await,
        }
    }
}
