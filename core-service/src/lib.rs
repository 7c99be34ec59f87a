//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (secure storage,
//! settings, clock) and the per-source adapters into the shared sync core.
//! Desktop apps typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`) and call [`bootstrap_desktop`]; other hosts build a
//! [`SyncEngineConfig`] themselves and hand it to [`SyncService::new`].
//!
//! ```ignore
//! use core_service::{AutoSyncScheduler, SyncService};
//!
//! let service = core_service::bootstrap_desktop().await?;
//! service.register_source(Arc::new(WeReadAdapter::new()), Some(refresher)).await;
//!
//! let scheduler = AutoSyncScheduler::new(service.clone());
//! scheduler.start();
//! ```

pub mod error;
pub mod scheduler;

pub use error::{CoreError, Result};
pub use scheduler::{AutoSyncReport, AutoSyncScheduler};

pub use core_runtime::config::SyncEngineConfig;

use std::sync::Arc;

use bridge_traits::storage::SettingsStore;
use core_auth::{CredentialStore, SingleFlightRefresh, SourceKind};
use core_runtime::events::{EventBus, EventStream};
use core_sync::{
    AdmissionQueue, ConcurrencyGate, CredentialRefresher, GuardedClient, IncrementalReconciler,
    Orchestrator, RunSummary, SettingsSyncStateRepository, SourceAdapter, SyncJob,
    SyncStateRepository, TokenBucketLimiter,
};
use tracing::{debug, info, warn};

/// Settings key holding the destination parent page id chosen by the user.
pub const DESTINATION_PARENT_KEY: &str = "destination.parentId";

/// Settings key prefix for the per-source auto-sync switch.
pub const AUTO_SYNC_KEY_PREFIX: &str = "autoSync.";

fn auto_sync_key(source: SourceKind) -> String {
    format!("{}{}", AUTO_SYNC_KEY_PREFIX, source.as_str())
}

/// Primary façade exposed to host applications.
///
/// Cheap to clone; every clone drives the same orchestrator.
#[derive(Clone)]
pub struct SyncService {
    config: SyncEngineConfig,
    credentials: CredentialStore,
    event_bus: EventBus,
    orchestrator: Arc<Orchestrator>,
}

impl SyncService {
    /// Build the service with unit records kept in the settings store.
    pub fn new(config: SyncEngineConfig) -> Self {
        let repository: Arc<dyn SyncStateRepository> = Arc::new(
            SettingsSyncStateRepository::new(config.settings_store.clone()),
        );
        Self::with_repository(config, repository)
    }

    /// Build the service on an explicit sync state repository.
    pub fn with_repository(
        config: SyncEngineConfig,
        repository: Arc<dyn SyncStateRepository>,
    ) -> Self {
        let event_bus = EventBus::default();
        let credentials = CredentialStore::new(config.secure_store.clone());
        let reconciler = Arc::new(
            IncrementalReconciler::new(repository, config.clock.clone())
                .with_batch_size(config.destination.create_batch_size),
        );
        let orchestrator = Orchestrator::new(
            AdmissionQueue::new(config.admission),
            ConcurrencyGate::new(config.gate_capacity),
            reconciler,
            event_bus.clone(),
        );

        info!(
            gate_capacity = config.gate_capacity,
            batch_size = config.destination.create_batch_size,
            "Sync service initialized"
        );

        Self {
            config,
            credentials,
            event_bus,
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Register a source adapter.
    ///
    /// Remote sources get their own rate limiter; local ones only when a
    /// per-source override is configured. When `refresher` is given, session
    /// expiry during a remote call triggers one shared credential refresh and
    /// a single retry.
    pub async fn register_source(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        refresher: Option<Arc<dyn CredentialRefresher>>,
    ) {
        let source = adapter.source();
        let mut client = GuardedClient::new(source);

        let has_override = self.config.source_rate_limits.contains_key(source.as_str());
        if source.is_remote() || has_override {
            let limiter = Arc::new(TokenBucketLimiter::new(
                source.as_str(),
                self.config.rate_limit_for(source.as_str()).clone(),
            ));
            client = client.with_limiter(limiter);
        } else {
            debug!(source = %source, "Local source, calls are not rate limited");
        }

        if let Some(refresher) = refresher {
            let single_flight = Arc::new(
                SingleFlightRefresh::new(source, self.credentials.clone(), self.event_bus.clone())
                    .with_timeout(self.config.refresh_timeout),
            );
            client = client.with_refresh(single_flight, refresher);
        }

        self.orchestrator.register_source(adapter, client).await;
    }

    pub async fn registered_sources(&self) -> Vec<SourceKind> {
        self.orchestrator.registered_sources().await
    }

    pub fn config(&self) -> &SyncEngineConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Subscribe to sync and auth events from this point on.
    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Snapshot of every job the admission queue knows about.
    pub fn jobs(&self) -> Vec<SyncJob> {
        self.orchestrator.queue().jobs()
    }

    /// Watch job snapshots as they change.
    pub fn subscribe_jobs(&self) -> tokio::sync::watch::Receiver<Vec<SyncJob>> {
        self.orchestrator.queue().subscribe()
    }

    /// Run one pass for `source`.
    ///
    /// Fails with `ConfigurationMissing` before contacting the source when no
    /// destination is configured.
    pub async fn sync_source(&self, source: SourceKind) -> Result<RunSummary> {
        self.require_destination().await?;
        Ok(self.orchestrator.sync_source(source).await?)
    }

    pub async fn sync_all(&self) -> Result<Vec<(SourceKind, core_sync::Result<RunSummary>)>> {
        self.require_destination().await?;
        Ok(self.orchestrator.sync_all().await)
    }

    /// Forget what was written for one item; the next pass rewrites it.
    pub async fn full_resync(&self, source: SourceKind, item_id: &str) -> Result<usize> {
        Ok(self.orchestrator.full_resync(source, item_id).await?)
    }

    /// Cancel a job that has not started yet.
    pub fn cancel(&self, source: SourceKind, item_id: &str) -> bool {
        self.orchestrator.queue().cancel(source, item_id)
    }

    /// Drop finished jobs from the queue snapshot.
    pub fn clear_completed(&self) -> usize {
        self.orchestrator.queue().clear_completed()
    }

    /// Sign a source out: drop its credential and its sync bookkeeping.
    pub async fn disconnect_source(&self, source: SourceKind) -> Result<usize> {
        self.credentials.clear_credential(source).await?;
        let removed = self.orchestrator.reconciler().clear_source(source).await?;
        info!(source = %source, removed, "Source disconnected");
        Ok(removed)
    }

    /// Whether a destination parent is known, from config or user settings.
    pub async fn destination_configured(&self) -> Result<bool> {
        if self.config.destination.is_configured() {
            return Ok(true);
        }
        let parent = self
            .settings()
            .get_string(DESTINATION_PARENT_KEY)
            .await?;
        Ok(parent.is_some_and(|id| !id.trim().is_empty()))
    }

    pub(crate) async fn require_destination(&self) -> Result<()> {
        if self.destination_configured().await? {
            return Ok(());
        }
        warn!("No destination configured, skipping sync");
        Err(CoreError::ConfigurationMissing(
            "choose a destination page before syncing".to_string(),
        ))
    }

    pub async fn set_destination_parent(&self, parent_id: &str) -> Result<()> {
        self.settings()
            .set_string(DESTINATION_PARENT_KEY, parent_id)
            .await?;
        debug!(parent_id, "Destination parent saved");
        Ok(())
    }

    /// Auto-sync is on for a source unless the user switched it off.
    pub async fn is_auto_sync_enabled(&self, source: SourceKind) -> Result<bool> {
        let enabled = self.settings().get_bool(&auto_sync_key(source)).await?;
        Ok(enabled.unwrap_or(true))
    }

    pub async fn set_auto_sync_enabled(&self, source: SourceKind, enabled: bool) -> Result<()> {
        self.settings()
            .set_bool(&auto_sync_key(source), enabled)
            .await?;
        debug!(source = %source, enabled, "Auto-sync preference saved");
        Ok(())
    }

    /// Stop dispatching new work. Queued jobs are cancelled.
    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
    }

    fn settings(&self) -> &dyn SettingsStore {
        self.config.settings_store.as_ref()
    }
}

/// Build a service on the desktop bridges under the platform data directory.
///
/// Credentials live in the OS keychain; settings and sync state live in two
/// SQLite files.
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop() -> Result<SyncService> {
    bootstrap_desktop_at(bridge_desktop::default_data_dir()).await
}

/// Like [`bootstrap_desktop`] with an explicit data directory.
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop_at(data_dir: std::path::PathBuf) -> Result<SyncService> {
    use bridge_desktop::{KeyringSecureStore, SqliteSettingsStore};
    use core_sync::SqliteSyncStateRepository;

    let settings = SqliteSettingsStore::new(data_dir.join("settings.db"))
        .await
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;
    let repository = SqliteSyncStateRepository::open(data_dir.join("sync_state.db"))
        .await
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;

    let config = SyncEngineConfig::builder()
        .secure_store(Arc::new(KeyringSecureStore::new()))
        .settings_store(Arc::new(settings))
        .build()?;

    info!(data_dir = ?data_dir, "Desktop bridges ready");
    Ok(SyncService::with_repository(config, Arc::new(repository)))
}
