//! # Sync Orchestrator
//!
//! Runs one sync pass per source:
//!
//! 1. List candidate items through the source's guarded client.
//! 2. Filter by eligibility against the remembered last-sync time; ineligible
//!    items emit `skipped` events.
//! 3. Submit eligible items to the admission queue.
//! 4. Dispatch accepted items into a sliding window of workers, at most
//!    `gate.capacity()` at a time, topping up as each finishes.
//!
//! Each worker holds a gate permit while it fetches units, folds in reviews
//! and reconciles. For one job key `started` always precedes the terminal
//! event.
//!
//! Once the shutdown token fires no new workers start; jobs still waiting
//! are cancelled and in-flight jobs run to completion.

use crate::adapter::{CandidateItem, SourceAdapter};
use crate::admission_queue::AdmissionQueue;
use crate::concurrency_gate::ConcurrencyGate;
use crate::error::{Result, SyncError};
use crate::guarded::GuardedClient;
use crate::job::JobKey;
use crate::reconciler::{merge_reviews, IncrementalReconciler, ReconcileOutcome};
use crate::repository::SyncStateRepository;
use chrono::{DateTime, Utc};
use core_async::sync::{CancellationToken, RwLock};
use core_async::task::JoinSet;
use core_auth::SourceKind;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Whether an item needs syncing given its modification time and the last
/// successful sync.
pub fn is_eligible(modified_at: Option<DateTime<Utc>>, last_synced: Option<DateTime<Utc>>) -> bool {
    match (modified_at, last_synced) {
        (_, None) => true,
        (None, Some(_)) => true,
        (Some(modified), Some(last)) => modified > last,
    }
}

/// Counts for one `sync_source` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub enqueued: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// The pass was dropped because another pass for the source was running
    pub already_running: bool,
}

#[derive(Clone)]
struct SourceHandle {
    adapter: Arc<dyn SourceAdapter>,
    client: Arc<GuardedClient>,
}

/// Marks a source as running until dropped.
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<SourceKind>>,
    source: SourceKind,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a Mutex<HashSet<SourceKind>>, source: SourceKind) -> Option<Self> {
        let mut set = running.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(source) {
            return None;
        }
        Some(Self { running, source })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.source);
    }
}

enum WorkerOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// Everything a worker task needs, cloned per job.
#[derive(Clone)]
struct WorkerContext {
    queue: AdmissionQueue,
    gate: ConcurrencyGate,
    reconciler: Arc<IncrementalReconciler>,
    repository: Arc<dyn SyncStateRepository>,
    event_bus: EventBus,
    shutdown: CancellationToken,
    handle: SourceHandle,
}

impl WorkerContext {
    fn emit(&self, event: SyncEvent) {
        self.event_bus.emit(CoreEvent::Sync(event)).ok();
    }

    async fn run(self, item: CandidateItem) -> WorkerOutcome {
        let source = self.handle.adapter.source();

        let permit = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            permit = self.gate.acquire() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.queue.cancel(source, &item.id);
            return WorkerOutcome::Cancelled;
        };

        let key = JobKey::new(source, item.id.clone()).to_string();
        if !self.queue.on_started(source, &item.id) {
            debug!(job_key = %key, "Job no longer queued, not starting");
            return WorkerOutcome::Cancelled;
        }
        self.emit(SyncEvent::Started {
            job_key: key.clone(),
            source: source.as_str().to_string(),
            item_id: item.id.clone(),
        });

        match self.process(&item, &key).await {
            Ok(outcome) => {
                self.queue.on_succeeded(source, &item.id);
                self.emit(SyncEvent::Succeeded {
                    job_key: key,
                    created: outcome.created,
                    updated: outcome.updated,
                    skipped: outcome.skipped,
                });
                WorkerOutcome::Succeeded
            }
            Err(e) => {
                warn!(job_key = %key, error = %e, kind = %e.kind(), "Sync job failed");
                let summary = e.summary();
                self.queue.on_failed(source, &item.id, summary.clone());
                self.emit(SyncEvent::Failed {
                    job_key: key,
                    error: summary,
                });
                WorkerOutcome::Failed
            }
        }
    }

    #[instrument(skip(self, item, key), fields(job_key = %key))]
    async fn process(&self, item: &CandidateItem, key: &str) -> Result<ReconcileOutcome> {
        let adapter = &self.handle.adapter;
        let client = &self.handle.client;
        let source = adapter.source();

        let progress = |text: &str| {
            self.queue.on_progress(source, &item.id, text);
            self.emit(SyncEvent::Progress {
                job_key: key.to_string(),
                text: text.to_string(),
            });
        };

        let since = self.repository.get_last_synced(source, &item.id).await?;
        progress("Fetching highlights");
        let units = client
            .call(|| adapter.fetch_remote_units(&item.id, since))
            .await?;
        let reviews = client.call(|| adapter.fetch_reviews(&item.id)).await?;
        let units = merge_reviews(units, reviews);
        debug!(units = units.len(), "Fetched units");

        let outcome = self
            .reconciler
            .reconcile(adapter.as_ref(), item, &units, &progress)
            .await?;

        if outcome.failed > 0 {
            return Err(SyncError::PartialFailure {
                failed: outcome.failed,
                total: outcome.total,
            });
        }
        Ok(outcome)
    }
}

/// Drives sync passes for every registered source.
pub struct Orchestrator {
    queue: AdmissionQueue,
    gate: ConcurrencyGate,
    reconciler: Arc<IncrementalReconciler>,
    repository: Arc<dyn SyncStateRepository>,
    event_bus: EventBus,
    sources: RwLock<HashMap<SourceKind, SourceHandle>>,
    running: Mutex<HashSet<SourceKind>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        queue: AdmissionQueue,
        gate: ConcurrencyGate,
        reconciler: Arc<IncrementalReconciler>,
        event_bus: EventBus,
    ) -> Self {
        let repository = reconciler.repository().clone();
        Self {
            queue,
            gate,
            reconciler,
            repository,
            event_bus,
            sources: RwLock::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register (or replace) the adapter for its source.
    pub async fn register_source(&self, adapter: Arc<dyn SourceAdapter>, client: GuardedClient) {
        let source = adapter.source();
        let handle = SourceHandle {
            adapter,
            client: Arc::new(client),
        };
        self.sources.write().await.insert(source, handle);
        info!(source = %source, "Registered source adapter");
    }

    pub async fn registered_sources(&self) -> Vec<SourceKind> {
        let mut sources: Vec<SourceKind> = self.sources.read().await.keys().copied().collect();
        sources.sort();
        sources
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn reconciler(&self) -> &Arc<IncrementalReconciler> {
        &self.reconciler
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn is_running(&self, source: SourceKind) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&source)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run one pass for `source`.
    #[instrument(skip(self), fields(source = %source, run_id = %Uuid::new_v4()))]
    pub async fn sync_source(&self, source: SourceKind) -> Result<RunSummary> {
        if self.shutdown.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let handle = self
            .sources
            .read()
            .await
            .get(&source)
            .cloned()
            .ok_or_else(|| {
                SyncError::ConfigurationMissing(format!("No adapter registered for {}", source))
            })?;

        let Some(_guard) = RunGuard::acquire(&self.running, source) else {
            info!("Sync already running for source, dropping overlapping run");
            return Ok(RunSummary {
                already_running: true,
                ..RunSummary::default()
            });
        };

        let mut summary = RunSummary::default();
        let candidates = handle
            .client
            .call(|| handle.adapter.list_candidates())
            .await?;

        let mut eligible = Vec::with_capacity(candidates.len());
        for item in candidates {
            let last_synced = self.repository.get_last_synced(source, &item.id).await?;
            if is_eligible(item.modified_at, last_synced) {
                eligible.push(item);
            } else {
                summary.skipped += 1;
                self.event_bus
                    .emit(CoreEvent::Sync(SyncEvent::Skipped {
                        job_key: JobKey::new(source, item.id.clone()).to_string(),
                        reason: "unchanged since last sync".to_string(),
                    }))
                    .ok();
            }
        }

        let accepted = self.queue.enqueue(source, &eligible);
        let mut pending: VecDeque<CandidateItem> = eligible
            .into_iter()
            .filter(|item| accepted.contains(&item.id))
            .collect();
        summary.enqueued = pending.len();

        if pending.is_empty() {
            debug!(skipped = summary.skipped, "Nothing to sync");
            return Ok(summary);
        }
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Enqueued {
                source: source.as_str().to_string(),
                item_ids: pending.iter().map(|item| item.id.clone()).collect(),
            }))
            .ok();

        let context = WorkerContext {
            queue: self.queue.clone(),
            gate: self.gate.clone(),
            reconciler: self.reconciler.clone(),
            repository: self.repository.clone(),
            event_bus: self.event_bus.clone(),
            shutdown: self.shutdown.clone(),
            handle,
        };

        let mut workers = JoinSet::new();
        let initial = self.gate.capacity().min(pending.len());
        for _ in 0..initial {
            if let Some(item) = pending.pop_front() {
                workers.spawn(context.clone().run(item));
            }
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(WorkerOutcome::Succeeded) => summary.succeeded += 1,
                Ok(WorkerOutcome::Failed) => summary.failed += 1,
                Ok(WorkerOutcome::Cancelled) => summary.cancelled += 1,
                Err(e) => {
                    error!(error = %e, "Sync worker aborted");
                    summary.failed += 1;
                }
            }

            if self.shutdown.is_cancelled() {
                continue;
            }
            if let Some(item) = pending.pop_front() {
                workers.spawn(context.clone().run(item));
            }
        }

        // Left over only after shutdown; `shutdown()` may already have cancelled them
        summary.cancelled += pending.len();
        for item in pending {
            self.queue.cancel(source, &item.id);
        }

        info!(
            enqueued = summary.enqueued,
            skipped = summary.skipped,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Sync pass finished"
        );
        Ok(summary)
    }

    /// Run a pass for every registered source concurrently.
    pub async fn sync_all(&self) -> Vec<(SourceKind, Result<RunSummary>)> {
        let sources = self.registered_sources().await;
        let runs = sources.iter().map(|source| self.sync_source(*source));
        let results = futures::future::join_all(runs).await;
        sources.into_iter().zip(results).collect()
    }

    /// Forget what was written for an item so the next pass rewrites it.
    pub async fn full_resync(&self, source: SourceKind, item_id: &str) -> Result<usize> {
        self.reconciler.full_resync(source, item_id).await
    }

    /// Stop dispatching. Queued jobs are cancelled, running jobs finish.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let cancelled = self.queue.cancel_all_queued(None);
        info!(cancelled, "Orchestrator shutting down");
    }
}
