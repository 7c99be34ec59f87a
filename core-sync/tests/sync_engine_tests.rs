//! Integration tests for the sync engine
//!
//! These tests drive the orchestrator and reconciler against an in-memory
//! destination and verify:
//! - Idempotent reconciliation (create once, then skip; one update per change)
//! - Partial failures keep metadata but not the item timestamp
//! - Eligibility filtering and `skipped` events
//! - Bounded concurrency across a sliding window of workers
//! - Shutdown cancelling jobs that have not started

use async_trait::async_trait;
use bridge_traits::time::SystemClock;
use chrono::{DateTime, TimeZone, Utc};
use core_async::time::{sleep, Duration};
use core_auth::SourceKind;
use core_runtime::config::AdmissionConfig;
use core_runtime::events::{CoreEvent, EventBus, EventStream, FailureKind, SyncEvent};
use core_sync::{
    AdmissionQueue, CandidateItem, ConcurrencyGate, ContainerId, DestinationMetadata,
    GuardedClient, IncrementalReconciler, IndexEntry, JobState, Orchestrator, Result,
    SourceAdapter, SqliteSyncStateRepository, SyncError, SyncStateRepository, Unit,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Fake Source + Destination
// ============================================================================

#[derive(Default)]
struct FakeState {
    candidates: Vec<CandidateItem>,
    units: HashMap<String, Vec<Unit>>,
    /// container id -> unit id -> entry
    index: HashMap<String, HashMap<String, IndexEntry>>,
    metadata: HashMap<String, DestinationMetadata>,
    next_entry: u32,
    create_calls: usize,
    update_calls: usize,
    fail_updates: bool,
}

/// Source adapter backed by in-memory maps.
///
/// The destination never stores fingerprints, so the reconciler falls back to
/// its local content hashes.
struct FakeAdapter {
    source: SourceKind,
    state: Mutex<FakeState>,
    work_delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeAdapter {
    fn new(source: SourceKind) -> Self {
        Self {
            source,
            state: Mutex::new(FakeState::default()),
            work_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn with_work_delay(mut self, delay: Duration) -> Self {
        self.work_delay = delay;
        self
    }

    fn add_item(&self, item: CandidateItem, units: Vec<Unit>) {
        let mut state = self.state.lock().unwrap();
        state.units.insert(item.id.clone(), units);
        state.candidates.push(item);
    }

    fn set_units(&self, item_id: &str, units: Vec<Unit>) {
        self.state
            .lock()
            .unwrap()
            .units
            .insert(item_id.to_string(), units);
    }

    fn fail_updates(&self, fail: bool) {
        self.state.lock().unwrap().fail_updates = fail;
    }

    fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    fn update_calls(&self) -> usize {
        self.state.lock().unwrap().update_calls
    }

    fn metadata(&self, container: &str) -> Option<DestinationMetadata> {
        self.state.lock().unwrap().metadata.get(container).cloned()
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    fn source(&self) -> SourceKind {
        self.source
    }

    async fn list_candidates(&self) -> Result<Vec<CandidateItem>> {
        Ok(self.state.lock().unwrap().candidates.clone())
    }

    async fn fetch_remote_units(
        &self,
        item_id: &str,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Unit>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.work_delay.is_zero() {
            sleep(self.work_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(self
            .state
            .lock()
            .unwrap()
            .units
            .get(item_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn ensure_container(&self, item: &CandidateItem) -> Result<ContainerId> {
        let id = format!("page-{}", item.id);
        self.state
            .lock()
            .unwrap()
            .index
            .entry(id.clone())
            .or_default();
        Ok(ContainerId::new(id))
    }

    async fn fetch_destination_index(
        &self,
        container: &ContainerId,
    ) -> Result<HashMap<String, IndexEntry>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .index
            .get(container.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn create_destination_entries(
        &self,
        container: &ContainerId,
        units: &[Unit],
    ) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        let mut ids = Vec::with_capacity(units.len());
        for unit in units {
            state.next_entry += 1;
            let entry_id = format!("blk-{}", state.next_entry);
            state
                .index
                .entry(container.to_string())
                .or_default()
                .insert(unit.id.clone(), IndexEntry::new(entry_id.clone(), None));
            ids.push(entry_id);
        }
        Ok(ids)
    }

    async fn update_destination_entry(&self, entry_id: &str, _unit: &Unit) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_updates {
            return Err(SyncError::RemoteApi {
                code: 400,
                message: format!("block {} rejected", entry_id),
            });
        }
        state.update_calls += 1;
        Ok(())
    }

    async fn set_destination_metadata(
        &self,
        container: &ContainerId,
        metadata: &DestinationMetadata,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .metadata
            .insert(container.to_string(), metadata.clone());
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn modified(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
}

fn book(id: &str) -> CandidateItem {
    CandidateItem::new(id, format!("Book {}", id)).with_modified_at(modified(1))
}

fn highlights(n: usize) -> Vec<Unit> {
    (0..n)
        .map(|i| {
            Unit::new(format!("u{}", i), format!("highlight {}", i))
                .with_location(format!("{}-{}", i * 10, i * 10 + 5))
        })
        .collect()
}

async fn repository() -> Arc<dyn SyncStateRepository> {
    Arc::new(SqliteSyncStateRepository::in_memory().await.unwrap())
}

async fn orchestrator(
    adapter: Arc<FakeAdapter>,
    capacity: usize,
) -> (Arc<Orchestrator>, Arc<dyn SyncStateRepository>, EventBus) {
    let repo = repository().await;
    let bus = EventBus::new(1024);
    let reconciler = Arc::new(IncrementalReconciler::new(repo.clone(), Arc::new(SystemClock)));
    let orchestrator = Arc::new(Orchestrator::new(
        AdmissionQueue::new(AdmissionConfig::default()),
        ConcurrencyGate::new(capacity),
        reconciler,
        bus.clone(),
    ));
    let source = adapter.source();
    orchestrator
        .register_source(adapter, GuardedClient::new(source))
        .await;
    (orchestrator, repo, bus)
}

fn no_progress(_: &str) {}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn test_second_pass_skips_and_note_change_updates_once() {
    let adapter = FakeAdapter::new(SourceKind::AppleBooks);
    let repo = repository().await;
    let reconciler = IncrementalReconciler::new(repo.clone(), Arc::new(SystemClock));
    let item = book("b1");
    let units = highlights(3);

    let first = reconciler
        .reconcile(&adapter, &item, &units, &no_progress)
        .await
        .unwrap();
    assert_eq!(first.created, 3);
    assert_eq!(adapter.create_calls(), 1);

    let second = reconciler
        .reconcile(&adapter, &item, &units, &no_progress)
        .await
        .unwrap();
    assert_eq!((second.created, second.updated, second.skipped), (0, 0, 3));
    assert_eq!(adapter.create_calls(), 1);
    assert_eq!(adapter.update_calls(), 0);

    let mut edited = units.clone();
    edited[1].note = Some("worth rereading".to_string());
    let third = reconciler
        .reconcile(&adapter, &item, &edited, &no_progress)
        .await
        .unwrap();
    assert_eq!((third.updated, third.skipped), (1, 2));
    assert_eq!(adapter.update_calls(), 1);

    let records = repo
        .get_unit_records(SourceKind::AppleBooks, "b1")
        .await
        .unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records["u1"].content_hash, core_sync::fingerprint(&edited[1]));
}

#[tokio::test]
async fn test_creates_are_batched() {
    let adapter = FakeAdapter::new(SourceKind::WeRead);
    let reconciler =
        IncrementalReconciler::new(repository().await, Arc::new(SystemClock)).with_batch_size(50);
    let messages = Mutex::new(Vec::new());
    let progress = |text: &str| messages.lock().unwrap().push(text.to_string());

    let outcome = reconciler
        .reconcile(&adapter, &book("w1"), &highlights(120), &progress)
        .await
        .unwrap();

    assert_eq!(outcome.created, 120);
    assert_eq!(adapter.create_calls(), 3);
    let messages = messages.into_inner().unwrap();
    assert_eq!(messages.first().map(String::as_str), Some("Preparing destination"));
    assert_eq!(messages.last().map(String::as_str), Some("Writing entries 120/120"));
}

#[tokio::test]
async fn test_partial_failure_writes_metadata_but_not_timestamp() {
    let adapter = FakeAdapter::new(SourceKind::GoodLinks);
    let repo = repository().await;
    let reconciler = IncrementalReconciler::new(repo.clone(), Arc::new(SystemClock));
    let item = book("a1");
    let units = highlights(2);

    reconciler
        .reconcile(&adapter, &item, &units, &no_progress)
        .await
        .unwrap();
    repo.clear_last_synced(SourceKind::GoodLinks, "a1")
        .await
        .unwrap();

    adapter.fail_updates(true);
    let edited: Vec<Unit> = units
        .iter()
        .cloned()
        .map(|u| u.with_note("changed"))
        .collect();
    let outcome = reconciler
        .reconcile(&adapter, &item, &edited, &no_progress)
        .await
        .unwrap();

    assert_eq!(outcome.failed, 2);
    assert!(!outcome.is_complete());
    assert_eq!(adapter.metadata("page-a1").map(|m| m.count), Some(2));
    assert!(repo
        .get_last_synced(SourceKind::GoodLinks, "a1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_full_resync_recreates_entries() {
    let adapter = FakeAdapter::new(SourceKind::Dedao);
    let repo = repository().await;
    let reconciler = IncrementalReconciler::new(repo.clone(), Arc::new(SystemClock));
    let item = book("d1");
    let units = highlights(2);

    reconciler
        .reconcile(&adapter, &item, &units, &no_progress)
        .await
        .unwrap();
    assert_eq!(reconciler.full_resync(SourceKind::Dedao, "d1").await.unwrap(), 2);
    assert_eq!(reconciler.record_count(SourceKind::Dedao, "d1").await.unwrap(), 0);

    // Entries still exist remotely but have no token and no local hash
    let outcome = reconciler
        .reconcile(&adapter, &item, &units, &no_progress)
        .await
        .unwrap();
    assert_eq!(outcome.updated, 2);
    assert_eq!(reconciler.record_count(SourceKind::Dedao, "d1").await.unwrap(), 2);
}

// ============================================================================
// Orchestrator
// ============================================================================

#[tokio::test]
async fn test_sliding_window_respects_gate_capacity() {
    let adapter = Arc::new(
        FakeAdapter::new(SourceKind::AppleBooks).with_work_delay(Duration::from_millis(30)),
    );
    for i in 0..5 {
        adapter.add_item(book(&format!("b{}", i)), highlights(1));
    }
    let (orchestrator, _, bus) = orchestrator(adapter.clone(), 2).await;
    let mut events = EventStream::new(bus.subscribe());

    let summary = orchestrator.sync_source(SourceKind::AppleBooks).await.unwrap();

    assert_eq!(summary.enqueued, 5);
    assert_eq!(summary.succeeded, 5);
    assert!(adapter.peak() <= 2);
    assert!(orchestrator
        .queue()
        .jobs()
        .iter()
        .all(|job| job.state == JobState::Succeeded));

    // started precedes the terminal event for every key
    let mut started = Vec::new();
    for event in events.drain() {
        match event {
            CoreEvent::Sync(SyncEvent::Started { job_key, .. }) => started.push(job_key),
            CoreEvent::Sync(SyncEvent::Succeeded { job_key, .. }) => {
                assert!(started.contains(&job_key), "{} finished before starting", job_key)
            }
            _ => {}
        }
    }
    assert_eq!(started.len(), 5);
}

#[tokio::test]
async fn test_unchanged_items_emit_skipped() {
    let adapter = Arc::new(FakeAdapter::new(SourceKind::GoodLinks));
    adapter.add_item(book("a1"), highlights(2));
    adapter.add_item(CandidateItem::new("a2", "No timestamp"), highlights(1));
    let (orchestrator, _, bus) = orchestrator(adapter.clone(), 3).await;

    let first = orchestrator.sync_source(SourceKind::GoodLinks).await.unwrap();
    assert_eq!((first.enqueued, first.skipped), (2, 0));

    let mut events = EventStream::new(bus.subscribe());
    let second = orchestrator.sync_source(SourceKind::GoodLinks).await.unwrap();
    // a2 has no modification time and is always eligible
    assert_eq!((second.enqueued, second.skipped), (1, 1));

    let skipped: Vec<String> = events
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            CoreEvent::Sync(SyncEvent::Skipped { job_key, reason }) => {
                assert_eq!(reason, "unchanged since last sync");
                Some(job_key)
            }
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec!["goodLinks:a1".to_string()]);
}

#[tokio::test]
async fn test_modified_item_is_resynced() {
    let adapter = Arc::new(FakeAdapter::new(SourceKind::WeRead));
    adapter.add_item(book("w1"), highlights(1));
    let (orchestrator, repo, _) = orchestrator(adapter.clone(), 3).await;

    orchestrator.sync_source(SourceKind::WeRead).await.unwrap();
    let last = repo
        .get_last_synced(SourceKind::WeRead, "w1")
        .await
        .unwrap()
        .unwrap();

    {
        let mut state = adapter.state.lock().unwrap();
        state.candidates[0].modified_at = Some(last + chrono::Duration::seconds(5));
    }
    adapter.set_units("w1", highlights(2));

    let summary = orchestrator.sync_source(SourceKind::WeRead).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(adapter.create_calls(), 2);
}

#[tokio::test]
async fn test_partial_failure_marks_job_failed() {
    let adapter = Arc::new(FakeAdapter::new(SourceKind::Dedao));
    adapter.add_item(CandidateItem::new("d1", "Course"), highlights(2));
    let (orchestrator, _, bus) = orchestrator(adapter.clone(), 3).await;
    orchestrator.sync_source(SourceKind::Dedao).await.unwrap();

    adapter.set_units(
        "d1",
        highlights(2)
            .into_iter()
            .map(|u| u.with_note("edited"))
            .collect(),
    );
    adapter.fail_updates(true);
    let mut events = EventStream::new(bus.subscribe());

    let summary = orchestrator.sync_source(SourceKind::Dedao).await.unwrap();
    assert_eq!(summary.failed, 1);

    let job = orchestrator.queue().job(SourceKind::Dedao, "d1").unwrap();
    assert_eq!(job.state, JobState::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.kind, FailureKind::RemoteApiError);
    assert!(error.details.is_some());

    let failed = events.drain().into_iter().any(|event| {
        matches!(event, CoreEvent::Sync(SyncEvent::Failed { ref job_key, .. }) if job_key == "dedao:d1")
    });
    assert!(failed);

    // Failure cooldown rejects an immediate retry
    let retry = orchestrator.sync_source(SourceKind::Dedao).await.unwrap();
    assert_eq!(retry.enqueued, 0);
}

#[tokio::test]
async fn test_unregistered_source_is_configuration_missing() {
    let adapter = Arc::new(FakeAdapter::new(SourceKind::AppleBooks));
    let (orchestrator, _, _) = orchestrator(adapter, 1).await;

    let result = orchestrator.sync_source(SourceKind::WeRead).await;
    assert!(matches!(result, Err(SyncError::ConfigurationMissing(_))));
}

#[tokio::test]
async fn test_shutdown_cancels_jobs_not_yet_started() {
    let adapter = Arc::new(
        FakeAdapter::new(SourceKind::AppleBooks).with_work_delay(Duration::from_millis(200)),
    );
    for i in 0..3 {
        adapter.add_item(book(&format!("b{}", i)), highlights(1));
    }
    let (orchestrator, _, bus) = orchestrator(adapter.clone(), 1).await;
    let mut events = EventStream::new(bus.subscribe()).filter(|event| {
        matches!(event, CoreEvent::Sync(SyncEvent::Started { .. }))
    });

    let run = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.sync_source(SourceKind::AppleBooks).await })
    };
    events.recv().await.unwrap();
    orchestrator.shutdown();

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.cancelled, 2);

    let states: Vec<JobState> = orchestrator
        .queue()
        .jobs()
        .iter()
        .map(|job| job.state)
        .collect();
    assert_eq!(
        states.iter().filter(|s| **s == JobState::Cancelled).count(),
        2
    );
    assert!(matches!(
        orchestrator.sync_source(SourceKind::AppleBooks).await,
        Err(SyncError::Cancelled)
    ));
}

#[tokio::test]
async fn test_overlapping_runs_are_dropped() {
    let adapter = Arc::new(
        FakeAdapter::new(SourceKind::GoodLinks).with_work_delay(Duration::from_millis(100)),
    );
    adapter.add_item(book("a1"), highlights(1));
    let (orchestrator, _, _) = orchestrator(adapter, 1).await;

    let (first, second) = tokio::join!(
        orchestrator.sync_source(SourceKind::GoodLinks),
        async {
            sleep(Duration::from_millis(20)).await;
            orchestrator.sync_source(SourceKind::GoodLinks).await
        }
    );

    assert_eq!(first.unwrap().succeeded, 1);
    assert!(second.unwrap().already_running);
}
