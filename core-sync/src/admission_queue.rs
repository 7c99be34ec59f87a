//! # Admission Queue
//!
//! Decides which items may start a sync job and tracks job status for
//! observers.
//!
//! ## Rules
//!
//! - At most one queued/running job per `source:itemId` key; duplicates are
//!   rejected silently.
//! - A key that failed less than `cooldown_window` ago cannot be re-admitted.
//!   Authentication failures do not start a cooldown.
//! - Terminal jobs stay visible until nothing is active for `cleanup_delay`,
//!   then jobs and cooldown entries are purged. New activity cancels a
//!   pending cleanup.
//! - Every mutation publishes a snapshot on a `watch` channel.
//!
//! All state sits behind one `std::sync::Mutex`. Methods are synchronous and
//! never await or perform I/O while holding it.

use crate::adapter::CandidateItem;
use crate::job::{JobKey, JobState, SyncJob};
use core_async::runtime::Handle;
use core_async::sync::watch;
use core_async::task::AbortHandle;
use core_async::time::{sleep, Instant};
use core_auth::SourceKind;
use core_runtime::config::AdmissionConfig;
use core_runtime::events::{ErrorSummary, FailureKind};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobKey, SyncJob>,
    cooldowns: HashMap<JobKey, Instant>,
    cleanup: Option<AbortHandle>,
}

impl QueueState {
    fn has_active(&self) -> bool {
        self.jobs.values().any(|job| job.state.is_active())
    }

    fn snapshot(&self) -> Vec<SyncJob> {
        let mut jobs: Vec<SyncJob> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        jobs
    }
}

struct Shared {
    state: Mutex<QueueState>,
    snapshots: watch::Sender<Vec<SyncJob>>,
    config: AdmissionConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panic while holding the lock leaves the maps consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn purge_if_idle(&self) {
        let mut state = self.lock();
        state.cleanup = None;
        if state.has_active() {
            return;
        }
        let purged = state.jobs.len();
        state.jobs.clear();
        state.cooldowns.clear();
        self.snapshots.send_replace(Vec::new());
        debug!(purged, "Purged finished sync jobs");
    }
}

/// Admission control and status registry for sync jobs.
#[derive(Clone)]
pub struct AdmissionQueue {
    shared: Arc<Shared>,
}

impl AdmissionQueue {
    pub fn new(config: AdmissionConfig) -> Self {
        let (snapshots, _) = watch::channel(Vec::new());
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                snapshots,
                config,
            }),
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.shared.config
    }

    /// Admit `items` for `source`. Returns the ids that were accepted.
    pub fn enqueue(&self, source: SourceKind, items: &[CandidateItem]) -> HashSet<String> {
        let mut accepted = HashSet::new();
        let mut state = self.shared.lock();
        let now = Instant::now();

        for item in items {
            let key = JobKey::new(source, item.id.clone());

            if let Some(failed_at) = state.cooldowns.get(&key).copied() {
                if now.saturating_duration_since(failed_at) < self.shared.config.cooldown_window {
                    debug!(job_key = %key, "Rejected: failure cooldown in effect");
                    continue;
                }
                state.cooldowns.remove(&key);
            }

            if state
                .jobs
                .get(&key)
                .map_or(false, |job| job.state.is_active())
            {
                debug!(job_key = %key, "Rejected: job already active");
                continue;
            }

            let job = SyncJob::new(key.clone(), item.title.clone(), item.subtitle.clone());
            state.jobs.insert(key, job);
            accepted.insert(item.id.clone());
        }

        if !accepted.is_empty() {
            info!(source = %source, accepted = accepted.len(), offered = items.len(), "Admitted sync jobs");
            self.publish(&mut state);
        }
        accepted
    }

    pub fn is_active(&self, source: SourceKind, item_id: &str) -> bool {
        let key = JobKey::new(source, item_id);
        self.shared
            .lock()
            .jobs
            .get(&key)
            .map_or(false, |job| job.state.is_active())
    }

    /// Subset of `item_ids` with a queued or running job.
    pub fn active_ids<'a, I>(&self, source: SourceKind, item_ids: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let state = self.shared.lock();
        item_ids
            .into_iter()
            .filter(|id| {
                state
                    .jobs
                    .get(&JobKey::new(source, *id))
                    .map_or(false, |job| job.state.is_active())
            })
            .map(str::to_string)
            .collect()
    }

    /// Queued → Running. Returns `false` when the job is not queued (for
    /// example cancelled in the meantime).
    pub fn on_started(&self, source: SourceKind, item_id: &str) -> bool {
        self.update(source, item_id, "start", |job, _| job.start())
    }

    pub fn on_progress(&self, source: SourceKind, item_id: &str, text: &str) {
        self.update(source, item_id, "progress", |job, _| job.update_progress(text));
    }

    pub fn on_succeeded(&self, source: SourceKind, item_id: &str) {
        self.update(source, item_id, "succeed", |job, cooldowns| {
            job.succeed()?;
            cooldowns.remove(&job.key);
            Ok(())
        });
    }

    pub fn on_failed(&self, source: SourceKind, item_id: &str, error: ErrorSummary) {
        let records_cooldown = error.kind != FailureKind::AuthExpired;
        self.update(source, item_id, "fail", move |job, cooldowns| {
            job.fail(error)?;
            if records_cooldown {
                cooldowns.insert(job.key.clone(), Instant::now());
            }
            Ok(())
        });
    }

    /// Cancel a queued job. Running jobs are left alone.
    pub fn cancel(&self, source: SourceKind, item_id: &str) -> bool {
        let key = JobKey::new(source, item_id);
        let mut state = self.shared.lock();
        let cancelled = match state.jobs.get_mut(&key) {
            Some(job) if job.state == JobState::Queued => job.cancel().is_ok(),
            _ => false,
        };
        if cancelled {
            debug!(job_key = %key, "Cancelled queued job");
            self.publish(&mut state);
        }
        cancelled
    }

    /// Cancel every queued job, optionally limited to one source.
    pub fn cancel_all_queued(&self, source: Option<SourceKind>) -> usize {
        let mut state = self.shared.lock();
        let mut cancelled = 0;
        for job in state.jobs.values_mut() {
            if job.state == JobState::Queued
                && source.map_or(true, |s| s == job.key.source)
                && job.cancel().is_ok()
            {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(cancelled, "Cancelled queued jobs");
            self.publish(&mut state);
        }
        cancelled
    }

    /// Drop terminal jobs from the registry now. Cooldown entries are kept.
    pub fn clear_completed(&self) -> usize {
        let mut state = self.shared.lock();
        let before = state.jobs.len();
        state.jobs.retain(|_, job| job.state.is_active());
        let removed = before - state.jobs.len();
        if removed > 0 {
            self.publish(&mut state);
        }
        removed
    }

    pub fn job(&self, source: SourceKind, item_id: &str) -> Option<SyncJob> {
        self.shared
            .lock()
            .jobs
            .get(&JobKey::new(source, item_id))
            .cloned()
    }

    /// All jobs, oldest first.
    pub fn jobs(&self) -> Vec<SyncJob> {
        self.shared.lock().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<SyncJob>> {
        self.shared.snapshots.subscribe()
    }

    /// Apply a job transition. Returns whether it took effect.
    fn update<F>(&self, source: SourceKind, item_id: &str, action: &str, apply: F) -> bool
    where
        F: FnOnce(&mut SyncJob, &mut HashMap<JobKey, Instant>) -> crate::Result<()>,
    {
        let key = JobKey::new(source, item_id);
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let Some(job) = state.jobs.get_mut(&key) else {
            debug!(job_key = %key, action, "Status update for unknown job ignored");
            return false;
        };
        if let Err(e) = apply(job, &mut state.cooldowns) {
            debug!(job_key = %key, action, error = %e, "Status update ignored");
            return false;
        }
        self.publish(state);
        true
    }

    fn publish(&self, state: &mut QueueState) {
        self.shared.snapshots.send_replace(state.snapshot());
        self.reschedule_cleanup(state);
    }

    fn reschedule_cleanup(&self, state: &mut QueueState) {
        if state.has_active() {
            if let Some(pending) = state.cleanup.take() {
                pending.abort();
            }
            return;
        }
        if state.cleanup.is_some() || state.jobs.is_empty() {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            warn!("No async runtime; finished jobs will not be purged automatically");
            return;
        };
        let delay = self.shared.config.cleanup_delay;
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let task = handle.spawn(async move {
            sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.purge_if_idle();
            }
        });
        state.cleanup = Some(task.abort_handle());
    }
}

impl Default for AdmissionQueue {
    fn default() -> Self {
        Self::new(AdmissionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_async::time::Duration;

    fn item(id: &str) -> CandidateItem {
        CandidateItem::new(id, format!("Title {}", id))
    }

    fn network_error() -> ErrorSummary {
        ErrorSummary::new(FailureKind::NetworkTransient, "connection reset")
    }

    #[tokio::test]
    async fn test_rejects_active_duplicates() {
        let queue = AdmissionQueue::default();
        let first = queue.enqueue(SourceKind::AppleBooks, &[item("b1")]);
        assert!(first.contains("b1"));

        let second = queue.enqueue(SourceKind::AppleBooks, &[item("b1")]);
        assert!(second.is_empty());

        queue.on_started(SourceKind::AppleBooks, "b1");
        assert!(queue
            .enqueue(SourceKind::AppleBooks, &[item("b1")])
            .is_empty());
        assert!(queue.is_active(SourceKind::AppleBooks, "b1"));
    }

    #[tokio::test]
    async fn test_same_id_in_different_sources_is_distinct() {
        let queue = AdmissionQueue::default();
        queue.enqueue(SourceKind::AppleBooks, &[item("x")]);
        let accepted = queue.enqueue(SourceKind::GoodLinks, &[item("x")]);
        assert!(accepted.contains("x"));
    }

    #[tokio::test]
    async fn test_success_allows_immediate_readmission() {
        let queue = AdmissionQueue::default();
        queue.enqueue(SourceKind::WeRead, &[item("w1")]);
        queue.on_started(SourceKind::WeRead, "w1");
        queue.on_succeeded(SourceKind::WeRead, "w1");

        let accepted = queue.enqueue(SourceKind::WeRead, &[item("w1")]);
        assert!(accepted.contains("w1"));
        assert_eq!(
            queue.job(SourceKind::WeRead, "w1").map(|j| j.state),
            Some(JobState::Queued)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_cooldown_window() {
        let queue = AdmissionQueue::default();
        queue.enqueue(SourceKind::GoodLinks, &[item("a1")]);
        queue.on_started(SourceKind::GoodLinks, "a1");
        queue.on_failed(SourceKind::GoodLinks, "a1", network_error());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(queue.enqueue(SourceKind::GoodLinks, &[item("a1")]).is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(queue
            .enqueue(SourceKind::GoodLinks, &[item("a1")])
            .contains("a1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failures_skip_cooldown() {
        let queue = AdmissionQueue::default();
        queue.enqueue(SourceKind::Dedao, &[item("d1")]);
        queue.on_started(SourceKind::Dedao, "d1");
        queue.on_failed(
            SourceKind::Dedao,
            "d1",
            ErrorSummary::new(FailureKind::AuthExpired, "cookie expired"),
        );

        assert!(queue.enqueue(SourceKind::Dedao, &[item("d1")]).contains("d1"));
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_ignored() {
        let queue = AdmissionQueue::default();
        queue.enqueue(SourceKind::AppleBooks, &[item("b1")]);
        queue.on_succeeded(SourceKind::AppleBooks, "b1");
        queue.on_progress(SourceKind::AppleBooks, "b1", "halfway");
        queue.on_started(SourceKind::AppleBooks, "missing");

        let job = queue.job(SourceKind::AppleBooks, "b1").unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.progress.is_none());
    }

    #[tokio::test]
    async fn test_failed_job_carries_error_and_start_clears_it() {
        let queue = AdmissionQueue::new(AdmissionConfig::new().with_cooldown_window(Duration::ZERO));
        queue.enqueue(SourceKind::GoodLinks, &[item("a1")]);
        queue.on_failed(SourceKind::GoodLinks, "a1", network_error());
        assert_eq!(
            queue
                .job(SourceKind::GoodLinks, "a1")
                .and_then(|j| j.error)
                .map(|e| e.kind),
            Some(FailureKind::NetworkTransient)
        );

        queue.enqueue(SourceKind::GoodLinks, &[item("a1")]);
        queue.on_started(SourceKind::GoodLinks, "a1");
        assert!(queue.job(SourceKind::GoodLinks, "a1").unwrap().error.is_none());
    }

    #[tokio::test]
    async fn test_cancel_queued_only() {
        let queue = AdmissionQueue::default();
        queue.enqueue(SourceKind::WeRead, &[item("w1"), item("w2"), item("w3")]);
        queue.on_started(SourceKind::WeRead, "w1");

        assert!(!queue.cancel(SourceKind::WeRead, "w1"));
        assert!(queue.cancel(SourceKind::WeRead, "w2"));
        assert_eq!(queue.cancel_all_queued(Some(SourceKind::Dedao)), 0);
        assert_eq!(queue.cancel_all_queued(None), 1);

        let active = queue.active_ids(SourceKind::WeRead, ["w1", "w2", "w3"]);
        assert_eq!(active, HashSet::from(["w1".to_string()]));
    }

    #[tokio::test]
    async fn test_snapshots_are_published() {
        let queue = AdmissionQueue::default();
        let mut rx = queue.subscribe();

        queue.enqueue(SourceKind::AppleBooks, &[item("b1"), item("b2")]);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 2);

        queue.on_started(SourceKind::AppleBooks, "b1");
        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert!(snapshot
            .iter()
            .any(|j| j.key.item_id == "b1" && j.state == JobState::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_purges_after_idle_delay() {
        let queue = AdmissionQueue::default();
        queue.enqueue(SourceKind::GoodLinks, &[item("a1")]);
        queue.on_started(SourceKind::GoodLinks, "a1");
        queue.on_succeeded(SourceKind::GoodLinks, "a1");
        assert_eq!(queue.jobs().len(), 1);

        tokio::time::sleep(Duration::from_secs(4 * 60)).await;
        assert_eq!(queue.jobs().len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(queue.jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_activity_cancels_cleanup() {
        let queue = AdmissionQueue::default();
        queue.enqueue(SourceKind::GoodLinks, &[item("a1")]);
        queue.on_failed(SourceKind::GoodLinks, "a1", network_error());

        tokio::time::sleep(Duration::from_secs(4 * 60)).await;
        queue.enqueue(SourceKind::GoodLinks, &[item("a2")]);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert_eq!(queue.jobs().len(), 2);
    }

    #[tokio::test]
    async fn test_clear_completed_keeps_active_jobs() {
        let queue = AdmissionQueue::default();
        queue.enqueue(SourceKind::AppleBooks, &[item("b1"), item("b2")]);
        queue.cancel(SourceKind::AppleBooks, "b2");

        assert_eq!(queue.clear_completed(), 1);
        let jobs = queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].key.item_id, "b1");
    }
}
