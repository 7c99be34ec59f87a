//! # Auto-Sync Scheduler
//!
//! Runs a sync pass for every enabled source on a fixed interval, plus
//! on-demand triggers from the host UI.
//!
//! A pass is skipped entirely with `ConfigurationMissing` while no destination
//! parent is configured. Sources whose `autoSync.<source>` setting is `false`
//! are left out of scheduled and `trigger_now` passes but can still be synced
//! through [`AutoSyncScheduler::trigger_source`].

use crate::error::Result;
use crate::SyncService;
use chrono::{DateTime, Utc};
use core_async::sync::CancellationToken;
use core_async::time::{interval_at, Duration, Instant, MissedTickBehavior};
use core_auth::SourceKind;
use core_sync::RunSummary;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Outcome of one scheduled or `trigger_now` pass.
#[derive(Debug, Default)]
pub struct AutoSyncReport {
    /// Per-source run results, ordered by source.
    pub runs: Vec<(SourceKind, core_sync::Result<RunSummary>)>,
    /// Sources left out because auto-sync is switched off for them.
    pub disabled: Vec<SourceKind>,
}

impl AutoSyncReport {
    pub fn enqueued(&self) -> usize {
        self.runs
            .iter()
            .filter_map(|(_, run)| run.as_ref().ok())
            .map(|summary| summary.enqueued)
            .sum()
    }
}

#[derive(Default)]
struct SchedulerState {
    stop: Option<CancellationToken>,
    next_run_at: Option<DateTime<Utc>>,
}

fn lock(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct AutoSyncScheduler {
    service: SyncService,
    interval: Duration,
    state: Arc<Mutex<SchedulerState>>,
}

impl AutoSyncScheduler {
    /// Scheduler using the configured `scheduler_interval`.
    pub fn new(service: SyncService) -> Self {
        let interval = service.config().scheduler_interval;
        Self::with_interval(service, interval)
    }

    pub fn with_interval(service: SyncService, interval: Duration) -> Self {
        Self {
            service,
            interval,
            state: Arc::new(Mutex::new(SchedulerState::default())),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).stop.is_some()
    }

    /// Wall-clock time of the next scheduled pass, if the timer is running.
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).next_run_at
    }

    /// Start the interval timer. Returns `false` if it was already running.
    ///
    /// The first pass runs one interval from now. Must be called from within a
    /// tokio runtime.
    pub fn start(&self) -> bool {
        let mut state = lock(&self.state);
        if state.stop.is_some() {
            return false;
        }

        let stop = CancellationToken::new();
        let period = self.interval;
        state.next_run_at = next_run_from(&self.service, period);
        state.stop = Some(stop.clone());

        let service = self.service.clone();
        let shared = self.state.clone();
        core_async::task::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match run_pass(&service).await {
                    Ok(report) => info!(
                        sources = report.runs.len(),
                        disabled = report.disabled.len(),
                        enqueued = report.enqueued(),
                        "Scheduled sync pass finished"
                    ),
                    Err(err) => warn!(error = %err, "Scheduled sync pass skipped"),
                }

                if !record_next_run(&shared, &stop, &service, period) {
                    break;
                }
            }
            debug!("Auto-sync timer exited");
        });

        info!(interval_secs = period.as_secs(), "Auto-sync started");
        true
    }

    /// Stop the timer. A pass already in progress runs to completion.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        let Some(stop) = state.stop.take() else {
            return;
        };
        stop.cancel();
        state.next_run_at = None;
        info!("Auto-sync stopped");
    }

    /// Run a pass for every enabled source now.
    pub async fn trigger_now(&self) -> Result<AutoSyncReport> {
        run_pass(&self.service).await
    }

    /// Sync one source now, regardless of its auto-sync setting.
    pub async fn trigger_source(&self, source: SourceKind) -> Result<RunSummary> {
        self.service.sync_source(source).await
    }
}

impl Drop for AutoSyncScheduler {
    fn drop(&mut self) {
        if let Some(stop) = lock(&self.state).stop.take() {
            stop.cancel();
        }
    }
}

/// Returns `false` once the timer owning `stop` has been stopped.
fn record_next_run(
    state: &Mutex<SchedulerState>,
    stop: &CancellationToken,
    service: &SyncService,
    period: Duration,
) -> bool {
    let mut state = lock(state);
    if stop.is_cancelled() {
        return false;
    }
    state.next_run_at = next_run_from(service, period);
    true
}

fn next_run_from(service: &SyncService, period: Duration) -> Option<DateTime<Utc>> {
    let period = chrono::Duration::from_std(period).ok()?;
    service.config().clock.now().checked_add_signed(period)
}

async fn run_pass(service: &SyncService) -> Result<AutoSyncReport> {
    service.require_destination().await?;

    let mut report = AutoSyncReport::default();
    let mut enabled = Vec::new();
    for source in service.registered_sources().await {
        if service.is_auto_sync_enabled(source).await? {
            enabled.push(source);
        } else {
            debug!(source = %source, "Auto-sync disabled for source");
            report.disabled.push(source);
        }
    }

    let runs = enabled.iter().map(|source| service.orchestrator().sync_source(*source));
    let results = futures::future::join_all(runs).await;
    report.runs = enabled.into_iter().zip(results).collect();
    Ok(report)
}
