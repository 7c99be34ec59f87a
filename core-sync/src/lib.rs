//! # Sync Orchestration & Reconciliation
//!
//! Pulls highlights from reading sources and writes them idempotently into an
//! external document workspace.
//!
//! ## Overview
//!
//! For each source the engine detects which items changed since the last
//! successful sync, fetches only what is needed without tripping
//! anti-automation defenses, and reconciles the result against entries it
//! wrote before.
//!
//! ## Components
//!
//! - **Admission Queue** (`admission_queue`): Deduplicates jobs, applies failure cooldown, publishes job snapshots
//! - **Rate Limiter** (`rate_limiter`): Per-service token bucket with cooldown, jitter and retry/backoff
//! - **Concurrency Gate** (`concurrency_gate`): Global bound on running jobs
//! - **Guarded Client** (`guarded`): Limiter plus single-flight credential refresh around remote calls
//! - **Reconciler** (`reconciler`, `fingerprint`): Content-hash diff producing create/update/skip
//! - **Repository** (`repository`): Unit records and per-item sync timestamps
//! - **Orchestrator** (`orchestrator`): Eligibility filter and sliding-window dispatch
//! - **Source Adapter** (`adapter`): Contract implemented once per data source

pub mod adapter;
pub mod admission_queue;
pub mod concurrency_gate;
pub mod error;
pub mod fingerprint;
pub mod guarded;
pub mod job;
pub mod orchestrator;
pub mod rate_limiter;
pub mod reconciler;
pub mod repository;

pub use adapter::{
    CandidateItem, ContainerId, DestinationMetadata, IndexEntry, SourceAdapter, Unit,
};
pub use admission_queue::AdmissionQueue;
pub use concurrency_gate::ConcurrencyGate;
pub use error::{Result, SyncError};
pub use fingerprint::fingerprint;
pub use guarded::{CredentialRefresher, GuardedClient};
pub use job::{JobKey, JobState, SyncJob};
pub use orchestrator::{is_eligible, Orchestrator, RunSummary};
pub use rate_limiter::{LimiterProfile, LimiterStatus, TokenBucketLimiter};
pub use reconciler::{merge_reviews, IncrementalReconciler, ReconcileOutcome};
pub use repository::{
    SettingsSyncStateRepository, SqliteSyncStateRepository, SyncStateRepository,
    SyncedUnitRecord,
};
