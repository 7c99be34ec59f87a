//! # Sync Job State Machine
//!
//! In-memory lifecycle of one per-item sync job, keyed by `source:itemId`.
//!
//! ## State Machine
//!
//! ```text
//! Queued → Running → Succeeded
//!   │         │
//!   │         └────→ Failed
//!   ├──────────────→ Failed
//!   └──────────────→ Cancelled
//! ```
//!
//! Terminal jobs stay visible until the admission queue purges them; a new
//! admission for the same key replaces a terminal job.

use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use core_auth::SourceKind;
use core_runtime::events::ErrorSummary;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Job Key
// ============================================================================

/// Identity of a sync job: one source item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub source: SourceKind,
    pub item_id: String,
}

impl JobKey {
    pub fn new(source: SourceKind, item_id: impl Into<String>) -> Self {
        Self {
            source,
            item_id: item_id.into(),
        }
    }

    /// Parse `"source:itemId"`. The item id may itself contain `:`.
    pub fn parse(s: &str) -> Option<Self> {
        let (source, item_id) = s.split_once(':')?;
        if item_id.is_empty() {
            return None;
        }
        Some(Self::new(SourceKind::parse(source)?, item_id))
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.as_str(), self.item_id)
    }
}

// ============================================================================
// Status Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl FromStr for JobState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(SyncError::InvalidStateTransition {
                from: other.to_string(),
                to: other.to_string(),
                reason: "unknown job state".to_string(),
            }),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Sync Job
// ============================================================================

/// Snapshot-friendly job record owned by the admission queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub key: JobKey,
    /// Display only
    pub title: String,
    /// Display only
    pub subtitle: Option<String>,
    pub state: JobState,
    pub progress: Option<String>,
    pub error: Option<ErrorSummary>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncJob {
    pub fn new(key: JobKey, title: impl Into<String>, subtitle: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            key,
            title: title.into(),
            subtitle,
            state: JobState::Queued,
            progress: None,
            error: None,
            enqueued_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, to: JobState, allowed_from: &[JobState]) -> Result<()> {
        if !allowed_from.contains(&self.state) {
            return Err(SyncError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
                reason: format!("job {} is {}", self.key, self.state),
            });
        }
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Queued → Running. Clears error info left from an earlier attempt.
    pub fn start(&mut self) -> Result<()> {
        self.transition(JobState::Running, &[JobState::Queued])?;
        self.error = None;
        Ok(())
    }

    /// Running → Succeeded.
    pub fn succeed(&mut self) -> Result<()> {
        self.transition(JobState::Succeeded, &[JobState::Running])?;
        self.progress = None;
        Ok(())
    }

    /// Queued | Running → Failed.
    pub fn fail(&mut self, error: ErrorSummary) -> Result<()> {
        self.transition(JobState::Failed, &[JobState::Queued, JobState::Running])?;
        self.error = Some(error);
        Ok(())
    }

    /// Queued → Cancelled. Running jobs cannot be cancelled.
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(JobState::Cancelled, &[JobState::Queued])
    }

    pub fn update_progress(&mut self, text: impl Into<String>) -> Result<()> {
        if self.state != JobState::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Running.to_string(),
                reason: "progress reported for a job that is not running".to_string(),
            });
        }
        self.progress = Some(text.into());
        self.updated_at = Utc::now();
        Ok(())
    }
}
