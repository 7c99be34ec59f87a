//! # Event Bus System
//!
//! Typed, broadcast-based events for the sync core using `tokio::sync::broadcast`.
//! Components never call into the UI; they publish events and any number of
//! subscribers (sync queue view, telemetry, tests) consume them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   emit    ┌───────────┐
//! │ Orchestrator     ├──────────>│           │
//! └──────────────────┘           │           │   subscribe   ┌────────────┐
//!                                │ EventBus  ├──────────────>│ Queue view │
//! ┌──────────────────┐   emit    │ (broadcast│               └────────────┘
//! │ SingleFlight     ├──────────>│  channel) │   subscribe   ┌────────────┐
//! │ Refresh          │           │           ├──────────────>│ Host UI    │
//! └──────────────────┘           └───────────┘               └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Started {
//!         job_key: "goodLinks:a1".to_string(),
//!         source: "goodLinks".to_string(),
//!         item_id: "a1".to_string(),
//!     }))
//!     .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.job_key(), Some("goodLinks:a1"));
//! # }
//! ```
//!
//! ## Event Types
//!
//! ### Sync Events (one job = one `source:itemId` key)
//! - `Enqueued`: Items accepted by the admission queue
//! - `Started`: Worker picked the job up inside a concurrency permit
//! - `Progress`: Free-form progress text
//! - `Succeeded`: Reconciliation finished with created/updated/skipped counts
//! - `Failed`: Terminal failure with a classified error summary
//! - `Skipped`: Item was not eligible (unchanged since the last sync)
//!
//! ### Auth Events
//! - `CredentialRefreshing` / `CredentialRefreshed` / `CredentialRefreshFailed`
//! - `CredentialCleared`
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; keep reading.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.
//!
//! `emit` returns an error when nobody is subscribed. Publishers ignore it with
//! `.ok()`; an event without listeners is not a failure.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sync job lifecycle events
    Sync(SyncEvent),
    /// Credential lifecycle events
    Auth(AuthEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Auth(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::CredentialRefreshFailed { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::CredentialCleared { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Succeeded { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Enqueued { .. }) => EventSeverity::Info,
            CoreEvent::Auth(AuthEvent::CredentialRefreshed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// The job key (`source:itemId`) a sync event refers to.
    pub fn job_key(&self) -> Option<&str> {
        match self {
            CoreEvent::Sync(e) => e.job_key(),
            CoreEvent::Auth(_) => None,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Failure Classification
// ============================================================================

/// Classified failure kind carried by terminal failure events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Connection reset, DNS failure, 5xx, timeout
    NetworkTransient,
    /// Session cookie or token no longer accepted; needs refresh or re-login
    AuthExpired,
    /// Anti-automation defenses engaged (HTTP 403/429 or a source hard-block code)
    RateLimitedOrBlocked,
    /// The remote API answered with an application error code
    RemoteApiError,
    /// Local bookkeeping storage failed
    LocalPersistenceError,
    /// Required configuration (destination container, credentials) is absent
    ConfigurationMissing,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NetworkTransient => "networkTransient",
            FailureKind::AuthExpired => "authExpired",
            FailureKind::RateLimitedOrBlocked => "rateLimitedOrBlocked",
            FailureKind::RemoteApiError => "remoteApiError",
            FailureKind::LocalPersistenceError => "localPersistenceError",
            FailureKind::ConfigurationMissing => "configurationMissing",
        }
    }

    /// Whether the user has to act (re-authenticate or configure) before a retry can help.
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            FailureKind::AuthExpired | FailureKind::ConfigurationMissing
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error summary attached to failed jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorSummary {
    pub kind: FailureKind,
    pub message: String,
    /// Remote status or API code when one was reported
    pub code: Option<i64>,
    pub details: Option<String>,
}

impl ErrorSummary {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            details: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events related to per-item sync jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Items accepted by the admission queue.
    Enqueued {
        /// Source key (e.g. "weRead").
        source: String,
        /// Raw item ids that were accepted.
        item_ids: Vec<String>,
    },
    /// Job started running.
    Started {
        /// `source:itemId`
        job_key: String,
        source: String,
        item_id: String,
    },
    /// Progress update for a running job.
    Progress {
        job_key: String,
        /// Human-readable progress text.
        text: String,
    },
    /// Job finished successfully.
    Succeeded {
        job_key: String,
        /// Destination entries created.
        created: u32,
        /// Destination entries updated in place.
        updated: u32,
        /// Units whose fingerprint matched.
        skipped: u32,
    },
    /// Job reached the failed state.
    Failed {
        job_key: String,
        error: ErrorSummary,
    },
    /// Item was filtered out before admission.
    Skipped {
        job_key: String,
        /// Why the item was skipped (e.g. "unchanged since last sync").
        reason: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Enqueued { .. } => "Sync jobs enqueued",
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::Succeeded { .. } => "Sync completed successfully",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Skipped { .. } => "Sync skipped",
        }
    }

    pub fn job_key(&self) -> Option<&str> {
        match self {
            SyncEvent::Enqueued { .. } => None,
            SyncEvent::Started { job_key, .. }
            | SyncEvent::Progress { job_key, .. }
            | SyncEvent::Succeeded { job_key, .. }
            | SyncEvent::Failed { job_key, .. }
            | SyncEvent::Skipped { job_key, .. } => Some(job_key),
        }
    }

    /// Whether this event ends the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncEvent::Succeeded { .. } | SyncEvent::Failed { .. })
    }
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Events related to source credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A credential refresh attempt started.
    CredentialRefreshing { source: String },
    /// The refreshed credential was stored.
    CredentialRefreshed { source: String },
    /// Refresh failed or timed out; every waiter received the error.
    CredentialRefreshFailed {
        source: String,
        message: String,
        /// Whether retrying later may succeed
        recoverable: bool,
    },
    /// The stored credential was removed.
    CredentialCleared { source: String },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::CredentialRefreshing { .. } => "Refreshing credential",
            AuthEvent::CredentialRefreshed { .. } => "Credential refreshed",
            AuthEvent::CredentialRefreshFailed { .. } => "Credential refresh failed",
            AuthEvent::CredentialCleared { .. } => "Credential cleared",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let failures = EventStream::new(event_bus.subscribe())
///     .filter(|event| event.severity() >= core_runtime::events::EventSeverity::Error);
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    /// Drains every event currently buffered that passes the filter.
    pub fn drain(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Some(result) = self.try_recv() {
            match result {
                Ok(event) => events.push(event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        events
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
