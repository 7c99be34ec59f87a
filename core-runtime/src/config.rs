//! # Sync Engine Configuration
//!
//! Provides configuration management for the sync core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! `SyncEngineConfig` holding the host bridges and tuning knobs for every
//! component (admission queue, rate limiters, concurrency gate, reconciler,
//! scheduler). It enforces fail-fast validation so a misconfigured engine
//! never starts.
//!
//! ## Required Dependencies
//!
//! - `SecureStore` - Required for credential persistence
//! - `SettingsStore` - Required for sync bookkeeping and user preferences
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `Clock` - Wall clock for sync timestamps (default: `SystemClock`)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{RateLimitConfig, SyncEngineConfig};
//! use std::sync::Arc;
//!
//! let config = SyncEngineConfig::builder()
//!     .secure_store(Arc::new(MySecureStore))
//!     .settings_store(Arc::new(MySettingsStore))
//!     .gate_capacity(2)
//!     .source_rate_limit("dedao", RateLimitConfig::new().with_max_tokens(3))
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! The builder validates all required dependencies and provides actionable error
//! messages when capabilities are missing:
//!
//! ```should_panic
//! use core_runtime::config::SyncEngineConfig;
//!
//! let config = SyncEngineConfig::builder()
//!     .gate_capacity(3)
//!     .build()
//!     .expect("Should fail - missing required bridges");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, SecureStore, SettingsStore, SystemClock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default number of jobs allowed to run at once across all sources.
pub const DEFAULT_GATE_CAPACITY: usize = 3;
/// Default number of units sent per destination create call.
pub const DEFAULT_CREATE_BATCH_SIZE: usize = 50;
/// Default credential refresh timeout.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);
/// Default auto-sync interval.
pub const DEFAULT_SCHEDULER_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Sync engine configuration.
///
/// Use [`SyncEngineConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct SyncEngineConfig {
    /// Secure credential storage (required)
    pub secure_store: Arc<dyn SecureStore>,

    /// Settings storage (required)
    pub settings_store: Arc<dyn SettingsStore>,

    /// Wall clock used for sync timestamps
    pub clock: Arc<dyn Clock>,

    /// Global concurrency gate capacity, shared by every source
    pub gate_capacity: usize,

    /// Upper bound for a single credential refresh
    pub refresh_timeout: Duration,

    /// Auto-sync interval
    pub scheduler_interval: Duration,

    /// Limiter settings used when a source has no override
    pub rate_limit: RateLimitConfig,

    /// Per-source limiter overrides keyed by source key (e.g. "weRead")
    pub source_rate_limits: HashMap<String, RateLimitConfig>,

    /// Admission queue settings
    pub admission: AdmissionConfig,

    /// Destination settings
    pub destination: DestinationConfig,
}

impl std::fmt::Debug for SyncEngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngineConfig")
            .field("secure_store", &"SecureStore { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field("clock", &"Clock { ... }")
            .field("gate_capacity", &self.gate_capacity)
            .field("refresh_timeout", &self.refresh_timeout)
            .field("scheduler_interval", &self.scheduler_interval)
            .field("rate_limit", &self.rate_limit)
            .field("source_rate_limits", &self.source_rate_limits)
            .field("admission", &self.admission)
            .field("destination", &self.destination)
            .finish()
    }
}

impl SyncEngineConfig {
    /// Creates a new builder for constructing a `SyncEngineConfig`.
    pub fn builder() -> SyncEngineConfigBuilder {
        SyncEngineConfigBuilder::default()
    }

    /// Limiter settings for `source`, falling back to the shared default.
    pub fn rate_limit_for(&self, source: &str) -> &RateLimitConfig {
        self.source_rate_limits
            .get(source)
            .unwrap_or(&self.rate_limit)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Gate capacity is within 1..=32
    /// - Refresh timeout and scheduler interval are non-zero
    /// - Every limiter, admission and destination sub-config
    pub fn validate(&self) -> Result<()> {
        if self.gate_capacity == 0 {
            return Err(Error::Config(
                "Gate capacity must be at least 1. Use .gate_capacity() to set it.".to_string(),
            ));
        }

        if self.gate_capacity > 32 {
            return Err(Error::Config(
                "Gate capacity exceeds maximum of 32 concurrent jobs".to_string(),
            ));
        }

        if self.refresh_timeout.is_zero() {
            return Err(Error::Config(
                "Refresh timeout must be greater than 0. Use .refresh_timeout() to set it."
                    .to_string(),
            ));
        }

        if self.scheduler_interval < Duration::from_secs(1) {
            return Err(Error::Config(
                "Scheduler interval must be at least one second. \
                 Use .scheduler_interval() to set it."
                    .to_string(),
            ));
        }

        self.rate_limit.validate()?;
        for (source, limits) in &self.source_rate_limits {
            limits
                .validate()
                .map_err(|e| Error::InvalidSourceRateLimit {
                    source_kind: source.clone(),
                    reason: e.to_string(),
                })?;
        }

        self.admission.validate()?;
        self.destination.validate()?;

        Ok(())
    }
}

// ============================================================================
// Rate Limiting
// ============================================================================

/// Token bucket and retry settings for one external service.
///
/// # Example
///
/// ```
/// use core_runtime::config::RateLimitConfig;
/// use std::time::Duration;
///
/// let config = RateLimitConfig::new()
///     .with_max_tokens(3)
///     .with_refill_rate(0.25)
///     .with_cooldown(Duration::from_secs(120));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Bucket capacity
    pub max_tokens: u32,
    /// Tokens added per second
    pub refill_rate: f64,
    /// How long all traffic is blocked once the failure threshold is hit
    pub cooldown: Duration,
    /// Consecutive failures before entering cooldown
    pub max_consecutive_failures: u32,
    /// Upper bound of the random delay added after each token
    pub max_jitter: Duration,
    /// Attempts made by `execute` before giving up
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles afterwards
    pub initial_backoff: Duration,
    /// Backoff multiplier applied when anti-automation defenses engage
    pub anti_automation_multiplier: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self {
            max_tokens: 5,
            refill_rate: 0.5,
            cooldown: Duration::from_secs(60),
            max_consecutive_failures: 3,
            max_jitter: Duration::from_millis(200),
            max_attempts: 3,
            initial_backoff: Duration::from_secs(3),
            anti_automation_multiplier: 3,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_refill_rate(mut self, refill_rate: f64) -> Self {
        self.refill_rate = refill_rate;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_max_consecutive_failures(mut self, failures: u32) -> Self {
        self.max_consecutive_failures = failures;
        self
    }

    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_anti_automation_multiplier(mut self, multiplier: u32) -> Self {
        self.anti_automation_multiplier = multiplier;
        self
    }

    /// Seconds between two tokens.
    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refill_rate)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::Config(
                "Rate limiter max_tokens must be at least 1".to_string(),
            ));
        }

        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(Error::Config(
                "Rate limiter refill_rate must be a positive number of tokens per second"
                    .to_string(),
            ));
        }

        if self.max_consecutive_failures == 0 {
            return Err(Error::Config(
                "Rate limiter max_consecutive_failures must be at least 1".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(Error::Config(
                "Rate limiter max_attempts must be at least 1".to_string(),
            ));
        }

        if self.anti_automation_multiplier == 0 {
            return Err(Error::Config(
                "Rate limiter anti_automation_multiplier must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Admission
// ============================================================================

/// Admission queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// A failed key cannot be re-admitted until this window has elapsed
    pub cooldown_window: Duration,
    /// Grace period before finished jobs are purged once nothing is active
    pub cleanup_delay: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionConfig {
    pub fn new() -> Self {
        Self {
            cooldown_window: Duration::from_secs(60),
            cleanup_delay: Duration::from_secs(5 * 60),
        }
    }

    pub fn with_cooldown_window(mut self, window: Duration) -> Self {
        self.cooldown_window = window;
        self
    }

    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cleanup_delay.is_zero() {
            return Err(Error::Config(
                "Admission cleanup_delay must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Destination
// ============================================================================

/// Destination workspace settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationConfig {
    /// Parent container under which per-source containers are created.
    /// `None` means the host has not configured a destination yet.
    pub parent_id: Option<String>,
    /// Units sent per create call
    pub create_batch_size: usize,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DestinationConfig {
    pub fn new() -> Self {
        Self {
            parent_id: None,
            create_batch_size: DEFAULT_CREATE_BATCH_SIZE,
        }
    }

    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_create_batch_size(mut self, batch_size: usize) -> Self {
        self.create_batch_size = batch_size;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.parent_id
            .as_deref()
            .map_or(false, |id| !id.trim().is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.create_batch_size == 0 {
            return Err(Error::Config(
                "Destination create_batch_size must be at least 1".to_string(),
            ));
        }

        // The destination API caps a single append at 100 children
        if self.create_batch_size > 100 {
            return Err(Error::Config(
                "Destination create_batch_size exceeds maximum of 100".to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Builder
// ============================================================================

fn secure_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SecureStore".to_string(),
        message: "SecureStore implementation is required for credential persistence. \
                 Desktop: use bridge_desktop::KeyringSecureStore. \
                 Tests: inject an in-memory SecureStore."
            .to_string(),
    }
}

fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "SettingsStore implementation is required for sync bookkeeping. \
                 Desktop: use bridge_desktop::SqliteSettingsStore. \
                 Tests: use SqliteSettingsStore::in_memory()."
            .to_string(),
    }
}

/// Builder for constructing [`SyncEngineConfig`] instances.
///
/// Call [`build()`](SyncEngineConfigBuilder::build) to validate and create the
/// final config.
#[derive(Default)]
pub struct SyncEngineConfigBuilder {
    secure_store: Option<Arc<dyn SecureStore>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    clock: Option<Arc<dyn Clock>>,
    gate_capacity: Option<usize>,
    refresh_timeout: Option<Duration>,
    scheduler_interval: Option<Duration>,
    rate_limit: Option<RateLimitConfig>,
    source_rate_limits: HashMap<String, RateLimitConfig>,
    admission: Option<AdmissionConfig>,
    destination: Option<DestinationConfig>,
}

impl SyncEngineConfigBuilder {
    /// Sets the secure store implementation (required).
    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    /// Sets the settings store implementation (required).
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets how many jobs may run at once (default: 3).
    pub fn gate_capacity(mut self, capacity: usize) -> Self {
        self.gate_capacity = Some(capacity);
        self
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = Some(timeout);
        self
    }

    pub fn scheduler_interval(mut self, interval: Duration) -> Self {
        self.scheduler_interval = Some(interval);
        self
    }

    /// Sets the limiter settings shared by sources without an override.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    /// Overrides limiter settings for one source key.
    pub fn source_rate_limit(mut self, source: impl Into<String>, config: RateLimitConfig) -> Self {
        self.source_rate_limits.insert(source.into(), config);
        self
    }

    pub fn admission(mut self, config: AdmissionConfig) -> Self {
        self.admission = Some(config);
        self
    }

    pub fn destination(mut self, config: DestinationConfig) -> Self {
        self.destination = Some(config);
        self
    }

    /// Builds the final configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::CapabilityMissing` when a required bridge is absent and
    /// `Error::Config` when a value is out of range.
    pub fn build(self) -> Result<SyncEngineConfig> {
        let secure_store = self.secure_store.ok_or_else(secure_store_missing_error)?;
        let settings_store = self
            .settings_store
            .ok_or_else(settings_store_missing_error)?;

        let config = SyncEngineConfig {
            secure_store,
            settings_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            gate_capacity: self.gate_capacity.unwrap_or(DEFAULT_GATE_CAPACITY),
            refresh_timeout: self.refresh_timeout.unwrap_or(DEFAULT_REFRESH_TIMEOUT),
            scheduler_interval: self
                .scheduler_interval
                .unwrap_or(DEFAULT_SCHEDULER_INTERVAL),
            rate_limit: self.rate_limit.unwrap_or_default(),
            source_rate_limits: self.source_rate_limits,
            admission: self.admission.unwrap_or_default(),
            destination: self.destination.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}
