//! # Token Bucket Rate Limiter
//!
//! One limiter per external service. Every remote call waits for a token,
//! failures push the service into a cooldown, and `execute` wraps a call with
//! retries and exponential backoff.
//!
//! ## Behaviour
//!
//! - Tokens refill lazily on `wait()`: `floor(elapsed * refill_rate)` whole
//!   tokens, capped at `max_tokens`.
//! - A consumed token is followed by a random jitter sleep.
//! - `max_consecutive_failures` failures, or a single anti-automation
//!   response, block all traffic for the cooldown period.
//! - The state mutex is never held across a sleep.

use crate::error::{Result, SyncError};
use core_async::sync::Mutex;
use core_async::time::{sleep, Duration, Instant};
use core_auth::SourceKind;
use core_runtime::config::RateLimitConfig;
use core_runtime::events::FailureKind;
use rand::Rng;
use std::future::Future;
use tracing::{debug, warn};

// ============================================================================
// Source Profiles
// ============================================================================

/// Per-source mapping from raw remote failures to `SyncError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterProfile {
    Generic,
    WeRead,
    Dedao,
}

/// WeRead reports an expired session with this API code.
const WEREAD_SESSION_EXPIRED: i64 = -2012;
/// Dedao answers with this code when it blocks automated traffic.
const DEDAO_BLOCKED: i64 = 496;

impl LimiterProfile {
    pub fn for_source(source: SourceKind) -> Self {
        match source {
            SourceKind::WeRead => LimiterProfile::WeRead,
            SourceKind::Dedao => LimiterProfile::Dedao,
            SourceKind::AppleBooks | SourceKind::GoodLinks => LimiterProfile::Generic,
        }
    }

    /// Map an HTTP status to an error. Returns `None` for 2xx/3xx.
    pub fn classify_status(&self, status: u16, message: &str) -> Option<SyncError> {
        match status {
            200..=399 => None,
            401 => Some(SyncError::AuthExpired(message.to_string())),
            403 | 429 => Some(SyncError::RateLimited {
                status: status as i64,
                message: message.to_string(),
            }),
            500..=599 => Some(SyncError::Network(format!("HTTP {}: {}", status, message))),
            _ => Some(SyncError::RemoteApi {
                code: status as i64,
                message: message.to_string(),
            }),
        }
    }

    /// Map an application-level API code to an error. Returns `None` for 0.
    pub fn classify_api_code(&self, code: i64, message: &str) -> Option<SyncError> {
        if code == 0 {
            return None;
        }

        let error = match (self, code) {
            (LimiterProfile::WeRead, WEREAD_SESSION_EXPIRED) => {
                SyncError::AuthExpired(message.to_string())
            }
            (LimiterProfile::WeRead, code) if code < -1000 => SyncError::RateLimited {
                status: code,
                message: message.to_string(),
            },
            (LimiterProfile::Dedao, DEDAO_BLOCKED) => SyncError::RateLimited {
                status: code,
                message: message.to_string(),
            },
            (_, code) => SyncError::RemoteApi {
                code,
                message: message.to_string(),
            },
        };
        Some(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    Authentication,
    AntiAutomation,
    Other,
}

fn classify(error: &SyncError) -> FailureClass {
    match error.kind() {
        FailureKind::AuthExpired => FailureClass::Authentication,
        FailureKind::RateLimitedOrBlocked => FailureClass::AntiAutomation,
        _ => FailureClass::Other,
    }
}

// ============================================================================
// Limiter
// ============================================================================

#[derive(Debug)]
struct LimiterState {
    tokens: u32,
    last_refill: Instant,
    consecutive_failures: u32,
    in_cooldown: bool,
    cooldown_started: Option<Instant>,
}

impl LimiterState {
    fn enter_cooldown(&mut self, now: Instant) {
        self.in_cooldown = true;
        self.cooldown_started = Some(now);
    }

    fn exit_cooldown(&mut self) {
        self.in_cooldown = false;
        self.cooldown_started = None;
        self.consecutive_failures = 0;
    }
}

enum WaitStep {
    Proceed(Duration),
    Sleep(Duration),
}

/// Snapshot of the limiter state for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterStatus {
    pub tokens: u32,
    pub consecutive_failures: u32,
    pub in_cooldown: bool,
}

pub struct TokenBucketLimiter {
    name: String,
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl TokenBucketLimiter {
    /// Create a full bucket.
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        let state = LimiterState {
            tokens: config.max_tokens,
            last_refill: Instant::now(),
            consecutive_failures: 0,
            in_cooldown: false,
            cooldown_started: None,
        };
        Self {
            name: name.into(),
            config,
            state: Mutex::new(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub async fn status(&self) -> LimiterStatus {
        let state = self.state.lock().await;
        LimiterStatus {
            tokens: state.tokens,
            consecutive_failures: state.consecutive_failures,
            in_cooldown: state.in_cooldown,
        }
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.config.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Wait until a request may be sent.
    pub async fn wait(&self) {
        loop {
            let step = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                if state.in_cooldown {
                    let started = state.cooldown_started.unwrap_or(now);
                    let elapsed = now.saturating_duration_since(started);
                    if elapsed < self.config.cooldown {
                        WaitStep::Sleep(self.config.cooldown - elapsed)
                    } else {
                        debug!(limiter = %self.name, "Cooldown elapsed, resuming traffic");
                        state.exit_cooldown();
                        continue;
                    }
                } else {
                    let elapsed = now.saturating_duration_since(state.last_refill);
                    let new_tokens = (elapsed.as_secs_f64() * self.config.refill_rate).floor();
                    if new_tokens >= 1.0 {
                        let added = new_tokens.min(self.config.max_tokens as f64) as u32;
                        state.tokens = (state.tokens + added).min(self.config.max_tokens);
                        state.last_refill = now;
                    }

                    if state.tokens > 0 {
                        state.tokens -= 1;
                        WaitStep::Proceed(self.jitter())
                    } else {
                        WaitStep::Sleep(self.config.refill_interval())
                    }
                }
            };

            match step {
                WaitStep::Proceed(jitter) => {
                    if !jitter.is_zero() {
                        sleep(jitter).await;
                    }
                    return;
                }
                WaitStep::Sleep(duration) => sleep(duration).await,
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;
    }

    /// Record a failed call. Returns whether retrying is worthwhile.
    pub async fn record_failure(&self, error: &SyncError) -> bool {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let max = self.config.max_consecutive_failures;

        if classify(error) == FailureClass::AntiAutomation {
            state.consecutive_failures = max;
            state.enter_cooldown(now);
            warn!(
                limiter = %self.name,
                cooldown_secs = self.config.cooldown.as_secs(),
                error = %error,
                "Anti-automation response, entering cooldown"
            );
            return true;
        }

        state.consecutive_failures += 1;
        if state.consecutive_failures >= max && !state.in_cooldown {
            state.enter_cooldown(now);
            warn!(
                limiter = %self.name,
                failures = state.consecutive_failures,
                "Failure threshold reached, entering cooldown"
            );
        }
        state.consecutive_failures < max
    }

    /// Run `op` under the limiter with retries.
    ///
    /// Authentication failures return at once so the caller can refresh the
    /// session; other failures back off (×3 for anti-automation responses)
    /// and retry up to `max_attempts` times.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 1;

        loop {
            self.wait().await;

            let error = match op().await {
                Ok(value) => {
                    self.record_success().await;
                    return Ok(value);
                }
                Err(error) => error,
            };

            let class = classify(&error);
            if class == FailureClass::Authentication {
                debug!(limiter = %self.name, "Authentication failure, not retrying");
                return Err(error);
            }

            let should_retry = self.record_failure(&error).await;
            if attempt >= self.config.max_attempts {
                warn!(limiter = %self.name, attempts = attempt, error = %error, "Giving up");
                return Err(error);
            }

            if class == FailureClass::AntiAutomation {
                backoff *= self.config.anti_automation_multiplier;
            }
            warn!(
                limiter = %self.name,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Request failed, backing off"
            );
            sleep(backoff).await;
            backoff *= 2;

            if !should_retry {
                return Err(error);
            }
            attempt += 1;
        }
    }
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}
