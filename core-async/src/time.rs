//! Time-related abstractions.
//!
//! `Instant` is the tokio clock rather than `std::time::Instant`, so code
//! measuring elapsed time follows the runtime clock. Under
//! `#[tokio::test(start_paused = true)]` that clock only advances when every
//! task is idle, which keeps timing tests deterministic.
//!
//! # Examples
//!
//! ```rust
//! use core_async::time::{sleep, Duration, Instant};
//!
//! async fn example() {
//!     let start = Instant::now();
//!     sleep(Duration::from_millis(20)).await;
//!     assert!(start.elapsed() >= Duration::from_millis(20));
//! }
//! ```

pub use tokio::time::{
    error::Elapsed, interval, interval_at, sleep, sleep_until, timeout, Instant, Interval,
    MissedTickBehavior, Sleep, Timeout,
};

pub use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time as milliseconds since UNIX_EPOCH.
///
/// Returns 0 if the system clock reports a time before the epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Returns the current wall-clock time as seconds since UNIX_EPOCH.
pub fn now_secs() -> u64 {
    now_millis() / 1000
}
