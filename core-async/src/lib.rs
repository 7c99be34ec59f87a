//! Async runtime facade for the sync core.
//!
//! All core-* crates depend on this crate instead of reaching for tokio
//! directly, so the runtime surface stays in one place.
//!
//! # Modules
//!
//! - `runtime`: Runtime handles
//! - `task`: Task spawning and join sets
//! - `time`: Sleep, timeouts, intervals and the runtime clock
//! - `sync`: Mutexes, semaphores, channels and cancellation
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(10)).await;
//!         42
//!     });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
