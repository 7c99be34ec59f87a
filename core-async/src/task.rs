//! Task spawning and execution.
//!
//! # Examples
//!
//! ```rust
//! use core_async::task::{spawn, JoinSet};
//!
//! async fn example() {
//!     let handle = spawn(async { 42 });
//!     assert_eq!(handle.await.unwrap(), 42);
//!
//!     let mut set = JoinSet::new();
//!     set.spawn(async { 1 });
//!     set.spawn(async { 2 });
//!     let mut total = 0;
//!     while let Some(result) = set.join_next().await {
//!         total += result.unwrap();
//!     }
//!     assert_eq!(total, 3);
//! }
//! ```

pub use tokio::task::{spawn_blocking, yield_now, AbortHandle, JoinError, JoinHandle, JoinSet};

/// Spawns a new asynchronous task on the Tokio runtime.
///
/// The spawned task may run on a different worker thread. The returned
/// `JoinHandle` can be awaited for the task's output or used to abort it.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, JoinError>;
