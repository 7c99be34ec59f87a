//! Synchronization primitives.
//!
//! Re-exports the async-aware primitives from `tokio::sync` together with
//! `CancellationToken` from `tokio-util`. Every type here is `Send + Sync`.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{Mutex, Semaphore};
//!
//! async fn example() {
//!     let mutex = Mutex::new(42);
//!     *mutex.lock().await += 1;
//!
//!     let semaphore = Semaphore::new(2);
//!     let _permit = semaphore.acquire().await.unwrap();
//! }
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, AcquireError, Mutex, MutexGuard, Notify, OwnedSemaphorePermit,
    RwLock, RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit,
};

pub use tokio_util::sync::CancellationToken;
