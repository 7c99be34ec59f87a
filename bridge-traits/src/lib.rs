//! # Host Bridge Traits
//!
//! Contracts between the sync core and the host it runs in. Each trait is a
//! capability the core needs but cannot implement portably on its own.
//!
//! ## Traits
//!
//! ### Security & Storage
//! - [`SecureStore`](storage::SecureStore) - Session cookies and API tokens (Keychain/Credential Manager)
//! - [`SettingsStore`](storage::SettingsStore) - Key-value storage for preferences and sync bookkeeping
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Wall-clock source, replaceable in tests
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to the host logging pipeline
//!
//! ## Error Handling
//!
//! All bridge traits return [`BridgeError`](error::BridgeError). Implementations
//! convert platform errors into it and keep the message actionable (key names,
//! file paths), never the secret values themselves.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single instance can be shared
//! behind an `Arc` by every sync worker.

pub mod error;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use storage::{SecureStore, SettingsStore};
pub use time::{Clock, ConsoleLogger, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
