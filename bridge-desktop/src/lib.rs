//! # Desktop Bridge Implementations
//!
//! Default implementations of the bridge traits for desktop platforms
//! (macOS, Windows, Linux):
//! - `SecureStore` using the `keyring` crate (session cookies, API tokens)
//! - `SettingsStore` using a SQLite-backed key-value table
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{default_data_dir, KeyringSecureStore, SqliteSettingsStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = SqliteSettingsStore::new(default_data_dir().join("settings.db"))
//!         .await
//!         .unwrap();
//!     let secrets = KeyringSecureStore::new();
//! }
//! ```

mod settings;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use settings::SqliteSettingsStore;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;

use std::path::PathBuf;

/// Application data directory used when the host does not supply one.
///
/// Resolves to the platform data dir (`~/Library/Application Support` on
/// macOS) joined with `readsync`, falling back to the working directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("readsync")
}
