//! Secure Credential Storage
//!
//! Persists per-source session credentials through the host `SecureStore`
//! (Keychain, Credential Manager, Secret Service).
//!
//! ## Security Features
//!
//! - Credentials are never logged or exposed in error messages
//! - Corrupted entries are erased on read
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{Credential, CredentialStore, SourceKind};
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let store = CredentialStore::new(secure_store);
//!
//! store
//!     .update_credential(SourceKind::WeRead, &Credential::new("wr_skey=..."))
//!     .await?;
//! let current = store.get_credential(SourceKind::WeRead).await?;
//! store.clear_credential(SourceKind::WeRead).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::{Credential, SourceKind};
use bridge_traits::storage::SecureStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const KEY_PREFIX: &str = "credential.";

/// Secure storage for source credentials.
#[derive(Clone)]
pub struct CredentialStore {
    secure_store: Arc<dyn SecureStore>,
}

/// JSON form written to the secure store.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCredential {
    secret: String,
    obtained_at: i64,
    expires_at: Option<i64>,
}

fn from_timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

impl CredentialStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        debug!("Initializing CredentialStore");
        Self { secure_store }
    }

    fn storage_key(&self, source: SourceKind) -> String {
        format!("{}{}", KEY_PREFIX, source.as_str())
    }

    /// Store (or replace) the credential for `source`.
    pub async fn update_credential(&self, source: SourceKind, credential: &Credential) -> Result<()> {
        let key = self.storage_key(source);

        let stored = StoredCredential {
            secret: credential.secret().to_string(),
            obtained_at: credential.obtained_at().timestamp(),
            expires_at: credential.expires_at().map(|t| t.timestamp()),
        };

        let json = serde_json::to_vec(&stored).map_err(|e| AuthError::CredentialCorrupted {
            kind: source,
            reason: e.to_string(),
        })?;

        self.secure_store
            .set_secret(&key, &json)
            .await
            .map_err(|e| {
                warn!(source = %source, error = %e, "Failed to store credential");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(
            source = %source,
            has_expiry = stored.expires_at.is_some(),
            "Credential stored securely"
        );
        Ok(())
    }

    /// Retrieve the credential for `source`.
    ///
    /// Returns `Ok(None)` when nothing is stored. A corrupted entry is deleted
    /// and reported as `AuthError::CredentialCorrupted`.
    pub async fn get_credential(&self, source: SourceKind) -> Result<Option<Credential>> {
        let key = self.storage_key(source);

        let data = self.secure_store.get_secret(&key).await.map_err(|e| {
            warn!(source = %source, error = %e, "Failed to read credential");
            AuthError::SecureStorageUnavailable(e.to_string())
        })?;

        let Some(data) = data else {
            debug!(source = %source, "No credential stored");
            return Ok(None);
        };

        let stored: StoredCredential = match serde_json::from_slice(&data) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(source = %source, error = %e, "Stored credential is corrupted, erasing");
                if let Err(delete_err) = self.secure_store.delete_secret(&key).await {
                    warn!(source = %source, error = %delete_err, "Failed to erase corrupted credential");
                }
                return Err(AuthError::CredentialCorrupted {
                    kind: source,
                    reason: e.to_string(),
                });
            }
        };

        let obtained_at = from_timestamp(stored.obtained_at).unwrap_or_else(Utc::now);
        let expires_at = stored.expires_at.and_then(from_timestamp);

        Ok(Some(Credential::from_parts(
            stored.secret,
            obtained_at,
            expires_at,
        )))
    }

    /// Retrieve the credential or fail with `AuthError::NoCredential`.
    pub async fn require_credential(&self, source: SourceKind) -> Result<Credential> {
        self.get_credential(source)
            .await?
            .ok_or(AuthError::NoCredential(source))
    }

    /// Erase the credential for `source`. Idempotent.
    pub async fn clear_credential(&self, source: SourceKind) -> Result<()> {
        let key = self.storage_key(source);

        self.secure_store.delete_secret(&key).await.map_err(|e| {
            warn!(source = %source, error = %e, "Failed to erase credential");
            AuthError::SecureStorageUnavailable(e.to_string())
        })?;

        info!(source = %source, "Credential cleared");
        Ok(())
    }

    pub async fn has_credential(&self, source: SourceKind) -> Result<bool> {
        let key = self.storage_key(source);
        self.secure_store
            .has_secret(&key)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))
    }

    /// Sources with a stored credential.
    pub async fn list_sources(&self) -> Result<Vec<SourceKind>> {
        let keys = self
            .secure_store
            .list_keys()
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))?;

        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(KEY_PREFIX).and_then(SourceKind::parse))
            .collect())
    }
}
