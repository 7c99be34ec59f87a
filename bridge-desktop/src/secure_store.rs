//! Secure Credential Storage using OS Keychain

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Keychain account holding the newline separated list of stored keys.
const INDEX_KEY: &str = "__readsync_key_index__";

/// Keyring-based secure storage implementation
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager (DPAPI)
/// - Linux: Secret Service (libsecret)
///
/// The OS keychains cannot enumerate entries per service, so the store keeps
/// its own key index in a dedicated entry to support `list_keys` and
/// `clear_all`.
pub struct KeyringSecureStore {
    service_name: String,
    index_lock: Mutex<()>,
}

impl KeyringSecureStore {
    /// Create a new secure store with the default service name
    pub fn new() -> Self {
        Self::with_service_name("readsync-core")
    }

    /// Create a new secure store with a custom service name
    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            index_lock: Mutex::new(()),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(Self::map_keyring_error)
    }

    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        BridgeError::SecretStore(e.to_string())
    }

    fn read_index(&self) -> Result<BTreeSet<String>> {
        match self.entry(INDEX_KEY)?.get_password() {
            Ok(raw) => Ok(raw
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(keyring::Error::NoEntry) => Ok(BTreeSet::new()),
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    fn write_index(&self, keys: &BTreeSet<String>) -> Result<()> {
        let entry = self.entry(INDEX_KEY)?;
        if keys.is_empty() {
            return match entry.delete_credential() {
                Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(Self::map_keyring_error(e)),
            };
        }
        let joined = keys.iter().cloned().collect::<Vec<_>>().join("\n");
        entry.set_password(&joined).map_err(Self::map_keyring_error)
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        // Keyring only stores strings, so binary values are base64 encoded
        let encoded = STANDARD.encode(value);
        self.entry(key)?
            .set_password(&encoded)
            .map_err(Self::map_keyring_error)?;

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index()?;
        if index.insert(key.to_string()) {
            self.write_index(&index)?;
        }

        debug!(key = key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.entry(key)?.get_password() {
            Ok(encoded) => {
                let decoded = STANDARD.decode(&encoded).map_err(|e| {
                    error!(key = key, error = %e, "Failed to decode secret");
                    BridgeError::Malformed {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;

                debug!(key = key, "Retrieved secret from keyring");
                Ok(Some(decoded))
            }
            Err(keyring::Error::NoEntry) => {
                debug!(key = key, "Secret not found in keyring");
                Ok(None)
            }
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(_) | Err(keyring::Error::NoEntry) => {}
            Err(e) => return Err(Self::map_keyring_error(e)),
        }

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index()?;
        if index.remove(key) {
            self.write_index(&index)?;
        }

        debug!(key = key, "Deleted secret from keyring");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let _guard = self.index_lock.lock().await;
        Ok(self.read_index()?.into_iter().collect())
    }

    async fn clear_all(&self) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let index = self.read_index()?;
        for key in &index {
            match self.entry(key)?.delete_credential() {
                Ok(_) | Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(Self::map_keyring_error(e)),
            }
        }
        self.write_index(&BTreeSet::new())?;

        debug!(count = index.len(), "Cleared all secrets from keyring");
        Ok(())
    }
}
