//! Storage Abstractions
//!
//! Secure credential storage and key-value settings storage. Sync bookkeeping
//! (unit fingerprints, per-item sync timestamps) can live in any
//! [`SettingsStore`], so hosts without SQLite still get incremental sync.

use async_trait::async_trait;

use crate::error::Result;

/// Secure credential storage trait
///
/// Holds session cookies and tokens for authenticated sources:
/// - macOS: Keychain
/// - Windows: Credential Manager (DPAPI)
/// - Linux: Secret Service / libsecret
///
/// # Security Requirements
///
/// Implementations MUST:
/// - Encrypt data at rest
/// - Use platform-provided secure storage when available
/// - Never log or expose secret values
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SecureStore;
///
/// async fn store_cookie(store: &dyn SecureStore, cookie: &str) -> Result<()> {
///     store.set_secret("credential.weRead", cookie.as_bytes()).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret value, replacing any previous value for `key`.
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret value
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret. Deleting a missing key is not an error.
    async fn delete_secret(&self, key: &str) -> Result<()>;

    /// Check if a secret exists without retrieving it
    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }

    /// List all secret keys (without values)
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Clear all secrets
    async fn clear_all(&self) -> Result<()>;
}

/// Key-value settings storage trait
///
/// Abstracts platform-specific preferences storage:
/// - macOS: UserDefaults
/// - Desktop: SQLite-backed table (see `bridge-desktop`)
///
/// Values are typed; reading a key with a different type than it was written
/// with is an error.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn enable_auto_sync(store: &dyn SettingsStore) -> Result<()> {
///     store.set_bool("autoSync.weRead", true).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Set a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Get a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Set a boolean value
    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    /// Get a boolean value
    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    /// Set an integer value
    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    /// Get an integer value
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    /// Delete a setting
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a setting exists
    async fn has_key(&self, key: &str) -> Result<bool>;

    /// List all setting keys
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// List keys starting with `prefix`
    ///
    /// The default implementation filters [`list_keys`](Self::list_keys);
    /// stores with an index should override it.
    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let keys = self.list_keys().await?;
        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }

    /// Clear all settings
    async fn clear_all(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapSettings {
        values: Mutex<BTreeMap<String, String>>,
    }

    #[async_trait]
    impl SettingsStore for MapSettings {
        async fn set_string(&self, key: &str, value: &str) -> Result<()> {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn get_string(&self, key: &str) -> Result<Option<String>> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
            self.set_string(key, &value.to_string()).await
        }

        async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
            Ok(self.get_string(key).await?.map(|v| v == "true"))
        }

        async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
            self.set_string(key, &value.to_string()).await
        }

        async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
            Ok(self.get_string(key).await?.and_then(|v| v.parse().ok()))
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }

        async fn has_key(&self, key: &str) -> Result<bool> {
            Ok(self.values.lock().unwrap().contains_key(key))
        }

        async fn list_keys(&self) -> Result<Vec<String>> {
            Ok(self.values.lock().unwrap().keys().cloned().collect())
        }

        async fn clear_all(&self) -> Result<()> {
            self.values.lock().unwrap().clear();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_list_keys_with_prefix_default() {
        let store = MapSettings::default();
        store.set_string("syncedUnit.weRead:b1:u1", "{}").await.unwrap();
        store.set_string("syncedUnit.weRead:b2:u1", "{}").await.unwrap();
        store.set_bool("autoSync.weRead", true).await.unwrap();

        let keys = store.list_keys_with_prefix("syncedUnit.weRead:b1:").await.unwrap();
        assert_eq!(keys, vec!["syncedUnit.weRead:b1:u1".to_string()]);
    }
}
