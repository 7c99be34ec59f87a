//! # Sync State Repository
//!
//! Local bookkeeping owned by the reconciler:
//!
//! - **Unit records** keyed `source:itemId:unitId` → destination entry id,
//!   content hash and sync time.
//! - **Item timestamps** keyed `source:itemId` → last fully successful sync.
//!
//! Two implementations share the `SyncStateRepository` trait: a SQLite one
//! (tables `synced_units` and `item_sync_timestamps`) and one layered on any
//! host `SettingsStore` with JSON values. Timestamps are stored as Unix
//! milliseconds.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::storage::SettingsStore;
use chrono::{DateTime, Utc};
use core_auth::SourceKind;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// What was last written to the destination for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedUnitRecord {
    pub entry_id: String,
    pub content_hash: String,
    pub synced_at: DateTime<Utc>,
}

impl SyncedUnitRecord {
    pub fn new(
        entry_id: impl Into<String>,
        content_hash: impl Into<String>,
        synced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            content_hash: content_hash.into(),
            synced_at,
        }
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Unit records of one item, keyed by unit id.
    async fn get_unit_records(
        &self,
        source: SourceKind,
        item_id: &str,
    ) -> Result<HashMap<String, SyncedUnitRecord>>;

    async fn upsert_unit_record(
        &self,
        source: SourceKind,
        item_id: &str,
        unit_id: &str,
        record: &SyncedUnitRecord,
    ) -> Result<()>;

    /// Returns the number of records removed.
    async fn delete_item_records(&self, source: SourceKind, item_id: &str) -> Result<usize>;

    async fn delete_source_records(&self, source: SourceKind) -> Result<usize>;

    async fn count_unit_records(&self, source: SourceKind, item_id: &str) -> Result<u64>;

    async fn get_last_synced(
        &self,
        source: SourceKind,
        item_id: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn set_last_synced(
        &self,
        source: SourceKind,
        item_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn clear_last_synced(&self, source: SourceKind, item_id: &str) -> Result<()>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

const CREATE_SYNCED_UNITS: &str = r#"
    CREATE TABLE IF NOT EXISTS synced_units (
        source TEXT NOT NULL,
        item_id TEXT NOT NULL,
        unit_id TEXT NOT NULL,
        entry_id TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        synced_at INTEGER NOT NULL,
        PRIMARY KEY (source, item_id, unit_id)
    )
"#;

const CREATE_ITEM_TIMESTAMPS: &str = r#"
    CREATE TABLE IF NOT EXISTS item_sync_timestamps (
        source TEXT NOT NULL,
        item_id TEXT NOT NULL,
        last_synced_at INTEGER NOT NULL,
        PRIMARY KEY (source, item_id)
    )
"#;

/// SQLite implementation of `SyncStateRepository`.
pub struct SqliteSyncStateRepository {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct UnitRecordRow {
    unit_id: String,
    entry_id: String,
    content_hash: String,
    synced_at: i64,
}

impl SqliteSyncStateRepository {
    /// Wrap an existing pool. Call `initialize()` before first use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Single-connection in-memory database with tables created.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let repo = Self::new(pool);
        repo.initialize().await?;
        Ok(repo)
    }

    /// Open (or create) a database file and create the tables.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let repo = Self::new(pool);
        repo.initialize().await?;
        debug!(path = ?db_path.as_ref(), "Opened sync state database");
        Ok(repo)
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(CREATE_SYNCED_UNITS).execute(&self.pool).await?;
        sqlx::query(CREATE_ITEM_TIMESTAMPS)
            .execute(&self.pool)
            .await?;
        debug!("Sync state tables ready");
        Ok(())
    }
}

#[async_trait]
impl SyncStateRepository for SqliteSyncStateRepository {
    async fn get_unit_records(
        &self,
        source: SourceKind,
        item_id: &str,
    ) -> Result<HashMap<String, SyncedUnitRecord>> {
        let rows = sqlx::query_as::<_, UnitRecordRow>(
            r#"
            SELECT unit_id, entry_id, content_hash, synced_at
            FROM synced_units
            WHERE source = ? AND item_id = ?
            "#,
        )
        .bind(source.as_str())
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.unit_id,
                    SyncedUnitRecord {
                        entry_id: row.entry_id,
                        content_hash: row.content_hash,
                        synced_at: from_millis(row.synced_at),
                    },
                )
            })
            .collect())
    }

    async fn upsert_unit_record(
        &self,
        source: SourceKind,
        item_id: &str,
        unit_id: &str,
        record: &SyncedUnitRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO synced_units (source, item_id, unit_id, entry_id, content_hash, synced_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, item_id, unit_id) DO UPDATE SET
                entry_id = excluded.entry_id,
                content_hash = excluded.content_hash,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(source.as_str())
        .bind(item_id)
        .bind(unit_id)
        .bind(&record.entry_id)
        .bind(&record.content_hash)
        .bind(record.synced_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_item_records(&self, source: SourceKind, item_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM synced_units WHERE source = ? AND item_id = ?")
            .bind(source.as_str())
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn delete_source_records(&self, source: SourceKind) -> Result<usize> {
        let result = sqlx::query("DELETE FROM synced_units WHERE source = ?")
            .bind(source.as_str())
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM item_sync_timestamps WHERE source = ?")
            .bind(source.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn count_unit_records(&self, source: SourceKind, item_id: &str) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM synced_units WHERE source = ? AND item_id = ?",
        )
        .bind(source.as_str())
        .bind(item_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn get_last_synced(
        &self,
        source: SourceKind,
        item_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let millis = sqlx::query_scalar::<_, i64>(
            "SELECT last_synced_at FROM item_sync_timestamps WHERE source = ? AND item_id = ?",
        )
        .bind(source.as_str())
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(millis.map(from_millis))
    }

    async fn set_last_synced(
        &self,
        source: SourceKind,
        item_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO item_sync_timestamps (source, item_id, last_synced_at)
            VALUES (?, ?, ?)
            ON CONFLICT(source, item_id) DO UPDATE SET last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(source.as_str())
        .bind(item_id)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_last_synced(&self, source: SourceKind, item_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM item_sync_timestamps WHERE source = ? AND item_id = ?")
            .bind(source.as_str())
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Settings-backed Implementation
// ============================================================================

const UNIT_KEY_PREFIX: &str = "syncedUnit.";
const LAST_SYNC_KEY_PREFIX: &str = "lastSync.";

/// `SyncStateRepository` over a host key-value store.
///
/// Unit records live under `syncedUnit.{source}:{item}:{unit}` as JSON and
/// item timestamps under `lastSync.{source}:{item}` as millis. The item id is
/// percent-encoded, so an id containing `:` never shares a prefix with
/// another item.
pub struct SettingsSyncStateRepository {
    settings: Arc<dyn SettingsStore>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredUnitRecord {
    entry_id: String,
    content_hash: String,
    synced_at: i64,
}

impl SettingsSyncStateRepository {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    fn item_prefix(source: SourceKind, item_id: &str) -> String {
        format!(
            "{}{}:{}:",
            UNIT_KEY_PREFIX,
            source.as_str(),
            urlencoding::encode(item_id)
        )
    }

    fn last_sync_key(source: SourceKind, item_id: &str) -> String {
        format!(
            "{}{}:{}",
            LAST_SYNC_KEY_PREFIX,
            source.as_str(),
            urlencoding::encode(item_id)
        )
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<usize> {
        for key in keys {
            self.settings.delete(key).await?;
        }
        Ok(keys.len())
    }
}

#[async_trait]
impl SyncStateRepository for SettingsSyncStateRepository {
    async fn get_unit_records(
        &self,
        source: SourceKind,
        item_id: &str,
    ) -> Result<HashMap<String, SyncedUnitRecord>> {
        let prefix = Self::item_prefix(source, item_id);
        let keys = self.settings.list_keys_with_prefix(&prefix).await?;

        let mut records = HashMap::with_capacity(keys.len());
        for key in keys {
            let Some(unit_id) = key.strip_prefix(&prefix) else {
                continue;
            };
            let Some(raw) = self.settings.get_string(&key).await? else {
                continue;
            };
            match serde_json::from_str::<StoredUnitRecord>(&raw) {
                Ok(stored) => {
                    records.insert(
                        unit_id.to_string(),
                        SyncedUnitRecord {
                            entry_id: stored.entry_id,
                            content_hash: stored.content_hash,
                            synced_at: from_millis(stored.synced_at),
                        },
                    );
                }
                Err(e) => {
                    // Treated as never synced; the unit is recreated
                    warn!(key = %key, error = %e, "Skipping malformed unit record");
                }
            }
        }
        Ok(records)
    }

    async fn upsert_unit_record(
        &self,
        source: SourceKind,
        item_id: &str,
        unit_id: &str,
        record: &SyncedUnitRecord,
    ) -> Result<()> {
        let key = format!("{}{}", Self::item_prefix(source, item_id), unit_id);
        let stored = StoredUnitRecord {
            entry_id: record.entry_id.clone(),
            content_hash: record.content_hash.clone(),
            synced_at: record.synced_at.timestamp_millis(),
        };
        let json = serde_json::to_string(&stored)?;
        self.settings.set_string(&key, &json).await?;
        Ok(())
    }

    async fn delete_item_records(&self, source: SourceKind, item_id: &str) -> Result<usize> {
        let keys = self
            .settings
            .list_keys_with_prefix(&Self::item_prefix(source, item_id))
            .await?;
        self.delete_keys(&keys).await
    }

    async fn delete_source_records(&self, source: SourceKind) -> Result<usize> {
        let units = self
            .settings
            .list_keys_with_prefix(&format!("{}{}:", UNIT_KEY_PREFIX, source.as_str()))
            .await?;
        let stamps = self
            .settings
            .list_keys_with_prefix(&format!("{}{}:", LAST_SYNC_KEY_PREFIX, source.as_str()))
            .await?;
        self.delete_keys(&stamps).await?;
        self.delete_keys(&units).await
    }

    async fn count_unit_records(&self, source: SourceKind, item_id: &str) -> Result<u64> {
        let keys = self
            .settings
            .list_keys_with_prefix(&Self::item_prefix(source, item_id))
            .await?;
        Ok(keys.len() as u64)
    }

    async fn get_last_synced(
        &self,
        source: SourceKind,
        item_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let millis = self
            .settings
            .get_i64(&Self::last_sync_key(source, item_id))
            .await?;
        Ok(millis.map(from_millis))
    }

    async fn set_last_synced(
        &self,
        source: SourceKind,
        item_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.settings
            .set_i64(&Self::last_sync_key(source, item_id), at.timestamp_millis())
            .await
            .map_err(SyncError::from)
    }

    async fn clear_last_synced(&self, source: SourceKind, item_id: &str) -> Result<()> {
        self.settings
            .delete(&Self::last_sync_key(source, item_id))
            .await
            .map_err(SyncError::from)
    }
}

// ============================================================================
// Tests
// ============================================================================
