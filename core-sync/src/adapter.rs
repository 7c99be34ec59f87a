//! # Source Adapter Contract
//!
//! One implementation per reading source, chosen at composition time. An
//! adapter lists candidate items, fetches their highlight units, and speaks to
//! the destination workspace on the reconciler's behalf. Raw extraction and
//! the destination wire protocol live entirely behind this trait.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_auth::SourceKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// An item (book, article) that may need syncing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub id: String,
    pub title: String,
    pub subtitle: Option<String>,
    /// Latest known modification time; `None` means unknown
    pub modified_at: Option<DateTime<Utc>>,
}

impl CandidateItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            subtitle: None,
            modified_at: None,
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }
}

/// One highlight, note, or review belonging to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Stable within the item
    pub id: String,
    pub text: String,
    pub note: Option<String>,
    /// Highlight color / style index
    pub style: Option<i32>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// Positional key (chapter offset range, CFI, ...)
    pub location: Option<String>,
}

impl Unit {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            note: None,
            style: None,
            created_at: None,
            modified_at: None,
            location: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_style(mut self, style: i32) -> Self {
        self.style = Some(style);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }
}

/// Destination container (page, document) holding an item's entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the destination knows about a previously written unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub entry_id: String,
    /// Content fingerprint embedded in the entry, if the destination keeps one
    pub token: Option<String>,
}

impl IndexEntry {
    pub fn new(entry_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            entry_id: entry_id.into(),
            token,
        }
    }
}

/// Container-level metadata written after each reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationMetadata {
    /// Units currently recorded as synced for the item
    pub count: u64,
    pub last_sync_time: DateTime<Utc>,
}

/// Per-source data access plus destination operations.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceKind;

    async fn list_candidates(&self) -> Result<Vec<CandidateItem>>;

    /// Highlight units for `item_id`. Sources that support it may use `since`
    /// to return only units changed after that instant.
    async fn fetch_remote_units(
        &self,
        item_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Unit>>;

    /// Reviews attached to highlights by location.
    async fn fetch_reviews(&self, _item_id: &str) -> Result<Vec<Unit>> {
        Ok(Vec::new())
    }

    /// Find or create the destination container for `item`.
    async fn ensure_container(&self, item: &CandidateItem) -> Result<ContainerId>;

    /// Map of unit id to destination entry.
    async fn fetch_destination_index(
        &self,
        container: &ContainerId,
    ) -> Result<HashMap<String, IndexEntry>>;

    /// Append entries; returns their ids in input order.
    async fn create_destination_entries(
        &self,
        container: &ContainerId,
        units: &[Unit],
    ) -> Result<Vec<String>>;

    async fn update_destination_entry(&self, entry_id: &str, unit: &Unit) -> Result<()>;

    async fn set_destination_metadata(
        &self,
        container: &ContainerId,
        metadata: &DestinationMetadata,
    ) -> Result<()>;
}
