//! # Incremental Reconciler
//!
//! Diffs an item's freshly fetched units against what the destination already
//! holds and applies the minimum set of writes.
//!
//! ## Per-unit decision
//!
//! | Destination index      | Fingerprint vs. token | Action                  |
//! |------------------------|-----------------------|-------------------------|
//! | no entry               | n/a                   | create (batched)        |
//! | entry                  | differs or unknown    | update in place         |
//! | entry                  | equal                 | skip, no remote call    |
//!
//! The token is the fingerprint embedded in the destination entry when the
//! destination keeps one, otherwise the locally stored `content_hash`.
//!
//! Destination failures classified as `RemoteApiError` are counted and the
//! remaining units still run. Anything else aborts the item. Container metadata
//! is always written; the item timestamp only when nothing failed.

use crate::adapter::{CandidateItem, ContainerId, DestinationMetadata, SourceAdapter, Unit};
use crate::error::{Result, SyncError};
use crate::fingerprint::fingerprint;
use crate::repository::{SyncStateRepository, SyncedUnitRecord};
use bridge_traits::time::Clock;
use core_auth::SourceKind;
use core_runtime::config::DEFAULT_CREATE_BATCH_SIZE;
use core_runtime::events::FailureKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Counts produced by one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub failed: u32,
    pub total: u32,
}

impl ReconcileOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Progress sink for human-readable status text.
pub type ProgressFn<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Fold reviews into the highlights that share their trimmed location.
///
/// Review text is appended to the highlight note, one review per line.
/// Reviews without a matching highlight are dropped.
pub fn merge_reviews(mut highlights: Vec<Unit>, reviews: Vec<Unit>) -> Vec<Unit> {
    if reviews.is_empty() {
        return highlights;
    }

    let mut by_location: HashMap<String, usize> = HashMap::new();
    for (idx, unit) in highlights.iter().enumerate() {
        if let Some(location) = unit.location.as_deref().map(str::trim) {
            if !location.is_empty() {
                by_location.entry(location.to_string()).or_insert(idx);
            }
        }
    }

    let mut dropped = 0usize;
    for review in reviews {
        let target = review
            .location
            .as_deref()
            .map(str::trim)
            .and_then(|location| by_location.get(location).copied());
        let Some(idx) = target else {
            dropped += 1;
            continue;
        };

        let text = review.text.trim();
        if text.is_empty() {
            continue;
        }
        let highlight = &mut highlights[idx];
        highlight.note = Some(match highlight.note.take() {
            Some(note) if !note.trim().is_empty() => format!("{}\n{}", note, text),
            _ => text.to_string(),
        });
    }

    if dropped > 0 {
        debug!(dropped, "Reviews without a matching highlight were dropped");
    }
    highlights
}

fn is_per_unit_failure(error: &SyncError) -> bool {
    error.kind() == FailureKind::RemoteApiError
}

pub struct IncrementalReconciler {
    repository: Arc<dyn SyncStateRepository>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl IncrementalReconciler {
    pub fn new(repository: Arc<dyn SyncStateRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            clock,
            batch_size: DEFAULT_CREATE_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn repository(&self) -> &Arc<dyn SyncStateRepository> {
        &self.repository
    }

    #[instrument(
        skip(self, adapter, item, units, progress),
        fields(source = %adapter.source(), item_id = %item.id, units = units.len())
    )]
    pub async fn reconcile(
        &self,
        adapter: &dyn SourceAdapter,
        item: &CandidateItem,
        units: &[Unit],
        progress: ProgressFn<'_>,
    ) -> Result<ReconcileOutcome> {
        let source = adapter.source();
        let mut outcome = ReconcileOutcome {
            total: units.len() as u32,
            ..ReconcileOutcome::default()
        };

        progress("Preparing destination");
        let container = adapter.ensure_container(item).await?;
        let index = adapter.fetch_destination_index(&container).await?;
        let records = self.repository.get_unit_records(source, &item.id).await?;
        debug!(
            container = %container,
            indexed = index.len(),
            recorded = records.len(),
            "Loaded destination index"
        );

        let mut to_create: Vec<(&Unit, String)> = Vec::new();
        for unit in units {
            let hash = fingerprint(unit);
            let Some(entry) = index.get(&unit.id) else {
                to_create.push((unit, hash));
                continue;
            };

            let token = entry
                .token
                .as_deref()
                .or_else(|| records.get(&unit.id).map(|r| r.content_hash.as_str()));
            if token == Some(hash.as_str()) {
                outcome.skipped += 1;
                continue;
            }

            match adapter.update_destination_entry(&entry.entry_id, unit).await {
                Ok(()) => {
                    let record = SyncedUnitRecord::new(&entry.entry_id, hash, self.clock.now());
                    self.repository
                        .upsert_unit_record(source, &item.id, &unit.id, &record)
                        .await?;
                    outcome.updated += 1;
                }
                Err(e) if is_per_unit_failure(&e) => {
                    warn!(unit_id = %unit.id, error = %e, "Failed to update destination entry");
                    outcome.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if !to_create.is_empty() {
            self.create_in_batches(
                adapter,
                source,
                &item.id,
                &container,
                &to_create,
                &mut outcome,
                progress,
            )
            .await?;
        }

        let metadata = DestinationMetadata {
            count: self.repository.count_unit_records(source, &item.id).await?,
            last_sync_time: self.clock.now(),
        };
        adapter
            .set_destination_metadata(&container, &metadata)
            .await?;

        if outcome.is_complete() {
            self.repository
                .set_last_synced(source, &item.id, metadata.last_sync_time)
                .await?;
        }

        info!(
            created = outcome.created,
            updated = outcome.updated,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "Reconciled item"
        );
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_in_batches(
        &self,
        adapter: &dyn SourceAdapter,
        source: SourceKind,
        item_id: &str,
        container: &ContainerId,
        pending: &[(&Unit, String)],
        outcome: &mut ReconcileOutcome,
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        let total = pending.len();
        let mut done = 0usize;

        for batch in pending.chunks(self.batch_size) {
            progress(&format!("Writing entries {}/{}", done, total));
            let units: Vec<Unit> = batch.iter().map(|(unit, _)| (*unit).clone()).collect();

            match adapter.create_destination_entries(container, &units).await {
                Ok(entry_ids) => {
                    let now = self.clock.now();
                    for ((unit, hash), entry_id) in batch.iter().zip(entry_ids.iter()) {
                        let record = SyncedUnitRecord::new(entry_id, hash.clone(), now);
                        self.repository
                            .upsert_unit_record(source, item_id, &unit.id, &record)
                            .await?;
                        outcome.created += 1;
                    }
                    let missing = batch.len().saturating_sub(entry_ids.len());
                    if missing > 0 {
                        warn!(missing, "Destination returned fewer entry ids than requested");
                        outcome.failed += missing as u32;
                    }
                }
                Err(e) if is_per_unit_failure(&e) => {
                    warn!(batch = batch.len(), error = %e, "Failed to create destination entries");
                    outcome.failed += batch.len() as u32;
                }
                Err(e) => return Err(e),
            }
            done += batch.len();
        }
        progress(&format!("Writing entries {}/{}", done, total));
        Ok(())
    }

    /// Forget everything recorded for the item so the next pass rewrites it.
    #[instrument(skip(self))]
    pub async fn full_resync(&self, source: SourceKind, item_id: &str) -> Result<usize> {
        let removed = self.repository.delete_item_records(source, item_id).await?;
        self.repository.clear_last_synced(source, item_id).await?;
        info!(removed, "Cleared sync records for full resync");
        Ok(removed)
    }

    pub async fn clear_source(&self, source: SourceKind) -> Result<usize> {
        let removed = self.repository.delete_source_records(source).await?;
        info!(source = %source, removed, "Cleared sync records for source");
        Ok(removed)
    }

    pub async fn record_count(&self, source: SourceKind, item_id: &str) -> Result<u64> {
        self.repository.count_unit_records(source, item_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn highlight(id: &str, location: &str) -> Unit {
        Unit::new(id, format!("highlight {}", id)).with_location(location)
    }

    fn review(text: &str, location: &str) -> Unit {
        Unit::new(format!("r-{}", text), text).with_location(location)
    }

    #[test]
    fn test_merge_reviews_appends_to_matching_note() {
        let highlights = vec![
            highlight("h1", "10-20").with_note("first thought"),
            highlight("h2", "30-40"),
        ];
        let reviews = vec![
            review("agreed", " 10-20 "),
            review("second", "10-20"),
            review("new note", "30-40"),
        ];

        let merged = merge_reviews(highlights, reviews);
        assert_eq!(
            merged[0].note.as_deref(),
            Some("first thought\nagreed\nsecond")
        );
        assert_eq!(merged[1].note.as_deref(), Some("new note"));
    }

    #[test]
    fn test_merge_reviews_drops_unmatched() {
        let merged = merge_reviews(
            vec![highlight("h1", "10-20")],
            vec![review("orphan", "99-100"), Unit::new("r", "no location")],
        );
        assert_eq!(merged.len(), 1);
        assert!(merged[0].note.is_none());
    }
}
