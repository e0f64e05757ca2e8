//! Capacity Updater
//!
//! Folds a backend capacity report into every storage record in a scope.
//!
//! Logical capacity (what the framework allocates against) is taken from the
//! first report only; physical capacity always mirrors the latest report.
//! Each row is written with a version-checked conditional update, retried
//! with exponential backoff when another writer wins the race.

use crate::capacity::events::CapacityEvent;
use crate::capacity::scope::CapacityScope;
use crate::domain::model::{CapacityRecord, StorageId};
use crate::error::{Error, Result};
use crate::store::{CapacityStore, CasOutcome, PrimaryStorageStore};
use backoff::future::retry_notify;
use backoff::ExponentialBackoff;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Merge
// =============================================================================

/// Apply a reported (total, available) pair to a capacity row.
///
/// Logical fields are written only while both are still zero. Physical
/// fields are always overwritten. The version is carried through unchanged.
pub fn merge_capacity(current: &CapacityRecord, total: u64, available: u64) -> CapacityRecord {
    let mut merged = *current;
    if current.is_uninitialized() {
        merged.total_capacity = total;
        merged.available_capacity = available;
    }
    merged.total_physical_capacity = total;
    merged.available_physical_capacity = available;
    merged
}

// =============================================================================
// Configuration
// =============================================================================

/// Retry policy for conflicting row writes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityUpdaterConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Duration,
}

impl Default for CapacityUpdaterConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(250),
            max_elapsed_time: Duration::from_secs(10),
        }
    }
}

impl CapacityUpdaterConfig {
    fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.max_elapsed_time),
            ..ExponentialBackoff::default()
        }
    }
}

// =============================================================================
// Summary
// =============================================================================

/// Per-row result of applying a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// Logical capacity was set from this report
    Initialized,
    /// Only physical capacity changed
    Updated,
    /// Nothing to write
    Unchanged,
    /// Row disappeared before it could be written
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityUpdateSummary {
    pub matched: usize,
    pub initialized: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl CapacityUpdateSummary {
    fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Initialized => self.initialized += 1,
            RowOutcome::Updated => self.updated += 1,
            RowOutcome::Unchanged => self.unchanged += 1,
            RowOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Number of rows actually written
    pub fn written(&self) -> usize {
        self.initialized + self.updated
    }
}

// =============================================================================
// Updater
// =============================================================================

pub struct CapacityUpdater {
    records: Arc<dyn PrimaryStorageStore>,
    capacity: Arc<dyn CapacityStore>,
    config: CapacityUpdaterConfig,
    event_tx: broadcast::Sender<CapacityEvent>,
}

impl CapacityUpdater {
    pub fn new(
        records: Arc<dyn PrimaryStorageStore>,
        capacity: Arc<dyn CapacityStore>,
        config: CapacityUpdaterConfig,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            records,
            capacity,
            config,
            event_tx,
        })
    }

    /// Subscribe to capacity events
    pub fn subscribe(&self) -> broadcast::Receiver<CapacityEvent> {
        self.event_tx.subscribe()
    }

    fn emit_event(&self, event: CapacityEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Apply a report to every record in `scope`.
    ///
    /// Rows are updated independently; a failing row does not stop the
    /// others, and the first failure is returned once all rows are done.
    pub async fn update(
        &self,
        scope: &CapacityScope,
        total: u64,
        available: u64,
    ) -> Result<CapacityUpdateSummary> {
        if available > total {
            warn!(%scope, total, available, "Reported available capacity exceeds total");
        }

        let ids = self.records.resolve_scope(scope).await?;
        let mut summary = CapacityUpdateSummary {
            matched: ids.len(),
            ..Default::default()
        };

        if ids.is_empty() {
            debug!(%scope, "Capacity report matched no primary storage");
            self.emit_event(CapacityEvent::ScopeEmpty {
                scope: scope.to_string(),
            });
            return Ok(summary);
        }

        let results = join_all(ids.iter().map(|id| self.apply(id, total, available))).await;

        let mut first_error = None;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    warn!(storage = %id, error = %e, "Failed to update primary storage capacity");
                    first_error.get_or_insert(e);
                }
            }
        }

        self.emit_event(CapacityEvent::ReportApplied {
            scope: scope.to_string(),
            matched: summary.matched,
            initialized: summary.initialized,
            updated: summary.updated,
        });

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Read, merge and conditionally write one row
    async fn apply(&self, id: &StorageId, total: u64, available: u64) -> Result<RowOutcome> {
        let capacity = self.capacity.as_ref();

        let outcome = retry_notify(
            self.config.policy(),
            || attempt(capacity, id, total, available),
            |e: Error, wait: Duration| {
                debug!(storage = %id, error = %e, ?wait, "Retrying capacity write");
            },
        )
        .await?;

        match outcome {
            (RowOutcome::Initialized, Some(row)) => {
                debug!(
                    storage = %id,
                    total = row.total_capacity,
                    available = row.available_capacity,
                    "Initialized logical capacity"
                );
                self.emit_event(CapacityEvent::Initialized {
                    storage_uuid: id.to_string(),
                    total: row.total_capacity,
                    available: row.available_capacity,
                });
                self.emit_event(CapacityEvent::PhysicalUpdated {
                    storage_uuid: id.to_string(),
                    total: row.total_physical_capacity,
                    available: row.available_physical_capacity,
                });
            }
            (RowOutcome::Updated, Some(row)) => {
                self.emit_event(CapacityEvent::PhysicalUpdated {
                    storage_uuid: id.to_string(),
                    total: row.total_physical_capacity,
                    available: row.available_physical_capacity,
                });
            }
            (RowOutcome::Skipped, _) => {
                warn!(storage = %id, "Capacity row vanished during update, skipping");
            }
            _ => {}
        }

        Ok(outcome.0)
    }
}

/// One optimistic write attempt; a lost race is transient
async fn attempt(
    capacity: &dyn CapacityStore,
    id: &StorageId,
    total: u64,
    available: u64,
) -> std::result::Result<(RowOutcome, Option<CapacityRecord>), backoff::Error<Error>> {
    let Some(current) = capacity.get(id).await.map_err(classify)? else {
        return Ok((RowOutcome::Skipped, None));
    };

    let merged = merge_capacity(&current, total, available);
    if merged.same_values(&current) {
        return Ok((RowOutcome::Unchanged, None));
    }

    let outcome = if current.is_uninitialized() && !merged.is_uninitialized() {
        RowOutcome::Initialized
    } else {
        RowOutcome::Updated
    };

    match capacity
        .compare_and_set(id, current.version, merged)
        .await
        .map_err(classify)?
    {
        CasOutcome::Applied(row) => Ok((outcome, Some(row))),
        CasOutcome::Missing => Ok((RowOutcome::Skipped, None)),
        CasOutcome::VersionMismatch => Err(classify(Error::CapacityConflict {
            id: id.to_string(),
        })),
    }
}

/// Transient errors are retried with backoff, everything else fails the row
fn classify(err: Error) -> backoff::Error<Error> {
    if err.is_transient() {
        backoff::Error::transient(err)
    } else {
        backoff::Error::permanent(err)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{CreatePrimaryStorageRequest, PrimaryStorageRecord};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn seed(store: &MemoryStore, id: &str, storage_type: &str, cluster: &str) {
        let request =
            CreatePrimaryStorageRequest::new(id, "zone-1", storage_type).with_cluster_name(cluster);
        let record = PrimaryStorageRecord::from_request(StorageId::new(id), &request);
        PrimaryStorageStore::insert(store, record).await.unwrap();
        CapacityStore::insert(store, &StorageId::new(id), CapacityRecord::empty())
            .await
            .unwrap();
    }

    async fn row(store: &MemoryStore, id: &str) -> CapacityRecord {
        CapacityStore::get(store, &StorageId::new(id))
            .await
            .unwrap()
            .unwrap()
    }

    fn updater(store: &Arc<MemoryStore>) -> Arc<CapacityUpdater> {
        CapacityUpdater::new(store.clone(), store.clone(), CapacityUpdaterConfig::default())
    }

    #[test]
    fn test_merge_first_write() {
        let merged = merge_capacity(&CapacityRecord::empty(), 100, 80);
        assert_eq!(merged.total_capacity, 100);
        assert_eq!(merged.available_capacity, 80);
        assert_eq!(merged.total_physical_capacity, 100);
        assert_eq!(merged.available_physical_capacity, 80);

        let merged = merge_capacity(&merged, 120, 60);
        assert_eq!((merged.total_capacity, merged.available_capacity), (100, 80));
        assert_eq!(
            (merged.total_physical_capacity, merged.available_physical_capacity),
            (120, 60)
        );
    }

    #[test]
    fn test_merge_idempotent() {
        let once = merge_capacity(&CapacityRecord::empty(), 500, 300);
        let twice = merge_capacity(&once, 500, 300);
        assert!(once.same_values(&twice));
    }

    #[tokio::test]
    async fn test_update_first_write_then_physical_only() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "ps-1", "X", "c1").await;
        let updater = updater(&store);
        let scope = CapacityScope::cluster("X", "c1");

        let summary = updater.update(&scope, 100, 80).await.unwrap();
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.initialized, 1);

        let summary = updater.update(&scope, 120, 60).await.unwrap();
        assert_eq!(summary.updated, 1);

        let r = row(&store, "ps-1").await;
        assert_eq!((r.total_capacity, r.available_capacity), (100, 80));
        assert_eq!((r.total_physical_capacity, r.available_physical_capacity), (120, 60));
        assert_eq!(r.version, 2);
    }

    #[tokio::test]
    async fn test_update_shrinking_available() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "ps-1", "X", "c1").await;
        let updater = updater(&store);
        let scope = CapacityScope::cluster("X", "c1");

        updater.update(&scope, 500, 500).await.unwrap();
        updater.update(&scope, 500, 300).await.unwrap();

        let r = row(&store, "ps-1").await;
        assert_eq!((r.total_capacity, r.available_capacity), (500, 500));
        assert_eq!((r.total_physical_capacity, r.available_physical_capacity), (500, 300));
    }

    #[tokio::test]
    async fn test_repeated_report_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "ps-1", "X", "c1").await;
        let updater = updater(&store);
        let scope = CapacityScope::cluster("X", "c1");

        updater.update(&scope, 100, 80).await.unwrap();
        let before = row(&store, "ps-1").await;

        let summary = updater.update(&scope, 100, 80).await.unwrap();
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.written(), 0);
        assert_eq!(row(&store, "ps-1").await, before);
    }

    #[tokio::test]
    async fn test_empty_scope_is_noop() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "ps-1", "X", "c1").await;
        let updater = updater(&store);
        let mut events = updater.subscribe();

        let summary = updater
            .update(&CapacityScope::cluster("X", "elsewhere"), 100, 80)
            .await
            .unwrap();
        assert_eq!(summary, CapacityUpdateSummary::default());
        assert_eq!(row(&store, "ps-1").await, CapacityRecord::empty());

        let event = events.recv().await.unwrap();
        assert!(matches!(event, CapacityEvent::ScopeEmpty { .. }));
    }

    #[tokio::test]
    async fn test_scope_only_touches_members() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "ps-1", "X", "c1").await;
        seed(&store, "ps-2", "X", "c1").await;
        seed(&store, "ps-3", "X", "c2").await;
        seed(&store, "ps-4", "Y", "c1").await;
        let updater = updater(&store);

        let summary = updater
            .update(&CapacityScope::cluster("X", "c1"), 100, 80)
            .await
            .unwrap();
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.initialized, 2);
        assert_eq!(row(&store, "ps-1").await.total_capacity, 100);
        assert_eq!(row(&store, "ps-2").await.total_capacity, 100);
        assert_eq!(row(&store, "ps-3").await, CapacityRecord::empty());
        assert_eq!(row(&store, "ps-4").await, CapacityRecord::empty());
    }

    #[tokio::test]
    async fn test_concurrent_updates_keep_first_write() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "ps-1", "X", "c1").await;
        let updater = updater(&store);
        let scope = CapacityScope::cluster("X", "c1");

        let tasks: Vec<_> = (1..=16u64)
            .map(|i| {
                let updater = updater.clone();
                let scope = scope.clone();
                tokio::spawn(async move { updater.update(&scope, 1000, i * 10).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let r = row(&store, "ps-1").await;
        assert_eq!(r.total_capacity, 1000);
        assert_eq!(r.total_physical_capacity, 1000);
        // Logical available came from exactly one of the reports
        assert_eq!(r.available_capacity % 10, 0);
        assert!((10..=160).contains(&r.available_capacity));
    }

    /// Capacity store whose first conditional writes lose the race
    struct ContendedStore {
        inner: Arc<MemoryStore>,
        conflicts_left: AtomicUsize,
        /// Errors returned by the next writes, last first
        failures: parking_lot::Mutex<Vec<Error>>,
        writes: AtomicUsize,
    }

    impl ContendedStore {
        fn new(inner: Arc<MemoryStore>, conflicts: usize, failures: Vec<Error>) -> Self {
            Self {
                inner,
                conflicts_left: AtomicUsize::new(conflicts),
                failures: parking_lot::Mutex::new(failures),
                writes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CapacityStore for ContendedStore {
        async fn insert(&self, id: &StorageId, record: CapacityRecord) -> Result<()> {
            CapacityStore::insert(self.inner.as_ref(), id, record).await
        }

        async fn get(&self, id: &StorageId) -> Result<Option<CapacityRecord>> {
            CapacityStore::get(self.inner.as_ref(), id).await
        }

        async fn compare_and_set(
            &self,
            id: &StorageId,
            expected_version: u64,
            record: CapacityRecord,
        ) -> Result<CasOutcome> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.failures.lock().pop() {
                return Err(err);
            }
            if self
                .conflicts_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Ok(CasOutcome::VersionMismatch);
            }
            self.inner.compare_and_set(id, expected_version, record).await
        }

        async fn delete(&self, id: &StorageId) -> Result<Option<CapacityRecord>> {
            CapacityStore::delete(self.inner.as_ref(), id).await
        }
    }

    #[tokio::test]
    async fn test_conflicting_write_is_retried() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "ps-1", "X", "c1").await;
        let contended = Arc::new(ContendedStore::new(store.clone(), 3, Vec::new()));
        let updater =
            CapacityUpdater::new(store.clone(), contended, CapacityUpdaterConfig::default());

        let summary = updater
            .update(&CapacityScope::cluster("X", "c1"), 100, 80)
            .await
            .unwrap();
        assert_eq!(summary.initialized, 1);
        assert_eq!(row(&store, "ps-1").await.total_capacity, 100);
    }

    #[tokio::test]
    async fn test_store_errors_classified_for_retry() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "ps-1", "X", "c1").await;
        seed(&store, "ps-2", "X", "c2").await;

        // A conflict reported by the store itself is transient
        let contended = Arc::new(ContendedStore::new(
            store.clone(),
            0,
            vec![Error::CapacityConflict { id: "ps-1".into() }],
        ));
        let updater = CapacityUpdater::new(
            store.clone(),
            contended.clone(),
            CapacityUpdaterConfig::default(),
        );
        let summary = updater
            .update(&CapacityScope::cluster("X", "c1"), 100, 80)
            .await
            .unwrap();
        assert_eq!(summary.initialized, 1);
        assert_eq!(contended.writes.load(Ordering::SeqCst), 2);

        // Anything else fails the row on the first attempt
        let broken = Arc::new(ContendedStore::new(
            store.clone(),
            0,
            vec![Error::Internal("disk full".into())],
        ));
        let updater =
            CapacityUpdater::new(store.clone(), broken.clone(), CapacityUpdaterConfig::default());
        let result = updater
            .update(&CapacityScope::cluster("X", "c2"), 100, 80)
            .await;
        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(broken.writes.load(Ordering::SeqCst), 1);
        assert!(row(&store, "ps-2").await.is_uninitialized());
    }
}
