//! Persistence Ports
//!
//! Async traits for the tables the framework reads and writes. Database
//! mechanics live outside this crate; [`MemoryStore`] is the in-process
//! implementation used by the binary and the tests.

mod memory;

pub use memory::MemoryStore;

use crate::capacity::CapacityScope;
use crate::domain::model::{
    BackupStorageRef, CapacityRecord, PrimaryStorageRecord, StorageId, SystemTag,
};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Primary Storage Table
// =============================================================================

#[async_trait]
pub trait PrimaryStorageStore: Send + Sync {
    /// Insert a new record. Fails with `PersistenceConflict` if the id exists.
    async fn insert(&self, record: PrimaryStorageRecord) -> Result<()>;

    async fn get(&self, id: &StorageId) -> Result<Option<PrimaryStorageRecord>>;

    /// Replace an existing record. Fails with `NotFound` if absent.
    async fn update(&self, record: PrimaryStorageRecord) -> Result<()>;

    /// Returns the deleted record if it existed
    async fn delete(&self, id: &StorageId) -> Result<Option<PrimaryStorageRecord>>;

    async fn list(&self) -> Result<Vec<PrimaryStorageRecord>>;

    /// Ids of the records selected by a capacity scope
    async fn resolve_scope(&self, scope: &CapacityScope) -> Result<Vec<StorageId>>;
}

// =============================================================================
// Capacity Table
// =============================================================================

/// Result of a conditional capacity write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Written; carries the stored row with its new version
    Applied(CapacityRecord),
    /// Another writer got there first
    VersionMismatch,
    /// The row no longer exists
    Missing,
}

#[async_trait]
pub trait CapacityStore: Send + Sync {
    /// Insert the capacity row of a new storage
    async fn insert(&self, id: &StorageId, record: CapacityRecord) -> Result<()>;

    async fn get(&self, id: &StorageId) -> Result<Option<CapacityRecord>>;

    /// Write `record` only if the stored row still has `expected_version`.
    ///
    /// The check and the write are atomic for the row; the stored version is
    /// bumped by one.
    async fn compare_and_set(
        &self,
        id: &StorageId,
        expected_version: u64,
        record: CapacityRecord,
    ) -> Result<CasOutcome>;

    async fn delete(&self, id: &StorageId) -> Result<Option<CapacityRecord>>;
}

// =============================================================================
// System Tag Table
// =============================================================================

#[async_trait]
pub trait TagStore: Send + Sync {
    /// Attach `tag` to `resource`. Creating an existing tag returns it unchanged.
    async fn create_tag(
        &self,
        resource: &StorageId,
        tag: &str,
        inherent: bool,
    ) -> Result<SystemTag>;

    /// Attach a system-created tag
    async fn create_inherent_tag(&self, resource: &StorageId, tag: &str) -> Result<SystemTag> {
        self.create_tag(resource, tag, true).await
    }

    async fn tags_of(&self, resource: &StorageId) -> Result<Vec<SystemTag>>;

    /// Returns the number of removed tags
    async fn delete_tags_of(&self, resource: &StorageId) -> Result<usize>;
}

// =============================================================================
// Backup Storage Directory
// =============================================================================

#[async_trait]
pub trait BackupStorageDirectory: Send + Sync {
    async fn register_backup_storage(&self, backup: BackupStorageRef) -> Result<()>;

    async fn backup_storage_in_cluster(&self, cluster_name: &str) -> Result<Vec<BackupStorageRef>>;
}

// =============================================================================
// Persistence Bundle
// =============================================================================

/// Handles to every table, passed to factories and services
#[derive(Clone)]
pub struct Persistence {
    pub records: Arc<dyn PrimaryStorageStore>,
    pub capacity: Arc<dyn CapacityStore>,
    pub tags: Arc<dyn TagStore>,
    pub backups: Arc<dyn BackupStorageDirectory>,
}

impl Persistence {
    /// All tables backed by one in-memory store
    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }

    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            records: store.clone(),
            capacity: store.clone(),
            tags: store.clone(),
            backups: store,
        }
    }
}
