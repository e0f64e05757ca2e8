//! Domain Ports - Core trait definitions for primary storage providers
//!
//! These traits define the boundary between the framework and each storage
//! backend. A backend plugs in by implementing [`PrimaryStorageFactory`] and
//! registering it with the [`crate::registry::StorageTypeRegistryBuilder`].

use crate::capacity::CapacityScope;
use crate::domain::hooks::ProviderHooks;
use crate::domain::model::{
    CreatePrimaryStorageRequest, PrimaryStorageInventory, PrimaryStorageRecord, StorageId,
};
use crate::error::Result;
use crate::registry::StorageTypeDescriptor;
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Provider Factory Port
// =============================================================================

/// Per storage-type factory creating and loading primary storage instances
#[async_trait]
pub trait PrimaryStorageFactory: Send + Sync {
    /// Type identifier and capability flags
    fn descriptor(&self) -> StorageTypeDescriptor;

    /// Create and persist a new storage from the generic base record.
    ///
    /// Provider parameters are validated before anything is written. Fails
    /// with `PersistenceConflict` when the id is already taken.
    async fn create_primary_storage(
        &self,
        base: PrimaryStorageRecord,
        request: &CreatePrimaryStorageRequest,
    ) -> Result<PrimaryStorageRecord>;

    /// Hydrate a runtime handle for an existing record
    async fn load_provider(&self, record: &PrimaryStorageRecord) -> Result<PrimaryStorageHandleRef>;

    /// Read-only projection of the full record
    async fn get_inventory(&self, id: &StorageId) -> Result<PrimaryStorageInventory>;

    /// Records affected by a capacity report for `cluster_name`
    fn capacity_scope(&self, cluster_name: &str) -> CapacityScope {
        CapacityScope::cluster(self.descriptor().id, cluster_name)
    }

    /// Lifecycle hooks this provider participates in
    fn hooks(&self) -> ProviderHooks {
        ProviderHooks::default()
    }
}

// =============================================================================
// Runtime Handle Port
// =============================================================================

/// Runtime handle of one primary storage instance
#[async_trait]
pub trait PrimaryStorageHandle: Send + Sync {
    fn id(&self) -> &StorageId;

    /// Start background activity. `false` means the handle is stateless and
    /// runs nothing in the background; that is not an error.
    async fn start(&self) -> Result<bool>;

    /// Stop background activity
    async fn stop(&self) -> Result<bool>;
}

// =============================================================================
// Backup Storage Resolution Port
// =============================================================================

/// Resolves the backup storages usable by a primary storage
#[async_trait]
pub trait BackupStorageFinder: Send + Sync {
    async fn find_backup_storage(&self, primary_storage: &StorageId) -> Result<Vec<String>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type PrimaryStorageFactoryRef = Arc<dyn PrimaryStorageFactory>;
pub type PrimaryStorageHandleRef = Arc<dyn PrimaryStorageHandle>;
pub type BackupStorageFinderRef = Arc<dyn BackupStorageFinder>;
