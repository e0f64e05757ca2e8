//! Cluster Block Storage Provider
//!
//! Pool-based block storage shared by every host of a backend cluster. Each
//! primary storage carves three pools (root volumes, data volumes, image
//! cache) out of the backend; pool names are derived from the storage id
//! unless the operator supplies them. Capacity is reported per backend
//! cluster and applies to every primary storage bound to that cluster.

use crate::domain::model::{
    CreatePrimaryStorageRequest, PoolAssignment, PoolKind, PrimaryStorageInventory,
    PrimaryStorageRecord, StorageId, StorageTypeId,
};
use crate::domain::ports::{
    BackupStorageFinder, PrimaryStorageFactory, PrimaryStorageHandle, PrimaryStorageHandleRef,
};
use crate::error::{Error, Result};
use crate::registry::StorageTypeDescriptor;
use crate::store::Persistence;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default storage type identifier
pub const CLUSTER_BLOCK_TYPE: &str = "ClusterBlock";

/// Longest pool name the backend accepts
const MAX_POOL_NAME_LEN: usize = 128;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterBlockConfig {
    pub enabled: bool,
    /// Type identifier the provider registers under
    pub type_name: String,
}

impl Default for ClusterBlockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            type_name: CLUSTER_BLOCK_TYPE.to_string(),
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

pub struct ClusterBlockFactory {
    storage_type: StorageTypeId,
    persistence: Persistence,
}

impl ClusterBlockFactory {
    pub fn new(config: ClusterBlockConfig, persistence: Persistence) -> Self {
        Self {
            storage_type: StorageTypeId::new(config.type_name),
            persistence,
        }
    }

    fn validate(&self, request: &CreatePrimaryStorageRequest) -> Result<()> {
        match request.cluster_name.as_deref() {
            Some(name) if !name.trim().is_empty() => {}
            _ => {
                return Err(Error::Validation(format!(
                    "clusterName is required for {} primary storage",
                    self.storage_type
                )))
            }
        }

        for kind in PoolKind::ALL {
            if let Some(pool) = request.pools.get(kind) {
                validate_pool_name(kind, pool)?;
            }
        }
        Ok(())
    }

    /// Explicit names win; the rest are derived from the storage id
    fn assign_pools(id: &StorageId, request: &CreatePrimaryStorageRequest) -> PoolAssignment {
        let name = |kind: PoolKind| {
            request
                .pools
                .get(kind)
                .map(str::to_string)
                .unwrap_or_else(|| kind.derive_name(id))
        };
        PoolAssignment {
            root_volume_pool: name(PoolKind::RootVolume),
            data_volume_pool: name(PoolKind::DataVolume),
            image_cache_pool: name(PoolKind::ImageCache),
        }
    }

    /// Undo a partially created storage
    async fn rollback(&self, id: &StorageId) {
        if let Err(e) = self.persistence.tags.delete_tags_of(id).await {
            warn!(storage = %id, error = %e, "Failed to remove tags during rollback");
        }
        if let Err(e) = self.persistence.records.delete(id).await {
            warn!(storage = %id, error = %e, "Failed to remove record during rollback");
        }
    }
}

fn validate_pool_name(kind: PoolKind, pool: &str) -> Result<()> {
    if pool.is_empty() || pool.len() > MAX_POOL_NAME_LEN {
        return Err(Error::Validation(format!(
            "{} pool name must be 1 to {} characters",
            kind, MAX_POOL_NAME_LEN
        )));
    }
    if let Some(bad) = pool
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(Error::Validation(format!(
            "{} pool name {:?} contains invalid character {:?}",
            kind, pool, bad
        )));
    }
    Ok(())
}

#[async_trait]
impl PrimaryStorageFactory for ClusterBlockFactory {
    fn descriptor(&self) -> StorageTypeDescriptor {
        StorageTypeDescriptor::new(self.storage_type.clone())
            .with_heartbeat_file(true)
            .with_gateway_ping(true)
            .with_backup_storage_finder(Arc::new(SameClusterBackupStorage {
                persistence: self.persistence.clone(),
            }))
    }

    async fn create_primary_storage(
        &self,
        base: PrimaryStorageRecord,
        request: &CreatePrimaryStorageRequest,
    ) -> Result<PrimaryStorageRecord> {
        self.validate(request)?;

        let mut record = base;
        record.storage_type = self.storage_type.clone();
        record.mount_path = self.storage_type.to_string();
        record.cluster_name = request.cluster_name.clone();
        record.pools = Some(Self::assign_pools(&record.uuid, request));

        self.persistence.records.insert(record.clone()).await?;

        for kind in PoolKind::ALL {
            if request.pools.get(kind).is_none() {
                continue;
            }
            if let Err(e) = self
                .persistence
                .tags
                .create_inherent_tag(&record.uuid, kind.predefined_tag())
                .await
            {
                warn!(
                    storage = %record.uuid,
                    pool = %kind,
                    error = %e,
                    "Failed to tag predefined pool"
                );
                self.rollback(&record.uuid).await;
                return Err(e);
            }
        }

        info!(
            storage = %record.uuid,
            storage_type = %record.storage_type,
            cluster = record.cluster_name.as_deref().unwrap_or_default(),
            "Created cluster block primary storage"
        );
        Ok(record)
    }

    async fn load_provider(
        &self,
        record: &PrimaryStorageRecord,
    ) -> Result<PrimaryStorageHandleRef> {
        let stored = self
            .persistence
            .records
            .get(&record.uuid)
            .await?
            .ok_or_else(|| Error::not_found("PrimaryStorage", record.uuid.as_str()))?;
        Ok(Arc::new(ClusterBlockHandle { id: stored.uuid }))
    }

    async fn get_inventory(&self, id: &StorageId) -> Result<PrimaryStorageInventory> {
        let record = self
            .persistence
            .records
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("PrimaryStorage", id.as_str()))?;
        let capacity = self.persistence.capacity.get(id).await?;
        Ok(PrimaryStorageInventory::from_record(
            record,
            &self.descriptor(),
            capacity,
        ))
    }
}

// =============================================================================
// Runtime Handle
// =============================================================================

/// Stateless: all state lives in the backend cluster
pub struct ClusterBlockHandle {
    id: StorageId,
}

#[async_trait]
impl PrimaryStorageHandle for ClusterBlockHandle {
    fn id(&self) -> &StorageId {
        &self.id
    }

    async fn start(&self) -> Result<bool> {
        Ok(false)
    }

    async fn stop(&self) -> Result<bool> {
        Ok(true)
    }
}

// =============================================================================
// Backup Storage Resolution
// =============================================================================

/// Backup storages registered under the primary storage's cluster name
struct SameClusterBackupStorage {
    persistence: Persistence,
}

#[async_trait]
impl BackupStorageFinder for SameClusterBackupStorage {
    async fn find_backup_storage(&self, primary_storage: &StorageId) -> Result<Vec<String>> {
        let record = self
            .persistence
            .records
            .get(primary_storage)
            .await?
            .ok_or_else(|| Error::not_found("PrimaryStorage", primary_storage.as_str()))?;

        let Some(cluster) = record.cluster_name else {
            return Ok(Vec::new());
        };
        let found = self.persistence.backups.backup_storage_in_cluster(&cluster).await?;
        debug!(
            storage = %primary_storage,
            %cluster,
            count = found.len(),
            "Resolved backup storages"
        );
        Ok(found.into_iter().map(|b| b.uuid).collect())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{BackupStorageRef, SystemTag};
    use crate::store::{MemoryStore, TagStore};
    use assert_matches::assert_matches;

    fn factory(type_name: &str) -> (ClusterBlockFactory, Persistence) {
        let persistence = Persistence::in_memory();
        let config = ClusterBlockConfig {
            type_name: type_name.to_string(),
            ..Default::default()
        };
        (ClusterBlockFactory::new(config, persistence.clone()), persistence)
    }

    fn request(type_name: &str) -> CreatePrimaryStorageRequest {
        CreatePrimaryStorageRequest::new("block-1", "zone-1", type_name).with_cluster_name("c1")
    }

    async fn create(
        factory: &ClusterBlockFactory,
        id: &str,
        request: &CreatePrimaryStorageRequest,
    ) -> Result<PrimaryStorageRecord> {
        let base = PrimaryStorageRecord::from_request(StorageId::new(id), request);
        factory.create_primary_storage(base, request).await
    }

    #[tokio::test]
    async fn test_derived_pool_names_without_tags() {
        let (factory, persistence) = factory("X");
        let record = create(&factory, "ps-1", &request("X")).await.unwrap();

        let pools = record.pools.unwrap();
        assert_eq!(pools.root_volume_pool, "pri-v-r-ps-1");
        assert_eq!(pools.data_volume_pool, "pri-v-d-ps-1");
        assert_eq!(pools.image_cache_pool, "pri-c-ps-1");
        assert_eq!(record.mount_path, "X");

        let tags = persistence.tags.tags_of(&StorageId::new("ps-1")).await.unwrap();
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_pools_get_inherent_tags() {
        let (factory, persistence) = factory(CLUSTER_BLOCK_TYPE);
        let request = request(CLUSTER_BLOCK_TYPE)
            .with_pool(PoolKind::DataVolume, "ssd-data")
            .with_pool(PoolKind::RootVolume, "ssd-root")
            .with_pool(PoolKind::ImageCache, "ssd-cache");
        let record = create(&factory, "ps-2", &request).await.unwrap();

        let pools = record.pools.unwrap();
        assert_eq!(pools.root_volume_pool, "ssd-root");
        assert_eq!(pools.data_volume_pool, "ssd-data");
        assert_eq!(pools.image_cache_pool, "ssd-cache");

        let tags: Vec<String> = persistence
            .tags
            .tags_of(&StorageId::new("ps-2"))
            .await
            .unwrap()
            .into_iter()
            .map(|t| {
                assert!(t.inherent);
                t.tag
            })
            .collect();
        assert_eq!(
            tags,
            vec![
                "predefinedImageCachePool",
                "predefinedRootVolumePool",
                "predefinedDataVolumePool",
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let (factory, _) = factory("X");
        create(&factory, "ps-1", &request("X")).await.unwrap();

        let result = create(&factory, "ps-1", &request("X")).await;
        assert_matches!(result, Err(Error::PersistenceConflict { .. }));
    }

    #[tokio::test]
    async fn test_validation_before_persistence() {
        let (factory, persistence) = factory("X");

        let missing_cluster = CreatePrimaryStorageRequest::new("block-1", "zone-1", "X");
        let result = create(&factory, "ps-1", &missing_cluster).await;
        assert_matches!(result, Err(Error::Validation(_)));

        let bad_pool = request("X").with_pool(PoolKind::DataVolume, "bad pool/name");
        let result = create(&factory, "ps-1", &bad_pool).await;
        assert_matches!(result, Err(Error::Validation(_)));

        assert!(persistence.records.list().await.unwrap().is_empty());
    }

    /// Tag store that refuses every write
    struct BrokenTags;

    #[async_trait]
    impl TagStore for BrokenTags {
        async fn create_tag(
            &self,
            _resource: &StorageId,
            _tag: &str,
            _inherent: bool,
        ) -> Result<SystemTag> {
            Err(Error::Internal("tag table unavailable".into()))
        }

        async fn tags_of(&self, _resource: &StorageId) -> Result<Vec<SystemTag>> {
            Ok(Vec::new())
        }

        async fn delete_tags_of(&self, _resource: &StorageId) -> Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_tag_failure_removes_record() {
        let mut persistence = Persistence::in_memory();
        persistence.tags = Arc::new(BrokenTags);
        let factory = ClusterBlockFactory::new(ClusterBlockConfig::default(), persistence.clone());

        let request =
            request(CLUSTER_BLOCK_TYPE).with_pool(PoolKind::RootVolume, "ssd-root");
        let result = create(&factory, "ps-1", &request).await;
        assert_matches!(result, Err(Error::Internal(_)));
        assert!(persistence
            .records
            .get(&StorageId::new("ps-1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_load_and_inventory() {
        let (factory, persistence) = factory("X");
        let record = create(&factory, "ps-1", &request("X")).await.unwrap();

        let handle = factory.load_provider(&record).await.unwrap();
        assert_eq!(handle.id().as_str(), "ps-1");
        assert!(!handle.start().await.unwrap());

        persistence
            .capacity
            .insert(&record.uuid, crate::domain::model::CapacityRecord::empty())
            .await
            .unwrap();
        let inventory = factory.get_inventory(&record.uuid).await.unwrap();
        assert!(inventory.supports_heartbeat_file);
        assert!(inventory.supports_gateway_ping);
        assert_eq!(inventory.total_capacity, 0);

        let missing = factory.get_inventory(&StorageId::new("ps-9")).await;
        assert_matches!(missing, Err(Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_backup_storage_same_cluster() {
        let store = Arc::new(MemoryStore::new());
        let persistence = Persistence::from_memory(store.clone());
        let factory = ClusterBlockFactory::new(ClusterBlockConfig::default(), persistence.clone());
        create(&factory, "ps-1", &request(CLUSTER_BLOCK_TYPE)).await.unwrap();

        for (uuid, cluster) in [("bs-1", "c1"), ("bs-2", "c2")] {
            persistence
                .backups
                .register_backup_storage(BackupStorageRef {
                    uuid: uuid.into(),
                    name: uuid.into(),
                    cluster_name: Some(cluster.into()),
                })
                .await
                .unwrap();
        }

        let finder = factory.descriptor().backup_storage_finder.unwrap();
        let found = finder.find_backup_storage(&StorageId::new("ps-1")).await.unwrap();
        assert_eq!(found, vec!["bs-1".to_string()]);
    }
}
