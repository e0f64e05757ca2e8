//! Shared Mount Point Provider
//!
//! File-backed primary storage mounted at the same path on every host.
//! Unlike cluster block storage it takes part in host self-fencing: hosts
//! keep a heartbeat file on the mount and fence themselves when it becomes
//! unreachable.

use crate::capacity::CapacityScope;
use crate::domain::hooks::{CancelSelfFencerParam, ProviderHooks, SelfFencerHooks, SelfFencerParam};
use crate::domain::model::{
    CreatePrimaryStorageRequest, PrimaryStorageInventory, PrimaryStorageRecord, StorageId,
    StorageTypeId,
};
use crate::domain::ports::{PrimaryStorageFactory, PrimaryStorageHandle, PrimaryStorageHandleRef};
use crate::error::{Error, Result};
use crate::registry::StorageTypeDescriptor;
use crate::store::Persistence;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Default storage type identifier
pub const SHARED_MOUNT_TYPE: &str = "SharedMountPoint";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SharedMountConfig {
    pub enabled: bool,
    pub type_name: String,
}

impl Default for SharedMountConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            type_name: SHARED_MOUNT_TYPE.to_string(),
        }
    }
}

// =============================================================================
// Factory
// =============================================================================

pub struct SharedMountFactory {
    storage_type: StorageTypeId,
    persistence: Persistence,
    fencer: Arc<SharedMountFencer>,
}

impl SharedMountFactory {
    pub fn new(config: SharedMountConfig, persistence: Persistence) -> Self {
        let storage_type = StorageTypeId::new(config.type_name);
        Self {
            fencer: Arc::new(SharedMountFencer::new(storage_type.clone())),
            storage_type,
            persistence,
        }
    }

    /// Self fencers currently armed on hosts
    pub fn fencer(&self) -> &Arc<SharedMountFencer> {
        &self.fencer
    }
}

#[async_trait]
impl PrimaryStorageFactory for SharedMountFactory {
    fn descriptor(&self) -> StorageTypeDescriptor {
        StorageTypeDescriptor::new(self.storage_type.clone()).with_heartbeat_file(true)
    }

    async fn create_primary_storage(
        &self,
        base: PrimaryStorageRecord,
        request: &CreatePrimaryStorageRequest,
    ) -> Result<PrimaryStorageRecord> {
        if !request.url.starts_with('/') {
            return Err(Error::Validation(format!(
                "url of {} primary storage must be an absolute mount path, got {:?}",
                self.storage_type, request.url
            )));
        }

        let mut record = base;
        record.storage_type = self.storage_type.clone();
        record.mount_path = request.url.trim_end_matches('/').to_string();
        if record.mount_path.is_empty() {
            record.mount_path = "/".to_string();
        }

        self.persistence.records.insert(record.clone()).await?;
        info!(
            storage = %record.uuid,
            mount_path = %record.mount_path,
            "Created shared mount primary storage"
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
        Ok(Arc::new(SharedMountHandle {
            id: stored.uuid,
            mounted: AtomicBool::new(false),
        }))
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

    /// Each mount reports for itself; the report's cluster name is the storage id.
    /// Ids of other storage types are never matched.
    fn capacity_scope(&self, cluster_name: &str) -> CapacityScope {
        CapacityScope::storages(self.storage_type.clone(), [cluster_name])
    }

    fn hooks(&self) -> ProviderHooks {
        ProviderHooks::default().with_self_fencer(self.fencer.clone())
    }
}

// =============================================================================
// Runtime Handle
// =============================================================================

pub struct SharedMountHandle {
    id: StorageId,
    mounted: AtomicBool,
}

impl SharedMountHandle {
    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrimaryStorageHandle for SharedMountHandle {
    fn id(&self) -> &StorageId {
        &self.id
    }

    async fn start(&self) -> Result<bool> {
        self.mounted.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn stop(&self) -> Result<bool> {
        Ok(self.mounted.swap(false, Ordering::SeqCst))
    }
}

// =============================================================================
// Self Fencer
// =============================================================================

/// Tracks self fencers armed per (host, storage)
pub struct SharedMountFencer {
    storage_type: StorageTypeId,
    active: DashMap<(String, StorageId), SelfFencerParam>,
}

impl SharedMountFencer {
    fn new(storage_type: StorageTypeId) -> Self {
        Self {
            storage_type,
            active: DashMap::new(),
        }
    }

    pub fn is_armed(&self, host_uuid: &str, storage: &StorageId) -> bool {
        self.active
            .contains_key(&(host_uuid.to_string(), storage.clone()))
    }

    pub fn armed_count(&self) -> usize {
        self.active.len()
    }
}

#[async_trait]
impl SelfFencerHooks for SharedMountFencer {
    fn self_fencer_storage_type(&self) -> Option<StorageTypeId> {
        Some(self.storage_type.clone())
    }

    async fn setup_self_fencer(&self, param: &SelfFencerParam) -> Result<()> {
        if param.interval_secs == 0 || param.max_attempts == 0 {
            return Err(Error::Validation(
                "self fencer interval and max attempts must be positive".into(),
            ));
        }
        info!(host = %param.host_uuid, storage = %param.primary_storage_uuid, "Armed self fencer");
        self.active.insert(
            (param.host_uuid.clone(), param.primary_storage_uuid.clone()),
            param.clone(),
        );
        Ok(())
    }

    async fn cancel_self_fencer(&self, param: &CancelSelfFencerParam) -> Result<()> {
        let key = (param.host_uuid.clone(), param.primary_storage_uuid.clone());
        if self.active.remove(&key).is_some() {
            info!(
                host = %param.host_uuid,
                storage = %param.primary_storage_uuid,
                "Cancelled self fencer"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn factory() -> SharedMountFactory {
        SharedMountFactory::new(SharedMountConfig::default(), Persistence::in_memory())
    }

    #[tokio::test]
    async fn test_create_requires_absolute_url() {
        let factory = factory();
        let request = CreatePrimaryStorageRequest::new("nfs", "zone-1", SHARED_MOUNT_TYPE)
            .with_url("relative/path");
        let base = PrimaryStorageRecord::from_request(StorageId::new("ps-1"), &request);
        assert_matches!(
            factory.create_primary_storage(base, &request).await,
            Err(Error::Validation(_))
        );

        let request = request.with_url("/mnt/shared/");
        let base = PrimaryStorageRecord::from_request(StorageId::new("ps-1"), &request);
        let record = factory.create_primary_storage(base, &request).await.unwrap();
        assert_eq!(record.mount_path, "/mnt/shared");
        assert!(record.pools.is_none());
    }

    #[tokio::test]
    async fn test_handle_start_stop() {
        let factory = factory();
        let request =
            CreatePrimaryStorageRequest::new("nfs", "zone-1", SHARED_MOUNT_TYPE).with_url("/mnt/a");
        let base = PrimaryStorageRecord::from_request(StorageId::new("ps-1"), &request);
        let record = factory.create_primary_storage(base, &request).await.unwrap();

        let handle = factory.load_provider(&record).await.unwrap();
        assert!(handle.start().await.unwrap());
        assert!(handle.stop().await.unwrap());
        assert!(!handle.stop().await.unwrap());
    }

    #[test]
    fn test_capacity_scope_is_per_storage() {
        let scope = factory().capacity_scope("ps-1");
        assert_eq!(scope, CapacityScope::storages(SHARED_MOUNT_TYPE, ["ps-1"]));
    }

    #[tokio::test]
    async fn test_self_fencer_lifecycle() {
        let factory = factory();
        let hooks = factory.hooks();
        assert_eq!(
            hooks.self_fencer.self_fencer_storage_type(),
            Some(StorageTypeId::new(SHARED_MOUNT_TYPE))
        );

        let storage = StorageId::new("ps-1");
        let param = SelfFencerParam {
            host_uuid: "host-1".into(),
            primary_storage_uuid: storage.clone(),
            interval_secs: 5,
            max_attempts: 6,
            storage_check_timeout_secs: 30,
        };
        hooks.self_fencer.setup_self_fencer(&param).await.unwrap();
        assert!(factory.fencer().is_armed("host-1", &storage));

        hooks
            .self_fencer
            .cancel_self_fencer(&CancelSelfFencerParam {
                host_uuid: "host-1".into(),
                primary_storage_uuid: storage.clone(),
            })
            .await
            .unwrap();
        assert_eq!(factory.fencer().armed_count(), 0);

        let invalid = SelfFencerParam {
            interval_secs: 0,
            ..param
        };
        assert_matches!(
            hooks.self_fencer.setup_self_fencer(&invalid).await,
            Err(Error::Validation(_))
        );
    }
}
