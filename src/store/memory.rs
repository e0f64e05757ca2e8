//! In-Memory Store
//!
//! DashMap-backed tables. Capacity rows are updated under the DashMap entry
//! lock, which gives the per-row atomicity the capacity updater relies on.

use crate::capacity::CapacityScope;
use crate::domain::model::{
    BackupStorageRef, CapacityRecord, PrimaryStorageRecord, StorageId, StorageTypeId, SystemTag,
};
use crate::error::{Error, Result};
use crate::store::{
    BackupStorageDirectory, CapacityStore, CasOutcome, PrimaryStorageStore, TagStore,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

/// Index key for capacity scoping by cluster name
type ClusterKey = (StorageTypeId, String);

// =============================================================================
// Memory Store
// =============================================================================

/// In-process implementation of every persistence port
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<StorageId, PrimaryStorageRecord>,
    /// (storage type, cluster name) -> storage ids
    cluster_index: DashMap<ClusterKey, BTreeSet<StorageId>>,
    capacity: DashMap<StorageId, CapacityRecord>,
    tags: RwLock<HashMap<StorageId, Vec<SystemTag>>>,
    backups: DashMap<String, BackupStorageRef>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    fn cluster_key(record: &PrimaryStorageRecord) -> Option<ClusterKey> {
        record
            .cluster_name
            .as_ref()
            .map(|name| (record.storage_type.clone(), name.clone()))
    }

    fn index(&self, record: &PrimaryStorageRecord) {
        if let Some(key) = Self::cluster_key(record) {
            self.cluster_index
                .entry(key)
                .or_default()
                .insert(record.uuid.clone());
        }
    }

    fn unindex(&self, record: &PrimaryStorageRecord) {
        if let Some(key) = Self::cluster_key(record) {
            if let Some(mut ids) = self.cluster_index.get_mut(&key) {
                ids.remove(&record.uuid);
            }
            self.cluster_index.remove_if(&key, |_, ids| ids.is_empty());
        }
    }
}

#[async_trait]
impl PrimaryStorageStore for MemoryStore {
    async fn insert(&self, record: PrimaryStorageRecord) -> Result<()> {
        match self.records.entry(record.uuid.clone()) {
            Entry::Occupied(_) => Err(Error::conflict("PrimaryStorage", record.uuid.as_str())),
            Entry::Vacant(slot) => {
                self.index(&record);
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &StorageId) -> Result<Option<PrimaryStorageRecord>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn update(&self, record: PrimaryStorageRecord) -> Result<()> {
        match self.records.get_mut(&record.uuid) {
            Some(mut existing) => {
                self.unindex(&existing);
                self.index(&record);
                *existing = record;
                Ok(())
            }
            None => Err(Error::not_found("PrimaryStorage", record.uuid.as_str())),
        }
    }

    async fn delete(&self, id: &StorageId) -> Result<Option<PrimaryStorageRecord>> {
        let removed = self.records.remove(id).map(|(_, record)| record);
        if let Some(record) = &removed {
            self.unindex(record);
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<PrimaryStorageRecord>> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.uuid.cmp(&b.uuid)));
        Ok(records)
    }

    async fn resolve_scope(&self, scope: &CapacityScope) -> Result<Vec<StorageId>> {
        let ids = match scope {
            CapacityScope::ClusterName {
                storage_type,
                cluster_name,
            } => self
                .cluster_index
                .get(&(storage_type.clone(), cluster_name.clone()))
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
            CapacityScope::Storages { storage_type, ids } => ids
                .iter()
                .filter(|id| {
                    self.records
                        .get(*id)
                        .map_or(false, |r| &r.value().storage_type == storage_type)
                })
                .cloned()
                .collect(),
        };
        Ok(ids)
    }
}

#[async_trait]
impl CapacityStore for MemoryStore {
    async fn insert(&self, id: &StorageId, record: CapacityRecord) -> Result<()> {
        match self.capacity.entry(id.clone()) {
            Entry::Occupied(_) => Err(Error::conflict("PrimaryStorageCapacity", id.as_str())),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &StorageId) -> Result<Option<CapacityRecord>> {
        Ok(self.capacity.get(id).map(|r| *r.value()))
    }

    async fn compare_and_set(
        &self,
        id: &StorageId,
        expected_version: u64,
        record: CapacityRecord,
    ) -> Result<CasOutcome> {
        // The RefMut holds the shard lock for the whole check-and-write
        let Some(mut row) = self.capacity.get_mut(id) else {
            return Ok(CasOutcome::Missing);
        };
        if row.version != expected_version {
            return Ok(CasOutcome::VersionMismatch);
        }
        *row = CapacityRecord {
            version: expected_version + 1,
            ..record
        };
        Ok(CasOutcome::Applied(*row))
    }

    async fn delete(&self, id: &StorageId) -> Result<Option<CapacityRecord>> {
        Ok(self.capacity.remove(id).map(|(_, record)| record))
    }
}

#[async_trait]
impl TagStore for MemoryStore {
    async fn create_tag(
        &self,
        resource: &StorageId,
        tag: &str,
        inherent: bool,
    ) -> Result<SystemTag> {
        let mut tags = self.tags.write();
        let entry = tags.entry(resource.clone()).or_default();
        if let Some(existing) = entry.iter().find(|t| t.tag == tag) {
            return Ok(existing.clone());
        }
        let created = SystemTag {
            resource_uuid: resource.clone(),
            tag: tag.to_string(),
            inherent,
            created_at: Utc::now(),
        };
        entry.push(created.clone());
        Ok(created)
    }

    async fn tags_of(&self, resource: &StorageId) -> Result<Vec<SystemTag>> {
        Ok(self.tags.read().get(resource).cloned().unwrap_or_default())
    }

    async fn delete_tags_of(&self, resource: &StorageId) -> Result<usize> {
        Ok(self.tags.write().remove(resource).map(|t| t.len()).unwrap_or(0))
    }
}

#[async_trait]
impl BackupStorageDirectory for MemoryStore {
    async fn register_backup_storage(&self, backup: BackupStorageRef) -> Result<()> {
        match self.backups.entry(backup.uuid.clone()) {
            Entry::Occupied(_) => Err(Error::conflict("BackupStorage", backup.uuid)),
            Entry::Vacant(slot) => {
                slot.insert(backup);
                Ok(())
            }
        }
    }

    async fn backup_storage_in_cluster(&self, cluster_name: &str) -> Result<Vec<BackupStorageRef>> {
        let mut found: Vec<_> = self
            .backups
            .iter()
            .filter(|b| b.cluster_name.as_deref() == Some(cluster_name))
            .map(|b| b.value().clone())
            .collect();
        found.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        Ok(found)
    }
}

// =============================================================================
// Tests
// =============================================================================
