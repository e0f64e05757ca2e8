//! Primary Storage Service
//!
//! Coordinates the control plane operations on primary storage:
//! - Creation through the factory registered for the requested type
//! - Runtime handle lifecycle
//! - Capacity reports and aggregated capacity queries
//! - Routing of lifecycle hooks through the extension-point dispatcher

use crate::capacity::{
    CapacityReport, CapacityReportSink, CapacityUpdateSummary, CapacityUpdater,
    CapacityUpdaterConfig,
};
use crate::controlplane::capacity_query::{CapacityQuery, CapacityQueryResult, SessionPolicy};
use crate::dispatch::ExtensionPointDispatcher;
use crate::domain::model::{
    CapacityRecord, CreatePrimaryStorageRequest, PrimaryStorageInventory, PrimaryStorageRecord,
    StorageId, StorageTypeId,
};
use crate::domain::ports::{PrimaryStorageFactoryRef, PrimaryStorageHandleRef};
use crate::error::{Error, Result};
use crate::registry::StorageTypeRegistry;
use crate::store::Persistence;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// =============================================================================
// List Filter
// =============================================================================

/// Filter for listing primary storages; empty fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrimaryStorageFilter {
    pub uuids: Vec<StorageId>,
    pub zone_uuid: Option<String>,
    pub storage_type: Option<StorageTypeId>,
}

impl PrimaryStorageFilter {
    pub fn matches(&self, record: &PrimaryStorageRecord) -> bool {
        (self.uuids.is_empty() || self.uuids.contains(&record.uuid))
            && self
                .zone_uuid
                .as_ref()
                .map_or(true, |zone| &record.zone_uuid == zone)
            && self
                .storage_type
                .as_ref()
                .map_or(true, |t| &record.storage_type == t)
    }
}

// =============================================================================
// Service
// =============================================================================

pub struct PrimaryStorageService {
    registry: Arc<StorageTypeRegistry>,
    persistence: Persistence,
    updater: Arc<CapacityUpdater>,
    dispatcher: Arc<ExtensionPointDispatcher>,
    sessions: SessionPolicy,
    /// Handles of loaded storages
    handles: RwLock<BTreeMap<StorageId, PrimaryStorageHandleRef>>,
}

impl PrimaryStorageService {
    pub fn new(
        registry: Arc<StorageTypeRegistry>,
        persistence: Persistence,
        updater_config: CapacityUpdaterConfig,
        sessions: SessionPolicy,
    ) -> Arc<Self> {
        let updater = CapacityUpdater::new(
            persistence.records.clone(),
            persistence.capacity.clone(),
            updater_config,
        );
        let dispatcher = Arc::new(ExtensionPointDispatcher::new(
            &registry,
            persistence.records.clone(),
        ));

        Arc::new(Self {
            registry,
            persistence,
            updater,
            dispatcher,
            sessions,
            handles: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<StorageTypeRegistry> {
        &self.registry
    }

    pub fn updater(&self) -> &Arc<CapacityUpdater> {
        &self.updater
    }

    pub fn dispatcher(&self) -> &Arc<ExtensionPointDispatcher> {
        &self.dispatcher
    }

    async fn record(&self, id: &StorageId) -> Result<PrimaryStorageRecord> {
        self.persistence
            .records
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("PrimaryStorage", id.as_str()))
    }

    // ===== Lifecycle =====

    /// Create a primary storage of the requested type and load its handle
    pub async fn create(
        &self,
        request: CreatePrimaryStorageRequest,
    ) -> Result<PrimaryStorageInventory> {
        for (field, value) in [
            ("name", request.name.as_str()),
            ("zoneUuid", request.zone_uuid.as_str()),
            ("type", request.storage_type.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{} is required", field)));
            }
        }

        let factory = self.registry.resolve(&request.storage_type)?;

        let id = match &request.resource_uuid {
            Some(uuid) if !uuid.trim().is_empty() => StorageId::new(uuid.trim()),
            _ => StorageId::generate(),
        };

        info!(
            storage = %id,
            storage_type = %request.storage_type,
            name = %request.name,
            "Creating primary storage"
        );

        let base = PrimaryStorageRecord::from_request(id.clone(), &request);
        let record = factory.create_primary_storage(base, &request).await?;

        if let Err(e) = self.finish_create(&factory, &record).await {
            warn!(
                storage = %record.uuid,
                error = %e,
                "Failed to bring up primary storage, removing it"
            );
            self.rollback_create(&record.uuid).await;
            return Err(e);
        }

        factory.get_inventory(&record.uuid).await
    }

    /// Capacity row and running handle of a freshly persisted storage
    async fn finish_create(
        &self,
        factory: &PrimaryStorageFactoryRef,
        record: &PrimaryStorageRecord,
    ) -> Result<()> {
        self.persistence
            .capacity
            .insert(&record.uuid, CapacityRecord::empty())
            .await?;

        let handle = factory.load_provider(record).await?;
        let started = handle.start().await?;
        debug!(storage = %record.uuid, started, "Loaded primary storage handle");
        self.handles.write().await.insert(record.uuid.clone(), handle);
        Ok(())
    }

    /// Undo everything written for a storage whose creation failed
    async fn rollback_create(&self, id: &StorageId) {
        if let Err(e) = self.persistence.capacity.delete(id).await {
            warn!(storage = %id, error = %e, "Failed to remove capacity during rollback");
        }
        if let Err(e) = self.persistence.tags.delete_tags_of(id).await {
            warn!(storage = %id, error = %e, "Failed to remove tags during rollback");
        }
        if let Err(e) = self.persistence.records.delete(id).await {
            warn!(storage = %id, error = %e, "Failed to remove record during rollback");
        }
    }

    pub async fn get_inventory(&self, id: &StorageId) -> Result<PrimaryStorageInventory> {
        let record = self.record(id).await?;
        let factory = self.registry.resolve(&record.storage_type)?;
        factory.get_inventory(id).await
    }

    pub async fn list(
        &self,
        filter: &PrimaryStorageFilter,
    ) -> Result<Vec<PrimaryStorageInventory>> {
        let mut inventories = Vec::new();
        for record in self.persistence.records.list().await? {
            if !filter.matches(&record) {
                continue;
            }
            let descriptor = self.registry.descriptor(&record.storage_type)?;
            let capacity = self.persistence.capacity.get(&record.uuid).await?;
            inventories.push(PrimaryStorageInventory::from_record(
                record, descriptor, capacity,
            ));
        }
        Ok(inventories)
    }

    /// Runtime handle of a storage, loading and starting it on first use
    pub async fn load(&self, id: &StorageId) -> Result<PrimaryStorageHandleRef> {
        if let Some(handle) = self.handles.read().await.get(id) {
            return Ok(handle.clone());
        }

        let record = self.record(id).await?;
        let factory = self.registry.resolve(&record.storage_type)?;
        let handle = factory.load_provider(&record).await?;
        handle.start().await?;

        // The record may have been deleted, or another load may have won,
        // while the handle was starting
        let mut handles = self.handles.write().await;
        let existing = handles.get(id).cloned();
        let still_stored = self.persistence.records.get(id).await?.is_some();
        if existing.is_some() || !still_stored {
            drop(handles);
            if let Err(e) = handle.stop().await {
                warn!(storage = %id, error = %e, "Failed to stop redundant handle");
            }
            return existing.ok_or_else(|| Error::not_found("PrimaryStorage", id.as_str()));
        }
        handles.insert(id.clone(), handle.clone());
        Ok(handle)
    }

    pub async fn attach_cluster(
        &self,
        id: &StorageId,
        cluster_uuid: &str,
    ) -> Result<PrimaryStorageInventory> {
        if cluster_uuid.trim().is_empty() {
            return Err(Error::Validation("clusterUuid is required".into()));
        }

        let mut record = self.record(id).await?;
        if !record.attached_cluster_uuids.iter().any(|c| c == cluster_uuid) {
            record.attached_cluster_uuids.push(cluster_uuid.to_string());
            record.last_op_date = Utc::now();
            self.persistence.records.update(record).await?;
            info!(storage = %id, cluster = cluster_uuid, "Attached primary storage to cluster");
        }
        self.get_inventory(id).await
    }

    /// Remove the storage with its capacity and tags, then stop its handle
    pub async fn delete(&self, id: &StorageId) -> Result<()> {
        // Record first: a concurrent load re-checks it before caching a handle
        if self.persistence.records.delete(id).await?.is_none() {
            return Err(Error::not_found("PrimaryStorage", id.as_str()));
        }
        self.persistence.capacity.delete(id).await?;
        self.persistence.tags.delete_tags_of(id).await?;

        let handle = self.handles.write().await.remove(id);
        if let Some(handle) = handle {
            if let Err(e) = handle.stop().await {
                warn!(storage = %id, error = %e, "Failed to stop primary storage handle");
            }
        }

        info!(storage = %id, "Deleted primary storage");
        Ok(())
    }

    // ===== Capacity =====

    /// Fold a backend capacity report into the storages it covers
    pub async fn report_capacity(&self, report: &CapacityReport) -> Result<CapacityUpdateSummary> {
        let factory = self.registry.resolve(&report.storage_type)?;
        let scope = factory.capacity_scope(&report.cluster_name);
        self.updater
            .update(&scope, report.total_bytes, report.available_bytes)
            .await
    }

    /// Sum capacity over the storages selected by `query`
    pub async fn capacity(&self, query: &CapacityQuery) -> Result<CapacityQueryResult> {
        self.sessions.check(query.session_id.as_deref())?;
        query.validate()?;

        let mut result = CapacityQueryResult::default();
        for record in self.persistence.records.list().await? {
            if !query.selects(&record) {
                continue;
            }
            if query.has_tag_filters() {
                let tags = self.persistence.tags.tags_of(&record.uuid).await?;
                if !query.tags_match(&tags) {
                    continue;
                }
            }
            if let Some(capacity) = self.persistence.capacity.get(&record.uuid).await? {
                result.add(&capacity);
            }
        }
        Ok(result)
    }

    /// Run a capacity query in the background and hand the result to `completion`
    pub fn capacity_with_completion<F>(
        self: &Arc<Self>,
        query: CapacityQuery,
        completion: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<CapacityQueryResult>) + Send + 'static,
    {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let result = service.capacity(&query).await;
            completion(result);
        })
    }

    // ===== Backup Storage =====

    /// Backup storages usable by a primary storage; empty if its type has no finder
    pub async fn find_backup_storage(&self, id: &StorageId) -> Result<Vec<String>> {
        let record = self.record(id).await?;
        let descriptor = self.registry.descriptor(&record.storage_type)?;
        match &descriptor.backup_storage_finder {
            Some(finder) => finder.find_backup_storage(id).await,
            None => Ok(Vec::new()),
        }
    }

    // ===== Status =====

    pub async fn status(&self) -> ServiceStatus {
        let storage_count = match self.persistence.records.list().await {
            Ok(records) => records.len() as u64,
            Err(e) => {
                warn!(error = %e, "Failed to count primary storages");
                0
            }
        };

        ServiceStatus {
            healthy: !self.registry.is_empty(),
            storage_types: self
                .registry
                .storage_types()
                .into_iter()
                .map(|t| t.to_string())
                .collect(),
            storage_count,
            running_handles: self.handles.read().await.len() as u64,
        }
    }
}

#[async_trait]
impl CapacityReportSink for PrimaryStorageService {
    async fn apply_report(&self, report: CapacityReport) -> Result<CapacityUpdateSummary> {
        self.report_capacity(&report).await
    }
}

/// Service status summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub healthy: bool,
    pub storage_types: Vec<String>,
    pub storage_count: u64,
    pub running_handles: u64,
}
