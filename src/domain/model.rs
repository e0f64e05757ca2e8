//! Domain Model - Records and value types shared by every component
//!
//! Storage records, capacity records, pool assignments, tags and the
//! serialized inventory handed back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a primary storage type (e.g. `ClusterBlock`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageTypeId(pub String);

impl StorageTypeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StorageTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StorageTypeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StorageTypeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a primary storage instance
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(pub String);

impl StorageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier (UUID v4, 32 lowercase hex digits)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StorageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StorageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StorageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&String> for StorageId {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

// =============================================================================
// Pools
// =============================================================================

/// The three pools a pool-based primary storage carves out of its backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PoolKind {
    RootVolume,
    DataVolume,
    ImageCache,
}

impl PoolKind {
    /// Predefined pool tags are created in this order: cache, root, data
    pub const ALL: [PoolKind; 3] = [
        PoolKind::ImageCache,
        PoolKind::RootVolume,
        PoolKind::DataVolume,
    ];

    /// Prefix used when the pool name is derived from the storage id
    pub fn prefix(&self) -> &'static str {
        match self {
            PoolKind::RootVolume => "pri-v-r-",
            PoolKind::DataVolume => "pri-v-d-",
            PoolKind::ImageCache => "pri-c-",
        }
    }

    /// Inherent tag marking an operator-supplied pool name
    pub fn predefined_tag(&self) -> &'static str {
        match self {
            PoolKind::RootVolume => "predefinedRootVolumePool",
            PoolKind::DataVolume => "predefinedDataVolumePool",
            PoolKind::ImageCache => "predefinedImageCachePool",
        }
    }

    /// Deterministic pool name for a storage id
    pub fn derive_name(&self, id: &StorageId) -> String {
        format!("{}{}", self.prefix(), id)
    }
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolKind::RootVolume => write!(f, "root-volume"),
            PoolKind::DataVolume => write!(f, "data-volume"),
            PoolKind::ImageCache => write!(f, "image-cache"),
        }
    }
}

/// Pool names assigned to a storage instance. Immutable once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolAssignment {
    pub root_volume_pool: String,
    pub data_volume_pool: String,
    pub image_cache_pool: String,
}

impl PoolAssignment {
    pub fn get(&self, kind: PoolKind) -> &str {
        match kind {
            PoolKind::RootVolume => &self.root_volume_pool,
            PoolKind::DataVolume => &self.data_volume_pool,
            PoolKind::ImageCache => &self.image_cache_pool,
        }
    }
}

/// Operator-supplied pool names on a creation request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolOverrides {
    #[serde(default)]
    pub root_volume_pool: Option<String>,
    #[serde(default)]
    pub data_volume_pool: Option<String>,
    #[serde(default)]
    pub image_cache_pool: Option<String>,
}

impl PoolOverrides {
    pub fn get(&self, kind: PoolKind) -> Option<&str> {
        match kind {
            PoolKind::RootVolume => self.root_volume_pool.as_deref(),
            PoolKind::DataVolume => self.data_volume_pool.as_deref(),
            PoolKind::ImageCache => self.image_cache_pool.as_deref(),
        }
    }
}

// =============================================================================
// Primary Storage Record
// =============================================================================

/// Administrative state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageState {
    Enabled,
    Disabled,
}

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Persisted primary storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryStorageRecord {
    pub uuid: StorageId,
    pub name: String,
    pub description: Option<String>,
    pub zone_uuid: String,
    pub storage_type: StorageTypeId,
    pub url: String,
    pub mount_path: String,
    pub state: StorageState,
    pub status: StorageStatus,
    /// Provider grouping key used to scope capacity reports
    pub cluster_name: Option<String>,
    pub pools: Option<PoolAssignment>,
    pub attached_cluster_uuids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_op_date: DateTime<Utc>,
}

impl PrimaryStorageRecord {
    /// Base record built from a creation request, before the provider fills
    /// in its own fields
    pub fn from_request(uuid: StorageId, request: &CreatePrimaryStorageRequest) -> Self {
        let now = Utc::now();
        Self {
            uuid,
            name: request.name.clone(),
            description: request.description.clone(),
            zone_uuid: request.zone_uuid.clone(),
            storage_type: request.storage_type.clone(),
            url: request.url.clone(),
            mount_path: String::new(),
            state: StorageState::Enabled,
            status: StorageStatus::Connecting,
            cluster_name: request.cluster_name.clone(),
            pools: None,
            attached_cluster_uuids: Vec::new(),
            created_at: now,
            last_op_date: now,
        }
    }
}

// =============================================================================
// Capacity
// =============================================================================

/// Capacity accounting of one primary storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityRecord {
    pub total_capacity: u64,
    pub available_capacity: u64,
    pub total_physical_capacity: u64,
    pub available_physical_capacity: u64,
    /// Row version, bumped on every write
    pub version: u64,
}

impl CapacityRecord {
    /// Zeroed record created alongside a new storage
    pub fn empty() -> Self {
        Self {
            total_capacity: 0,
            available_capacity: 0,
            total_physical_capacity: 0,
            available_physical_capacity: 0,
            version: 0,
        }
    }

    /// Logical accounting has never been initialized from a report
    pub fn is_uninitialized(&self) -> bool {
        self.total_capacity == 0 && self.available_capacity == 0
    }

    /// Compare capacity values, ignoring the row version
    pub fn same_values(&self, other: &CapacityRecord) -> bool {
        self.total_capacity == other.total_capacity
            && self.available_capacity == other.available_capacity
            && self.total_physical_capacity == other.total_physical_capacity
            && self.available_physical_capacity == other.available_physical_capacity
    }
}

impl Default for CapacityRecord {
    fn default() -> Self {
        Self::empty()
    }
}

// =============================================================================
// Tags
// =============================================================================

/// A system tag attached to a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemTag {
    pub resource_uuid: StorageId,
    pub tag: String,
    /// Created by the system alongside the resource, not by a user
    pub inherent: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Backup Storage
// =============================================================================

/// Backup storage known to the directory, used for primary -> backup lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStorageRef {
    pub uuid: String,
    pub name: String,
    pub cluster_name: Option<String>,
}

// =============================================================================
// Requests / Responses
// =============================================================================

/// Request to add a primary storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrimaryStorageRequest {
    /// Caller-chosen identifier; generated when absent
    #[serde(default)]
    pub resource_uuid: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub zone_uuid: String,
    #[serde(rename = "type")]
    pub storage_type: StorageTypeId,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub pools: PoolOverrides,
}

impl CreatePrimaryStorageRequest {
    pub fn new(
        name: impl Into<String>,
        zone_uuid: impl Into<String>,
        storage_type: impl Into<StorageTypeId>,
    ) -> Self {
        Self {
            resource_uuid: None,
            name: name.into(),
            description: None,
            zone_uuid: zone_uuid.into(),
            storage_type: storage_type.into(),
            url: String::new(),
            cluster_name: None,
            pools: PoolOverrides::default(),
        }
    }

    pub fn with_resource_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.resource_uuid = Some(uuid.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_cluster_name(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = Some(cluster_name.into());
        self
    }

    pub fn with_pool(mut self, kind: PoolKind, name: impl Into<String>) -> Self {
        let name = Some(name.into());
        match kind {
            PoolKind::RootVolume => self.pools.root_volume_pool = name,
            PoolKind::DataVolume => self.pools.data_volume_pool = name,
            PoolKind::ImageCache => self.pools.image_cache_pool = name,
        }
        self
    }
}

/// External representation of a primary storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryStorageInventory {
    pub uuid: StorageId,
    pub name: String,
    pub description: Option<String>,
    pub zone_uuid: String,
    #[serde(rename = "type")]
    pub storage_type: StorageTypeId,
    pub url: String,
    pub mount_path: String,
    pub state: StorageState,
    pub status: StorageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pools: Option<PoolAssignment>,
    pub supports_heartbeat_file: bool,
    pub supports_gateway_ping: bool,
    pub total_capacity: u64,
    pub available_capacity: u64,
    pub total_physical_capacity: u64,
    pub available_physical_capacity: u64,
    pub attached_cluster_uuids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_op_date: DateTime<Utc>,
}

impl PrimaryStorageInventory {
    pub fn from_record(
        record: PrimaryStorageRecord,
        descriptor: &crate::registry::StorageTypeDescriptor,
        capacity: Option<CapacityRecord>,
    ) -> Self {
        let capacity = capacity.unwrap_or_default();
        Self {
            uuid: record.uuid,
            name: record.name,
            description: record.description,
            zone_uuid: record.zone_uuid,
            storage_type: record.storage_type,
            url: record.url,
            mount_path: record.mount_path,
            state: record.state,
            status: record.status,
            cluster_name: record.cluster_name,
            pools: record.pools,
            supports_heartbeat_file: descriptor.supports_heartbeat_file,
            supports_gateway_ping: descriptor.supports_gateway_ping,
            total_capacity: capacity.total_capacity,
            available_capacity: capacity.available_capacity,
            total_physical_capacity: capacity.total_physical_capacity,
            available_physical_capacity: capacity.available_physical_capacity,
            attached_cluster_uuids: record.attached_cluster_uuids,
            created_at: record.created_at,
            last_op_date: record.last_op_date,
        }
    }
}

/// Serialized error handed to failure hooks and API clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode {
    pub code: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorCode {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            details: None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(
                f,
                "error[code: {}, description: {}, details: {}]",
                self.code,
                self.description,
                details,
            ),
            None => write!(f, "error[code: {}, description: {}]", self.code, self.description),
        }
    }
}
