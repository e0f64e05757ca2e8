//! Storage Type Registry
//!
//! Append-only registry built once during process initialization, then
//! frozen into an immutable map shared by every orchestration task. Lookups
//! after [`StorageTypeRegistryBuilder::build`] take no locks.

use crate::domain::model::StorageTypeId;
use crate::domain::ports::{BackupStorageFinderRef, PrimaryStorageFactoryRef};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

// =============================================================================
// Storage Type Descriptor
// =============================================================================

/// Identity and capability flags of one primary storage type
#[derive(Clone)]
pub struct StorageTypeDescriptor {
    pub id: StorageTypeId,
    /// Hosts can keep a heartbeat file on this storage
    pub supports_heartbeat_file: bool,
    /// Hosts can ping a storage gateway to check connectivity
    pub supports_gateway_ping: bool,
    /// Resolves backup storages reachable from a primary storage
    pub backup_storage_finder: Option<BackupStorageFinderRef>,
}

impl StorageTypeDescriptor {
    pub fn new(id: impl Into<StorageTypeId>) -> Self {
        Self {
            id: id.into(),
            supports_heartbeat_file: false,
            supports_gateway_ping: false,
            backup_storage_finder: None,
        }
    }

    pub fn with_heartbeat_file(mut self, supported: bool) -> Self {
        self.supports_heartbeat_file = supported;
        self
    }

    pub fn with_gateway_ping(mut self, supported: bool) -> Self {
        self.supports_gateway_ping = supported;
        self
    }

    pub fn with_backup_storage_finder(mut self, finder: BackupStorageFinderRef) -> Self {
        self.backup_storage_finder = Some(finder);
        self
    }
}

impl std::fmt::Debug for StorageTypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageTypeDescriptor")
            .field("id", &self.id)
            .field("supports_heartbeat_file", &self.supports_heartbeat_file)
            .field("supports_gateway_ping", &self.supports_gateway_ping)
            .field("backup_storage_finder", &self.backup_storage_finder.is_some())
            .finish()
    }
}

// =============================================================================
// Registered Type
// =============================================================================

/// A storage type together with its factory
#[derive(Clone)]
pub struct RegisteredType {
    pub descriptor: StorageTypeDescriptor,
    pub factory: PrimaryStorageFactoryRef,
}

// =============================================================================
// Builder
// =============================================================================

/// Collects storage types during startup
#[derive(Default)]
pub struct StorageTypeRegistryBuilder {
    types: BTreeMap<StorageTypeId, RegisteredType>,
}

impl StorageTypeRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under the type named by its descriptor.
    ///
    /// A type can be registered once; a second registration is a startup
    /// configuration error.
    pub fn register(&mut self, factory: PrimaryStorageFactoryRef) -> Result<&mut Self> {
        let descriptor = factory.descriptor();
        if descriptor.id.as_str().trim().is_empty() {
            return Err(Error::Configuration(
                "primary storage type identifier must not be empty".into(),
            ));
        }
        if self.types.contains_key(&descriptor.id) {
            return Err(Error::DuplicateStorageType {
                storage_type: descriptor.id.to_string(),
            });
        }

        info!(
            storage_type = %descriptor.id,
            heartbeat_file = descriptor.supports_heartbeat_file,
            gateway_ping = descriptor.supports_gateway_ping,
            "Registered primary storage type"
        );

        self.types
            .insert(descriptor.id.clone(), RegisteredType { descriptor, factory });
        Ok(self)
    }

    /// Freeze into an immutable registry
    pub fn build(self) -> Arc<StorageTypeRegistry> {
        Arc::new(StorageTypeRegistry {
            types: self.types.into_iter().collect(),
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Immutable storage type -> factory map
pub struct StorageTypeRegistry {
    types: HashMap<StorageTypeId, RegisteredType>,
}

impl StorageTypeRegistry {
    pub fn builder() -> StorageTypeRegistryBuilder {
        StorageTypeRegistryBuilder::new()
    }

    /// Factory registered for `storage_type`
    pub fn resolve(&self, storage_type: &StorageTypeId) -> Result<PrimaryStorageFactoryRef> {
        self.get(storage_type).map(|entry| entry.factory.clone())
    }

    /// Descriptor registered for `storage_type`
    pub fn descriptor(&self, storage_type: &StorageTypeId) -> Result<&StorageTypeDescriptor> {
        self.get(storage_type).map(|entry| &entry.descriptor)
    }

    pub fn get(&self, storage_type: &StorageTypeId) -> Result<&RegisteredType> {
        self.types
            .get(storage_type)
            .ok_or_else(|| Error::unknown_type(storage_type.as_str()))
    }

    pub fn contains(&self, storage_type: &StorageTypeId) -> bool {
        self.types.contains_key(storage_type)
    }

    /// All registered type identifiers, sorted
    pub fn storage_types(&self) -> Vec<StorageTypeId> {
        let mut ids: Vec<_> = self.types.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl std::fmt::Debug for StorageTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageTypeRegistry")
            .field("types", &self.storage_types())
            .finish()
    }
}
