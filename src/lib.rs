//! Primary Storage Framework
//!
//! Pluggable primary storage providers for a cloud control plane. Each
//! provider registers a storage type with the framework, supplies a factory
//! for its instances, and subscribes to the lifecycle hooks of the VMs and
//! volumes that live on its storage.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         REST API (axum)                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                    PrimaryStorageService                             │
//! │  ┌────────────────┐  ┌──────────────────┐  ┌─────────────────────┐   │
//! │  │ Type Registry  │  │ Capacity Updater │  │ Extension-Point     │   │
//! │  │ (descriptors,  │  │ (scope, merge,   │  │ Dispatcher          │   │
//! │  │  factories)    │  │  CAS + backoff)  │  │ (hook routing)      │   │
//! │  └───────┬────────┘  └────────┬─────────┘  └──────────┬──────────┘   │
//! │          │                    │                       │              │
//! ├──────────┴────────────────────┴───────────────────────┴──────────────┤
//! │   Providers: ClusterBlock, SharedMountPoint   │   Persistence ports   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`registry`]: storage type registry
//! - [`capacity`]: capacity scopes, merge rule, updater and report intake
//! - [`dispatch`]: routes hypervisor lifecycle events to the owning provider
//! - [`controlplane`]: service facade, built-in providers and the REST API
//! - [`store`]: persistence ports and the in-memory store
//! - [`domain`]: records, hook interfaces and provider ports
//! - [`config`]: YAML configuration
//! - [`metrics`]: Prometheus counters for capacity events
//! - [`error`]: error types

pub mod capacity;
pub mod config;
pub mod controlplane;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod store;

// Re-export commonly used types
pub use capacity::{
    CapacityEvent, CapacityIntake, CapacityReport, CapacityReportSender, CapacityScope,
    CapacityUpdateSummary, CapacityUpdater, CapacityUpdaterConfig,
};

pub use config::FrameworkConfig;

pub use controlplane::{
    ApiServer, ApiServerConfig, CapacityQuery, CapacityQueryResult, ClusterBlockFactory,
    PrimaryStorageFilter, PrimaryStorageService, ProviderFactory, ProvidersConfig,
    SessionPolicy, SharedMountFactory, CLUSTER_BLOCK_TYPE, SHARED_MOUNT_TYPE,
};

pub use dispatch::{DispatchOutcome, ExtensionPointDispatcher};

pub use domain::model::{
    CapacityRecord, CreatePrimaryStorageRequest, ErrorCode, PoolAssignment, PoolKind,
    PrimaryStorageInventory, PrimaryStorageRecord, StorageId, StorageTypeId,
};

pub use domain::ports::{
    PrimaryStorageFactory, PrimaryStorageFactoryRef, PrimaryStorageHandle,
    PrimaryStorageHandleRef,
};

pub use error::{Error, Result};

pub use metrics::CapacityMetrics;

pub use registry::{StorageTypeDescriptor, StorageTypeRegistry, StorageTypeRegistryBuilder};

pub use store::{MemoryStore, Persistence};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
