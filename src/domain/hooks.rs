//! Extension-point capability interfaces
//!
//! A provider exposes the lifecycle hooks it cares about through a
//! [`ProviderHooks`] bundle. Every capability defaults to [`NoopHooks`], so a
//! provider only implements the sets it needs. An all-no-op bundle is a valid
//! provider configuration.

use crate::domain::model::{ErrorCode, StorageId, StorageTypeId};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Hook Contexts
// =============================================================================

/// Hypervisor host on which the operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostContext {
    pub uuid: String,
    pub name: String,
    pub management_ip: String,
    pub cluster_uuid: String,
}

/// Volume role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeType {
    Root,
    Data,
}

/// Volume referenced by an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInventory {
    pub uuid: String,
    pub name: String,
    /// Owning primary storage; absent for volumes not yet instantiated
    pub primary_storage_uuid: Option<StorageId>,
    pub vm_instance_uuid: Option<String>,
    pub install_path: String,
    pub volume_type: VolumeType,
    pub size: u64,
}

/// VM referenced by an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmInstanceInventory {
    pub uuid: String,
    pub name: String,
    pub root_volume_uuid: String,
}

/// Everything known about a VM being started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmInstanceSpec {
    pub vm: VmInstanceInventory,
    pub volumes: Vec<VolumeInventory>,
}

/// Volume as described to the hypervisor agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeTo {
    pub volume_uuid: String,
    pub install_path: String,
    pub device_type: String,
}

impl From<&VolumeInventory> for VolumeTo {
    fn from(volume: &VolumeInventory) -> Self {
        Self {
            volume_uuid: volume.uuid.clone(),
            install_path: volume.install_path.clone(),
            device_type: "file".to_string(),
        }
    }
}

/// Agent command for starting a VM. Hooks may rewrite volumes or add addons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartVmCmd {
    pub vm_instance_uuid: String,
    pub volumes: Vec<VolumeTo>,
    pub addons: BTreeMap<String, serde_json::Value>,
}

/// Agent command for attaching or detaching a data volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeCmd {
    pub vm_instance_uuid: String,
    pub volume: VolumeTo,
    pub addons: BTreeMap<String, serde_json::Value>,
}

/// Agent command for attaching an ISO
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachIsoCmd {
    pub vm_instance_uuid: String,
    pub image_uuid: String,
    pub path: String,
    /// Primary storage holding the cached ISO, when cached
    pub primary_storage_uuid: Option<StorageId>,
    pub addons: BTreeMap<String, serde_json::Value>,
}

/// Host self-fencer setup parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfFencerParam {
    pub host_uuid: String,
    pub primary_storage_uuid: StorageId,
    pub interval_secs: u64,
    pub max_attempts: u32,
    pub storage_check_timeout_secs: u64,
}

/// Host self-fencer cancel parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSelfFencerParam {
    pub host_uuid: String,
    pub primary_storage_uuid: StorageId,
}

/// Template-from-snapshot parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateFromSnapshotParam {
    pub snapshot_uuid: String,
    pub volume_uuid: String,
    pub primary_storage_uuid: StorageId,
    pub image_uuid: String,
    pub backup_storage_uuids: Vec<String>,
}

// =============================================================================
// Capability Interfaces
// =============================================================================

/// VM start hooks
#[async_trait]
pub trait VmLifecycleHooks: Send + Sync {
    /// Returning an error aborts the start
    async fn before_start_vm(
        &self,
        _host: &HostContext,
        _spec: &VmInstanceSpec,
        _cmd: &mut StartVmCmd,
    ) -> Result<()> {
        Ok(())
    }

    async fn start_vm_succeeded(&self, _host: &HostContext, _spec: &VmInstanceSpec) {}

    async fn start_vm_failed(
        &self,
        _host: &HostContext,
        _spec: &VmInstanceSpec,
        _err: &ErrorCode,
    ) {}
}

/// Data volume attach/detach hooks
#[async_trait]
pub trait VolumeLifecycleHooks: Send + Sync {
    async fn before_attach_volume(
        &self,
        _host: &HostContext,
        _vm: &VmInstanceInventory,
        _volume: &VolumeInventory,
        _cmd: &mut DataVolumeCmd,
    ) -> Result<()> {
        Ok(())
    }

    async fn after_attach_volume(
        &self,
        _host: &HostContext,
        _vm: &VmInstanceInventory,
        _volume: &VolumeInventory,
    ) {
    }

    async fn attach_volume_failed(
        &self,
        _host: &HostContext,
        _vm: &VmInstanceInventory,
        _volume: &VolumeInventory,
        _err: &ErrorCode,
    ) {
    }

    async fn before_detach_volume(
        &self,
        _host: &HostContext,
        _vm: &VmInstanceInventory,
        _volume: &VolumeInventory,
        _cmd: &mut DataVolumeCmd,
    ) -> Result<()> {
        Ok(())
    }

    async fn after_detach_volume(
        &self,
        _host: &HostContext,
        _vm: &VmInstanceInventory,
        _volume: &VolumeInventory,
    ) {
    }

    async fn detach_volume_failed(
        &self,
        _host: &HostContext,
        _vm: &VmInstanceInventory,
        _volume: &VolumeInventory,
        _err: &ErrorCode,
    ) {
    }
}

/// ISO pre-attach hook
#[async_trait]
pub trait IsoAttachHooks: Send + Sync {
    async fn pre_attach_iso(&self, _host: &HostContext, _cmd: &mut AttachIsoCmd) -> Result<()> {
        Ok(())
    }
}

/// Host self-fencing
#[async_trait]
pub trait SelfFencerHooks: Send + Sync {
    /// Storage type this provider fences for; `None` opts out of self-fencing
    fn self_fencer_storage_type(&self) -> Option<StorageTypeId> {
        None
    }

    async fn setup_self_fencer(&self, _param: &SelfFencerParam) -> Result<()> {
        Ok(())
    }

    async fn cancel_self_fencer(&self, _param: &CancelSelfFencerParam) -> Result<()> {
        Ok(())
    }
}

/// Snapshot to template conversion
#[async_trait]
pub trait TemplateFromSnapshotHooks: Send + Sync {
    /// Storage type handled; `None` opts out
    fn template_storage_type(&self) -> Option<StorageTypeId> {
        None
    }

    async fn before_create_template(&self, _param: &TemplateFromSnapshotParam) -> Result<()> {
        Ok(())
    }

    async fn template_created(&self, _param: &TemplateFromSnapshotParam) {}

    async fn template_creation_failed(
        &self,
        _param: &TemplateFromSnapshotParam,
        _err: &ErrorCode,
    ) {}
}

/// Hook set that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl VmLifecycleHooks for NoopHooks {}
impl VolumeLifecycleHooks for NoopHooks {}
impl IsoAttachHooks for NoopHooks {}
impl SelfFencerHooks for NoopHooks {}
impl TemplateFromSnapshotHooks for NoopHooks {}

// =============================================================================
// Provider Hook Bundle
// =============================================================================

/// The capability sets one provider supplies
#[derive(Clone)]
pub struct ProviderHooks {
    pub vm: Arc<dyn VmLifecycleHooks>,
    pub volume: Arc<dyn VolumeLifecycleHooks>,
    pub iso: Arc<dyn IsoAttachHooks>,
    pub self_fencer: Arc<dyn SelfFencerHooks>,
    pub template: Arc<dyn TemplateFromSnapshotHooks>,
}

impl ProviderHooks {
    pub fn with_vm(mut self, hooks: Arc<dyn VmLifecycleHooks>) -> Self {
        self.vm = hooks;
        self
    }

    pub fn with_volume(mut self, hooks: Arc<dyn VolumeLifecycleHooks>) -> Self {
        self.volume = hooks;
        self
    }

    pub fn with_iso(mut self, hooks: Arc<dyn IsoAttachHooks>) -> Self {
        self.iso = hooks;
        self
    }

    pub fn with_self_fencer(mut self, hooks: Arc<dyn SelfFencerHooks>) -> Self {
        self.self_fencer = hooks;
        self
    }

    pub fn with_template(mut self, hooks: Arc<dyn TemplateFromSnapshotHooks>) -> Self {
        self.template = hooks;
        self
    }
}

impl Default for ProviderHooks {
    fn default() -> Self {
        let noop = Arc::new(NoopHooks);
        Self {
            vm: noop.clone(),
            volume: noop.clone(),
            iso: noop.clone(),
            self_fencer: noop.clone(),
            template: noop,
        }
    }
}

impl std::fmt::Debug for ProviderHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHooks")
            .field("self_fencer_type", &self.self_fencer.self_fencer_storage_type())
            .field("template_type", &self.template.template_storage_type())
            .finish()
    }
}
