//! Extension-Point Dispatcher
//!
//! Routes hypervisor lifecycle callbacks to the provider owning the storage
//! involved. The owner is found through the volume or command context:
//! storage id -> storage record -> storage type -> provider hooks. Hooks are
//! never broadcast to every registered provider.
//!
//! Each tracked category has three phases. The `before` phase may abort the
//! operation. The success and failure phases cannot fail; the failure phase
//! receives the error that made the hypervisor operation fail.

use crate::domain::hooks::{
    AttachIsoCmd, CancelSelfFencerParam, DataVolumeCmd, HostContext, ProviderHooks,
    SelfFencerParam, StartVmCmd, TemplateFromSnapshotParam, VmInstanceInventory, VmInstanceSpec,
    VolumeInventory,
};
use crate::domain::model::{ErrorCode, StorageId, StorageTypeId};
use crate::error::{Error, Result};
use crate::registry::StorageTypeRegistry;
use crate::store::PrimaryStorageStore;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Whether a provider was called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Invoked,
    /// No provider participates for this context
    Skipped,
}

/// Hooks of the provider owning one storage
#[derive(Clone)]
struct Owner {
    storage_type: StorageTypeId,
    hooks: ProviderHooks,
}

pub struct ExtensionPointDispatcher {
    records: Arc<dyn PrimaryStorageStore>,
    /// Resolved once; the registry is frozen
    hooks: HashMap<StorageTypeId, ProviderHooks>,
}

impl ExtensionPointDispatcher {
    pub fn new(registry: &StorageTypeRegistry, records: Arc<dyn PrimaryStorageStore>) -> Self {
        let hooks = registry
            .storage_types()
            .into_iter()
            .filter_map(|storage_type| {
                let factory = registry.resolve(&storage_type).ok()?;
                Some((storage_type, factory.hooks()))
            })
            .collect();
        Self { records, hooks }
    }

    // ===== Routing =====

    async fn owner_of(&self, storage: &StorageId) -> Result<Owner> {
        let record = self
            .records
            .get(storage)
            .await?
            .ok_or_else(|| Error::not_found("PrimaryStorage", storage.as_str()))?;
        let hooks = self
            .hooks
            .get(&record.storage_type)
            .cloned()
            .ok_or_else(|| Error::unknown_type(record.storage_type.as_str()))?;
        Ok(Owner {
            storage_type: record.storage_type,
            hooks,
        })
    }

    async fn volume_owner(&self, volume: &VolumeInventory) -> Result<Option<Owner>> {
        match &volume.primary_storage_uuid {
            Some(storage) => self.owner_of(storage).await.map(Some),
            None => {
                debug!(volume = %volume.uuid, "Volume has no primary storage, skipping hooks");
                Ok(None)
            }
        }
    }

    /// Distinct owners of a VM's volumes, in volume order
    async fn vm_owners(&self, spec: &VmInstanceSpec) -> Result<Vec<Owner>> {
        let mut owners: Vec<Owner> = Vec::new();
        for volume in &spec.volumes {
            if let Some(owner) = self.volume_owner(volume).await? {
                if !owners.iter().any(|o| o.storage_type == owner.storage_type) {
                    owners.push(owner);
                }
            }
        }
        Ok(owners)
    }

    /// Owner lookup for phases that cannot fail
    async fn volume_owner_quiet(&self, volume: &VolumeInventory) -> Option<Owner> {
        match self.volume_owner(volume).await {
            Ok(owner) => owner,
            Err(e) => {
                warn!(volume = %volume.uuid, error = %e, "Cannot route volume hook");
                None
            }
        }
    }

    // ===== VM Start =====

    pub async fn before_start_vm(
        &self,
        host: &HostContext,
        spec: &VmInstanceSpec,
        cmd: &mut StartVmCmd,
    ) -> Result<()> {
        for owner in self.vm_owners(spec).await? {
            debug!(
                vm = %spec.vm.uuid,
                storage_type = %owner.storage_type,
                "Dispatching before_start_vm"
            );
            owner.hooks.vm.before_start_vm(host, spec, cmd).await?;
        }
        Ok(())
    }

    pub async fn start_vm_succeeded(&self, host: &HostContext, spec: &VmInstanceSpec) {
        match self.vm_owners(spec).await {
            Ok(owners) => {
                for owner in owners {
                    owner.hooks.vm.start_vm_succeeded(host, spec).await;
                }
            }
            Err(e) => warn!(vm = %spec.vm.uuid, error = %e, "Cannot route start_vm_succeeded"),
        }
    }

    pub async fn start_vm_failed(
        &self,
        host: &HostContext,
        spec: &VmInstanceSpec,
        err: &ErrorCode,
    ) {
        match self.vm_owners(spec).await {
            Ok(owners) => {
                for owner in owners {
                    owner.hooks.vm.start_vm_failed(host, spec, err).await;
                }
            }
            Err(e) => warn!(vm = %spec.vm.uuid, error = %e, "Cannot route start_vm_failed"),
        }
    }

    /// Drive all three phases around the hypervisor start call.
    ///
    /// A `before` error aborts without calling the hypervisor. A hypervisor
    /// error is passed to the failure hooks and returned unchanged.
    pub async fn run_start_vm<F, Fut, T>(
        &self,
        host: &HostContext,
        spec: &VmInstanceSpec,
        mut cmd: StartVmCmd,
        hypervisor: F,
    ) -> Result<T>
    where
        F: FnOnce(StartVmCmd) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.before_start_vm(host, spec, &mut cmd).await?;
        match hypervisor(cmd).await {
            Ok(value) => {
                self.start_vm_succeeded(host, spec).await;
                Ok(value)
            }
            Err(e) => {
                self.start_vm_failed(host, spec, &e.to_error_code()).await;
                Err(e)
            }
        }
    }

    // ===== Volume Attach =====

    pub async fn before_attach_volume(
        &self,
        host: &HostContext,
        vm: &VmInstanceInventory,
        volume: &VolumeInventory,
        cmd: &mut DataVolumeCmd,
    ) -> Result<DispatchOutcome> {
        let Some(owner) = self.volume_owner(volume).await? else {
            return Ok(DispatchOutcome::Skipped);
        };
        owner.hooks.volume.before_attach_volume(host, vm, volume, cmd).await?;
        Ok(DispatchOutcome::Invoked)
    }

    pub async fn after_attach_volume(
        &self,
        host: &HostContext,
        vm: &VmInstanceInventory,
        volume: &VolumeInventory,
    ) {
        if let Some(owner) = self.volume_owner_quiet(volume).await {
            owner.hooks.volume.after_attach_volume(host, vm, volume).await;
        }
    }

    pub async fn attach_volume_failed(
        &self,
        host: &HostContext,
        vm: &VmInstanceInventory,
        volume: &VolumeInventory,
        err: &ErrorCode,
    ) {
        if let Some(owner) = self.volume_owner_quiet(volume).await {
            owner.hooks.volume.attach_volume_failed(host, vm, volume, err).await;
        }
    }

    pub async fn run_attach_volume<F, Fut, T>(
        &self,
        host: &HostContext,
        vm: &VmInstanceInventory,
        volume: &VolumeInventory,
        mut cmd: DataVolumeCmd,
        hypervisor: F,
    ) -> Result<T>
    where
        F: FnOnce(DataVolumeCmd) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.before_attach_volume(host, vm, volume, &mut cmd).await?;
        match hypervisor(cmd).await {
            Ok(value) => {
                self.after_attach_volume(host, vm, volume).await;
                Ok(value)
            }
            Err(e) => {
                self.attach_volume_failed(host, vm, volume, &e.to_error_code())
                    .await;
                Err(e)
            }
        }
    }

    // ===== Volume Detach =====

    pub async fn before_detach_volume(
        &self,
        host: &HostContext,
        vm: &VmInstanceInventory,
        volume: &VolumeInventory,
        cmd: &mut DataVolumeCmd,
    ) -> Result<DispatchOutcome> {
        let Some(owner) = self.volume_owner(volume).await? else {
            return Ok(DispatchOutcome::Skipped);
        };
        owner.hooks.volume.before_detach_volume(host, vm, volume, cmd).await?;
        Ok(DispatchOutcome::Invoked)
    }

    pub async fn after_detach_volume(
        &self,
        host: &HostContext,
        vm: &VmInstanceInventory,
        volume: &VolumeInventory,
    ) {
        if let Some(owner) = self.volume_owner_quiet(volume).await {
            owner.hooks.volume.after_detach_volume(host, vm, volume).await;
        }
    }

    pub async fn detach_volume_failed(
        &self,
        host: &HostContext,
        vm: &VmInstanceInventory,
        volume: &VolumeInventory,
        err: &ErrorCode,
    ) {
        if let Some(owner) = self.volume_owner_quiet(volume).await {
            owner.hooks.volume.detach_volume_failed(host, vm, volume, err).await;
        }
    }

    pub async fn run_detach_volume<F, Fut, T>(
        &self,
        host: &HostContext,
        vm: &VmInstanceInventory,
        volume: &VolumeInventory,
        mut cmd: DataVolumeCmd,
        hypervisor: F,
    ) -> Result<T>
    where
        F: FnOnce(DataVolumeCmd) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.before_detach_volume(host, vm, volume, &mut cmd).await?;
        match hypervisor(cmd).await {
            Ok(value) => {
                self.after_detach_volume(host, vm, volume).await;
                Ok(value)
            }
            Err(e) => {
                self.detach_volume_failed(host, vm, volume, &e.to_error_code())
                    .await;
                Err(e)
            }
        }
    }

    // ===== ISO =====

    /// Only called when the ISO is cached on a primary storage
    pub async fn pre_attach_iso(
        &self,
        host: &HostContext,
        cmd: &mut AttachIsoCmd,
    ) -> Result<DispatchOutcome> {
        let Some(storage) = cmd.primary_storage_uuid.clone() else {
            return Ok(DispatchOutcome::Skipped);
        };
        let owner = self.owner_of(&storage).await?;
        owner.hooks.iso.pre_attach_iso(host, cmd).await?;
        Ok(DispatchOutcome::Invoked)
    }

    // ===== Self Fencer =====

    /// Owner of `storage` if it fences for its own storage type
    async fn fencing_owner(&self, storage: &StorageId) -> Result<Option<Owner>> {
        let owner = self.owner_of(storage).await?;
        match owner.hooks.self_fencer.self_fencer_storage_type() {
            Some(fenced) if fenced == owner.storage_type => Ok(Some(owner)),
            Some(fenced) => {
                warn!(
                    storage = %storage,
                    storage_type = %owner.storage_type,
                    fencer_type = %fenced,
                    "Self fencer type does not match storage type, skipping"
                );
                Ok(None)
            }
            None => {
                debug!(
                    storage = %storage,
                    storage_type = %owner.storage_type,
                    "Provider does not self-fence"
                );
                Ok(None)
            }
        }
    }

    pub async fn setup_self_fencer(&self, param: &SelfFencerParam) -> Result<DispatchOutcome> {
        let Some(owner) = self.fencing_owner(&param.primary_storage_uuid).await? else {
            return Ok(DispatchOutcome::Skipped);
        };
        owner.hooks.self_fencer.setup_self_fencer(param).await?;
        Ok(DispatchOutcome::Invoked)
    }

    pub async fn cancel_self_fencer(
        &self,
        param: &CancelSelfFencerParam,
    ) -> Result<DispatchOutcome> {
        let Some(owner) = self.fencing_owner(&param.primary_storage_uuid).await? else {
            return Ok(DispatchOutcome::Skipped);
        };
        owner.hooks.self_fencer.cancel_self_fencer(param).await?;
        Ok(DispatchOutcome::Invoked)
    }

    // ===== Template From Snapshot =====

    async fn template_owner(&self, storage: &StorageId) -> Result<Option<Owner>> {
        let owner = self.owner_of(storage).await?;
        Ok(match owner.hooks.template.template_storage_type() {
            Some(t) if t == owner.storage_type => Some(owner),
            _ => None,
        })
    }

    pub async fn before_create_template(
        &self,
        param: &TemplateFromSnapshotParam,
    ) -> Result<DispatchOutcome> {
        let Some(owner) = self.template_owner(&param.primary_storage_uuid).await? else {
            return Ok(DispatchOutcome::Skipped);
        };
        owner.hooks.template.before_create_template(param).await?;
        Ok(DispatchOutcome::Invoked)
    }

    pub async fn template_created(&self, param: &TemplateFromSnapshotParam) {
        match self.template_owner(&param.primary_storage_uuid).await {
            Ok(Some(owner)) => owner.hooks.template.template_created(param).await,
            Ok(None) => {}
            Err(e) => warn!(
                snapshot = %param.snapshot_uuid,
                error = %e,
                "Cannot route template_created"
            ),
        }
    }

    pub async fn template_creation_failed(
        &self,
        param: &TemplateFromSnapshotParam,
        err: &ErrorCode,
    ) {
        match self.template_owner(&param.primary_storage_uuid).await {
            Ok(Some(owner)) => owner.hooks.template.template_creation_failed(param, err).await,
            Ok(None) => {}
            Err(e) => {
                warn!(
                    snapshot = %param.snapshot_uuid,
                    error = %e,
                    "Cannot route template_creation_failed"
                )
            }
        }
    }

    pub async fn run_create_template<F, Fut, T>(
        &self,
        param: &TemplateFromSnapshotParam,
        create: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.before_create_template(param).await?;
        match create().await {
            Ok(value) => {
                self.template_created(param).await;
                Ok(value)
            }
            Err(e) => {
                self.template_creation_failed(param, &e.to_error_code()).await;
                Err(e)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
