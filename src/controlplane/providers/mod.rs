//! Built-in Primary Storage Providers
//!
//! - Cluster block: pool-based block storage scoped by backend cluster
//! - Shared mount point: file storage mounted on every host, self-fencing

pub mod cluster_block;
pub mod shared_mount;

pub use cluster_block::*;
pub use shared_mount::*;

use crate::error::Result;
use crate::registry::StorageTypeRegistryBuilder;
use crate::store::Persistence;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Combined provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProvidersConfig {
    pub cluster_block: ClusterBlockConfig,
    pub shared_mount: SharedMountConfig,
}

/// Registers the built-in providers
pub struct ProviderFactory;

impl ProviderFactory {
    /// Register every enabled built-in provider with `builder`
    pub fn register_builtin(
        builder: &mut StorageTypeRegistryBuilder,
        config: &ProvidersConfig,
        persistence: &Persistence,
    ) -> Result<()> {
        if config.cluster_block.enabled {
            builder.register(Arc::new(ClusterBlockFactory::new(
                config.cluster_block.clone(),
                persistence.clone(),
            )))?;
        }
        if config.shared_mount.enabled {
            builder.register(Arc::new(SharedMountFactory::new(
                config.shared_mount.clone(),
                persistence.clone(),
            )))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;

    #[test]
    fn test_register_builtin() {
        let mut builder = StorageTypeRegistryBuilder::new();
        ProviderFactory::register_builtin(
            &mut builder,
            &ProvidersConfig::default(),
            &Persistence::in_memory(),
        )
        .unwrap();
        let registry = builder.build();

        assert!(registry.contains(&CLUSTER_BLOCK_TYPE.into()));
        assert!(registry.contains(&SHARED_MOUNT_TYPE.into()));
    }

    #[test]
    fn test_disabled_provider_not_registered() {
        let config = ProvidersConfig {
            shared_mount: SharedMountConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut builder = StorageTypeRegistryBuilder::new();
        let persistence = Persistence::in_memory();
        ProviderFactory::register_builtin(&mut builder, &config, &persistence).unwrap();
        assert_eq!(builder.build().len(), 1);
    }

    #[test]
    fn test_same_type_name_twice_fails() {
        let config = ProvidersConfig {
            shared_mount: SharedMountConfig {
                enabled: true,
                type_name: CLUSTER_BLOCK_TYPE.to_string(),
            },
            ..Default::default()
        };
        let mut builder = StorageTypeRegistryBuilder::new();
        let persistence = Persistence::in_memory();
        let result = ProviderFactory::register_builtin(&mut builder, &config, &persistence);
        assert_matches!(result, Err(Error::DuplicateStorageType { .. }));
    }
}
