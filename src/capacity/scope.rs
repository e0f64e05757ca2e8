//! Capacity Scope
//!
//! Selects the set of storage records a capacity report applies to. The
//! updater only sees this value; how a provider groups its records is the
//! provider's choice.

use crate::domain::model::{PrimaryStorageRecord, StorageId, StorageTypeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum CapacityScope {
    /// Records of one storage type sharing a backend cluster name
    #[serde(rename_all = "camelCase")]
    ClusterName {
        storage_type: StorageTypeId,
        cluster_name: String,
    },
    /// Explicit storage ids, limited to records of one storage type
    #[serde(rename_all = "camelCase")]
    Storages {
        storage_type: StorageTypeId,
        ids: Vec<StorageId>,
    },
}

impl CapacityScope {
    pub fn cluster(
        storage_type: impl Into<StorageTypeId>,
        cluster_name: impl Into<String>,
    ) -> Self {
        CapacityScope::ClusterName {
            storage_type: storage_type.into(),
            cluster_name: cluster_name.into(),
        }
    }

    pub fn storages<I, S>(storage_type: impl Into<StorageTypeId>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StorageId>,
    {
        CapacityScope::Storages {
            storage_type: storage_type.into(),
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn storage_type(&self) -> &StorageTypeId {
        match self {
            CapacityScope::ClusterName { storage_type, .. }
            | CapacityScope::Storages { storage_type, .. } => storage_type,
        }
    }

    /// Whether `record` falls inside this scope
    pub fn matches(&self, record: &PrimaryStorageRecord) -> bool {
        match self {
            CapacityScope::ClusterName {
                storage_type,
                cluster_name,
            } => {
                &record.storage_type == storage_type
                    && record.cluster_name.as_deref() == Some(cluster_name.as_str())
            }
            CapacityScope::Storages { storage_type, ids } => {
                &record.storage_type == storage_type && ids.contains(&record.uuid)
            }
        }
    }
}

impl std::fmt::Display for CapacityScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityScope::ClusterName {
                storage_type,
                cluster_name,
            } => write!(f, "{}/cluster:{}", storage_type, cluster_name),
            CapacityScope::Storages { storage_type, ids } => {
                write!(f, "{}/storages:{}", storage_type, ids.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::CreatePrimaryStorageRequest;

    fn record(storage_type: &str, cluster: &str) -> PrimaryStorageRecord {
        let request = CreatePrimaryStorageRequest::new("ps", "zone-1", storage_type)
            .with_cluster_name(cluster);
        PrimaryStorageRecord::from_request(StorageId::new("ps-1"), &request)
    }

    #[test]
    fn test_cluster_scope_matches_type_and_name() {
        let scope = CapacityScope::cluster("X", "c1");
        assert!(scope.matches(&record("X", "c1")));
        assert!(!scope.matches(&record("Y", "c1")));
        assert!(!scope.matches(&record("X", "c2")));
        assert_eq!(scope.to_string(), "X/cluster:c1");
    }

    #[test]
    fn test_storage_scope_matches_type_and_id() {
        let rec = record("X", "c1");
        assert!(CapacityScope::storages("X", ["ps-1"]).matches(&rec));
        assert!(!CapacityScope::storages("X", ["ps-2"]).matches(&rec));
        assert!(!CapacityScope::storages("Y", ["ps-1"]).matches(&rec));
        assert_eq!(CapacityScope::storages("Y", ["ps-1"]).to_string(), "Y/storages:1");
    }
}
