//! Capacity Query
//!
//! Request and result types for aggregated primary storage capacity, plus the
//! session check guarding the query.

use crate::domain::model::{CapacityRecord, PrimaryStorageRecord, StorageId, SystemTag};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// =============================================================================
// Query
// =============================================================================

/// Selects primary storages whose capacity is summed.
///
/// Storage uuids take precedence over cluster uuids, which take precedence
/// over zone uuids. `all` selects every storage. Tag filters narrow the
/// selection further.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CapacityQuery {
    pub zone_uuids: Vec<String>,
    pub cluster_uuids: Vec<String>,
    pub primary_storage_uuids: Vec<StorageId>,
    pub all: bool,
    pub system_tags: Vec<String>,
    pub user_tags: Vec<String>,
    pub session_id: Option<String>,
}

impl CapacityQuery {
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// At least one selector must be set
    pub fn validate(&self) -> Result<()> {
        if self.all
            || !self.zone_uuids.is_empty()
            || !self.cluster_uuids.is_empty()
            || !self.primary_storage_uuids.is_empty()
        {
            return Ok(());
        }
        Err(Error::Validation(
            "one of zoneUuids, clusterUuids or primaryStorageUuids must be non-empty, \
             or all must be true"
                .into(),
        ))
    }

    /// Whether `record` is picked by the uuid selectors
    pub fn selects(&self, record: &PrimaryStorageRecord) -> bool {
        if self.all {
            true
        } else if !self.primary_storage_uuids.is_empty() {
            self.primary_storage_uuids.contains(&record.uuid)
        } else if !self.cluster_uuids.is_empty() {
            record
                .attached_cluster_uuids
                .iter()
                .any(|c| self.cluster_uuids.contains(c))
        } else {
            self.zone_uuids.contains(&record.zone_uuid)
        }
    }

    /// Whether `tags` carries every requested system and user tag
    pub fn tags_match(&self, tags: &[SystemTag]) -> bool {
        let has = |wanted: &String, inherent: bool| {
            tags.iter().any(|t| t.inherent == inherent && &t.tag == wanted)
        };
        self.system_tags.iter().all(|t| has(t, true))
            && self.user_tags.iter().all(|t| has(t, false))
    }

    pub fn has_tag_filters(&self) -> bool {
        !self.system_tags.is_empty() || !self.user_tags.is_empty()
    }
}

// =============================================================================
// Result
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityQueryResult {
    pub total_capacity: u64,
    pub available_capacity: u64,
    pub total_physical_capacity: u64,
    pub available_physical_capacity: u64,
    /// Number of storages summed
    pub matched: usize,
}

impl CapacityQueryResult {
    pub fn add(&mut self, capacity: &CapacityRecord) {
        self.total_capacity = self.total_capacity.saturating_add(capacity.total_capacity);
        self.available_capacity = self
            .available_capacity
            .saturating_add(capacity.available_capacity);
        self.total_physical_capacity = self
            .total_physical_capacity
            .saturating_add(capacity.total_physical_capacity);
        self.available_physical_capacity = self
            .available_physical_capacity
            .saturating_add(capacity.available_physical_capacity);
        self.matched += 1;
    }
}

// =============================================================================
// Session Policy
// =============================================================================

/// Accepted API sessions
#[derive(Debug, Clone, Default)]
pub struct SessionPolicy {
    /// `None` accepts any non-empty session id
    accepted: Option<HashSet<String>>,
}

impl SessionPolicy {
    pub fn any() -> Self {
        Self { accepted: None }
    }

    pub fn tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted: Some(tokens.into_iter().map(Into::into).collect()),
        }
    }

    pub fn check(&self, session_id: Option<&str>) -> Result<()> {
        let session = match session_id.map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => return Err(Error::SessionRequired),
        };
        match &self.accepted {
            Some(accepted) if !accepted.contains(session) => Err(Error::SessionInvalid),
            _ => Ok(()),
        }
    }
}
