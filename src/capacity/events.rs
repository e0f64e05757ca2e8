//! Capacity Events
//!
//! Emitted by the capacity updater for metrics and other observers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CapacityEvent {
    /// A report was applied to a scope
    ReportApplied {
        scope: String,
        matched: usize,
        initialized: usize,
        updated: usize,
    },

    /// Logical capacity of a storage was set from its first report
    Initialized {
        storage_uuid: String,
        total: u64,
        available: u64,
    },

    /// Physical capacity of a storage changed
    PhysicalUpdated {
        storage_uuid: String,
        total: u64,
        available: u64,
    },

    /// A report matched no storage
    ScopeEmpty { scope: String },
}

impl CapacityEvent {
    /// Storage the event is about, if it concerns a single storage
    pub fn storage_uuid(&self) -> Option<&str> {
        match self {
            CapacityEvent::Initialized { storage_uuid, .. }
            | CapacityEvent::PhysicalUpdated { storage_uuid, .. } => Some(storage_uuid),
            _ => None,
        }
    }

    pub fn is_scope_event(&self) -> bool {
        matches!(
            self,
            CapacityEvent::ReportApplied { .. } | CapacityEvent::ScopeEmpty { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_storage_uuid() {
        let event = CapacityEvent::Initialized {
            storage_uuid: "ps-1".to_string(),
            total: 100,
            available: 80,
        };
        assert_eq!(event.storage_uuid(), Some("ps-1"));
        assert!(!event.is_scope_event());

        let event = CapacityEvent::ScopeEmpty {
            scope: "X/cluster:c1".to_string(),
        };
        assert_eq!(event.storage_uuid(), None);
        assert!(event.is_scope_event());
    }
}
