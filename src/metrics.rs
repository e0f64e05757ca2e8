//! Capacity Metrics
//!
//! Prometheus counters fed from the capacity updater's event stream.

use crate::capacity::CapacityEvent;
use crate::error::{Error, Result};
use prometheus::{IntCounter, Registry};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct CapacityMetrics {
    reports: IntCounter,
    initialized: IntCounter,
    physical_updates: IntCounter,
    empty_scopes: IntCounter,
}

impl CapacityMetrics {
    /// Create the counters and register them with `registry`
    pub fn register(registry: &Registry) -> Result<Self> {
        let metrics = Self {
            reports: counter(
                "primary_storage_capacity_reports_total",
                "Capacity reports applied to a non-empty scope"
            )?,
            initialized: counter(
                "primary_storage_capacity_initialized_total",
                "Storages whose logical capacity was set from a first report"
            )?,
            physical_updates: counter(
                "primary_storage_capacity_physical_updates_total",
                "Physical capacity changes written"
            )?,
            empty_scopes: counter(
                "primary_storage_capacity_empty_scopes_total",
                "Capacity reports that matched no storage"
            )?,
        };

        for c in [
            &metrics.reports,
            &metrics.initialized,
            &metrics.physical_updates,
            &metrics.empty_scopes,
        ] {
            registry
                .register(Box::new(c.clone()))
                .map_err(|e| Error::Internal(format!("Failed to register metric: {}", e)))?;
        }
        Ok(metrics)
    }

    pub fn observe(&self, event: &CapacityEvent) {
        match event {
            CapacityEvent::ReportApplied { .. } => self.reports.inc(),
            CapacityEvent::Initialized { .. } => self.initialized.inc(),
            CapacityEvent::PhysicalUpdated { .. } => self.physical_updates.inc(),
            CapacityEvent::ScopeEmpty { .. } => self.empty_scopes.inc(),
        }
    }

    /// Consume `events` until the channel closes or `cancel` fires
    pub fn spawn_collector(
        self,
        mut events: broadcast::Receiver<CapacityEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => {
                        debug!(?event, "Capacity event");
                        self.observe(&event);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Capacity metrics collector lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn reports(&self) -> u64 {
        self.reports.get()
    }

    pub fn initialized(&self) -> u64 {
        self.initialized.get()
    }

    pub fn physical_updates(&self) -> u64 {
        self.physical_updates.get()
    }

    pub fn empty_scopes(&self) -> u64 {
        self.empty_scopes.get()
    }
}

fn counter(name: &str, help: &str) -> Result<IntCounter> {
    IntCounter::new(name, help)
        .map_err(|e| Error::Internal(format!("Failed to create metric {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_observe_counts_by_kind() {
        let registry = Registry::new();
        let metrics = CapacityMetrics::register(&registry).unwrap();

        metrics.observe(&CapacityEvent::ScopeEmpty {
            scope: "X/cluster:c9".into(),
        });
        metrics.observe(&CapacityEvent::Initialized {
            storage_uuid: "ps-1".into(),
            total: 100,
            available: 80,
        });
        metrics.observe(&CapacityEvent::PhysicalUpdated {
            storage_uuid: "ps-1".into(),
            total: 100,
            available: 80,
        });

        assert_eq!(metrics.empty_scopes(), 1);
        assert_eq!(metrics.initialized(), 1);
        assert_eq!(metrics.physical_updates(), 1);
        assert_eq!(metrics.reports(), 0);
        assert_eq!(registry.gather().len(), 4);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        CapacityMetrics::register(&registry).unwrap();
        assert!(CapacityMetrics::register(&registry).is_err());
    }

    #[tokio::test]
    async fn test_collector_consumes_events() {
        let registry = Registry::new();
        let metrics = CapacityMetrics::register(&registry).unwrap();
        let (tx, rx) = broadcast::channel(8);
        let handle = metrics.clone().spawn_collector(rx, CancellationToken::new());

        tx.send(CapacityEvent::ReportApplied {
            scope: "X/cluster:c1".into(),
            matched: 1,
            initialized: 1,
            updated: 0,
        })
        .unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metrics.reports(), 1);
    }
}
