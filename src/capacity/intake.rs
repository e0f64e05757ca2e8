//! Capacity Report Intake
//!
//! Bounded queue between report producers (the REST endpoint, backend
//! agents) and the capacity updater. A single worker drains the queue.

use crate::capacity::updater::CapacityUpdateSummary;
use crate::domain::model::StorageTypeId;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity reported by a storage backend for one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityReport {
    #[serde(rename = "type")]
    pub storage_type: StorageTypeId,
    pub cluster_name: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl CapacityReport {
    pub fn new(
        storage_type: impl Into<StorageTypeId>,
        cluster_name: impl Into<String>,
        total_bytes: u64,
        available_bytes: u64,
    ) -> Self {
        Self {
            storage_type: storage_type.into(),
            cluster_name: cluster_name.into(),
            total_bytes,
            available_bytes,
        }
    }
}

/// Something that can apply a capacity report
#[async_trait]
pub trait CapacityReportSink: Send + Sync {
    async fn apply_report(&self, report: CapacityReport) -> Result<CapacityUpdateSummary>;
}

/// Cloneable producer side of the intake queue
#[derive(Clone)]
pub struct CapacityReportSender {
    tx: mpsc::Sender<CapacityReport>,
}

impl CapacityReportSender {
    /// Enqueue a report, waiting for queue space
    pub async fn send(&self, report: CapacityReport) -> Result<()> {
        self.tx
            .send(report)
            .await
            .map_err(|_| Error::Internal("capacity intake is closed".into()))
    }

    /// Enqueue a report without waiting
    pub fn try_send(&self, report: CapacityReport) -> Result<()> {
        self.tx.try_send(report).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::Internal("capacity intake queue is full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::Internal("capacity intake is closed".into())
            }
        })
    }
}

/// Totals collected by the worker until it stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeStats {
    pub applied: u64,
    pub failed: u64,
}

pub struct CapacityIntake;

impl CapacityIntake {
    /// Start the worker. It stops when `cancel` fires or every sender is dropped.
    pub fn spawn(
        sink: Arc<dyn CapacityReportSink>,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> (CapacityReportSender, JoinHandle<IntakeStats>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let handle = tokio::spawn(run(sink, rx, cancel));
        (CapacityReportSender { tx }, handle)
    }
}

async fn run(
    sink: Arc<dyn CapacityReportSink>,
    mut rx: mpsc::Receiver<CapacityReport>,
    cancel: CancellationToken,
) -> IntakeStats {
    info!("Capacity intake started");
    let mut stats = IntakeStats::default();

    loop {
        let report = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            report = rx.recv() => match report {
                Some(report) => report,
                None => break,
            },
        };

        let storage_type = report.storage_type.clone();
        let cluster_name = report.cluster_name.clone();
        match sink.apply_report(report).await {
            Ok(summary) => {
                stats.applied += 1;
                debug!(
                    %storage_type,
                    %cluster_name,
                    matched = summary.matched,
                    "Applied capacity report"
                );
            }
            Err(e) => {
                stats.failed += 1;
                warn!(%storage_type, %cluster_name, error = %e, "Failed to apply capacity report");
            }
        }
    }

    info!(applied = stats.applied, failed = stats.failed, "Capacity intake stopped");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<CapacityReport>>,
    }

    #[async_trait]
    impl CapacityReportSink for RecordingSink {
        async fn apply_report(&self, report: CapacityReport) -> Result<CapacityUpdateSummary> {
            if report.cluster_name == "broken" {
                return Err(Error::unknown_type(report.storage_type.as_str()));
            }
            self.seen.lock().push(report);
            Ok(CapacityUpdateSummary::default())
        }
    }

    #[tokio::test]
    async fn test_reports_applied_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let (sender, handle) = CapacityIntake::spawn(sink.clone(), 8, CancellationToken::new());

        sender.send(CapacityReport::new("X", "c1", 100, 80)).await.unwrap();
        sender.send(CapacityReport::new("X", "broken", 1, 1)).await.unwrap();
        sender.send(CapacityReport::new("X", "c1", 120, 60)).await.unwrap();
        drop(sender);

        let stats = handle.await.unwrap();
        assert_eq!(stats, IntakeStats { applied: 2, failed: 1 });

        let seen = sink.seen.lock();
        assert_eq!(seen[0].total_bytes, 100);
        assert_eq!(seen[1].total_bytes, 120);
    }

    #[tokio::test]
    async fn test_cancellation_stops_worker() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let (sender, handle) = CapacityIntake::spawn(sink, 8, cancel.clone());

        cancel.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats, IntakeStats::default());

        assert!(sender.send(CapacityReport::new("X", "c1", 1, 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_try_send_after_shutdown() {
        let cancel = CancellationToken::new();
        let (sender, handle) =
            CapacityIntake::spawn(Arc::new(RecordingSink::default()), 1, cancel.clone());

        tokio_test::assert_ok!(sender.try_send(CapacityReport::new("X", "c1", 1, 1)));
        cancel.cancel();
        handle.await.unwrap();
        tokio_test::assert_err!(sender.try_send(CapacityReport::new("X", "c1", 1, 1)));
    }

    #[test]
    fn test_report_wire_format() {
        let report: CapacityReport = serde_json::from_str(
            r#"{"type":"ClusterBlock","clusterName":"c1","totalBytes":10,"availableBytes":4}"#,
        )
        .unwrap();
        assert_eq!(report, CapacityReport::new("ClusterBlock", "c1", 10, 4));
    }
}
