//! API Server
//!
//! Runs the REST server for the primary storage control plane.

use crate::capacity::CapacityReportSender;
use crate::controlplane::orchestrator::PrimaryStorageService;
use crate::error::{Error, Result};
use axum::extract::DefaultBodyLimit;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::rest::RestRouter;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
    /// Max request body size
    pub max_body_size: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8090)),
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

pub struct ApiServer {
    config: ApiServerConfig,
    service: Arc<PrimaryStorageService>,
    reports: CapacityReportSender,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(
        config: ApiServerConfig,
        service: Arc<PrimaryStorageService>,
        reports: CapacityReportSender,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            service,
            reports,
            shutdown_tx,
        }
    }

    /// Run until the REST server exits or `shutdown` is called
    pub async fn run(&self) -> Result<()> {
        info!(rest_addr = %self.config.rest_addr, "Starting API server");

        let rest_handle = self.spawn_rest_server();
        match rest_handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("REST server task failed: {:?}", e);
                Err(Error::Internal(format!("REST server task failed: {}", e)))
            }
        }
    }

    fn spawn_rest_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let config = self.config.clone();
        let router = RestRouter::new(self.service.clone(), self.reports.clone());
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move { run_rest_server(config, router, shutdown_rx).await })
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Handle that can trigger shutdown from another task
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}

async fn run_rest_server(
    config: ApiServerConfig,
    router: RestRouter,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let app = router
        .build()
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.rest_addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;

    info!("REST API listening on {}", config.rest_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("REST server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::{CapacityIntake, CapacityUpdaterConfig};
    use crate::controlplane::capacity_query::SessionPolicy;
    use crate::registry::StorageTypeRegistry;
    use crate::store::Persistence;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.rest_addr.port(), 8090);
        assert_eq!(config.max_body_size, 1024 * 1024);
    }

    #[tokio::test]
    async fn test_server_shuts_down() {
        let service = PrimaryStorageService::new(
            StorageTypeRegistry::builder().build(),
            Persistence::in_memory(),
            CapacityUpdaterConfig::default(),
            SessionPolicy::any(),
        );
        let (reports, _worker) = CapacityIntake::spawn(
            service.clone(),
            4,
            CancellationToken::new(),
        );
        let config = ApiServerConfig {
            rest_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            ..Default::default()
        };
        let server = Arc::new(ApiServer::new(config, service, reports));

        let running = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
