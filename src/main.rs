//! Primary Storage Framework
//!
//! Control plane binary: builds the storage type registry from the built-in
//! providers, serves the REST API, and exposes health and metrics endpoints.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use primary_storage_framework::{
    ApiServer, ApiServerConfig, CapacityIntake, CapacityMetrics, Error, FrameworkConfig,
    Persistence, PrimaryStorageService, ProviderFactory, Result, StorageTypeRegistry,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Primary Storage Framework - pluggable primary storage control plane
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, short, env = "PSF_CONFIG")]
    config: Option<PathBuf>,

    /// REST API bind address (overrides the configuration file)
    #[arg(long, env = "API_ADDR")]
    api_addr: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR")]
    health_addr: Option<String>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = load_config(&args)?;

    info!("Starting Primary Storage Framework");
    info!("  Version: {}", primary_storage_framework::VERSION);
    info!("  REST API: {}", config.api.rest_addr);
    info!("  Health: {}", config.api.health_addr);
    info!("  Metrics: {}", config.api.metrics_addr);

    // Build the registry from the built-in providers
    let persistence = Persistence::in_memory();
    let mut builder = StorageTypeRegistry::builder();
    ProviderFactory::register_builtin(&mut builder, &config.providers, &persistence)?;
    let registry = builder.build();
    info!(storage_types = ?registry.storage_types(), "Storage type registry built");

    let service = PrimaryStorageService::new(
        registry,
        persistence,
        config.capacity.updater(),
        config.api.session_policy(),
    );

    let cancel = CancellationToken::new();
    let ready = Arc::new(AtomicBool::new(false));

    // Capacity metrics
    let metrics = CapacityMetrics::register(prometheus::default_registry())?;
    let collector = metrics.spawn_collector(service.updater().subscribe(), cancel.clone());

    // Capacity report intake
    let (reports, intake) =
        CapacityIntake::spawn(service.clone(), config.capacity.intake_capacity, cancel.clone());

    // Start health server
    let health_addr = config.api.health_socket()?;
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = config.api.metrics_socket()?;
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Create and run API server
    let api_config = ApiServerConfig {
        rest_addr: config.api.rest_socket()?,
        max_body_size: config.api.max_body_size,
    };
    let api_server = ApiServer::new(api_config, service.clone(), reports);
    let shutdown = api_server.shutdown_handle();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
            let _ = shutdown.send(());
            cancel.cancel();
        }
    });

    ready.store(true, Ordering::SeqCst);
    let result = api_server.run().await;
    ready.store(false, Ordering::SeqCst);

    cancel.cancel();
    match intake.await {
        Ok(stats) => info!(
            applied = stats.applied,
            failed = stats.failed,
            "Capacity intake stopped"
        ),
        Err(e) => error!("Capacity intake task failed: {}", e),
    }
    let _ = collector.await;

    info!("Shutdown complete");
    result
}

// =============================================================================
// Configuration
// =============================================================================

fn load_config(args: &Args) -> Result<FrameworkConfig> {
    let mut config = match &args.config {
        Some(path) => FrameworkConfig::load(path)?,
        None => FrameworkConfig::default(),
    };

    if let Some(addr) = &args.api_addr {
        config.api.rest_addr = addr.clone();
    }
    if let Some(addr) = &args.health_addr {
        config.api.health_addr = addr.clone();
    }
    if let Some(addr) = &args.metrics_addr {
        config.api.metrics_addr = addr.clone();
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn", "tower_http=info", "axum=info"] {
        let directive = directive.parse().map_err(|e| {
            Error::Configuration(format!("Invalid log directive {}: {}", directive, e))
        })?;
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: SocketAddr, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::SeqCst);
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if ready => text_response(StatusCode::OK, "ok"),
                        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind health server: {}", e)))?
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{header, Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    match encoder.encode(&metric_families, &mut buffer) {
                        Ok(()) => {
                            let mut response = Response::new(Body::from(buffer));
                            let content_type = encoder.format_type();
                            if let Ok(value) = header::HeaderValue::from_str(content_type) {
                                response.headers_mut().insert(header::CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => {
                            error!("Failed to encode metrics: {}", e);
                            text_response(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
                        }
                    }
                }
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
