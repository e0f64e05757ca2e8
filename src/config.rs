//! Framework Configuration
//!
//! YAML configuration for the binary. Every field has a default so an empty
//! file (or no file) yields a working setup.

use crate::capacity::CapacityUpdaterConfig;
use crate::controlplane::capacity_query::SessionPolicy;
use crate::controlplane::providers::ProvidersConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FrameworkConfig {
    pub api: ApiConfig,
    pub capacity: CapacityConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiConfig {
    pub rest_addr: String,
    pub health_addr: String,
    pub metrics_addr: String,
    /// Accepted session ids. Empty accepts any non-empty session.
    pub session_tokens: Vec<String>,
    pub max_body_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rest_addr: "0.0.0.0:8090".to_string(),
            health_addr: "0.0.0.0:8081".to_string(),
            metrics_addr: "0.0.0.0:8080".to_string(),
            session_tokens: Vec::new(),
            max_body_size: 1024 * 1024,
        }
    }
}

impl ApiConfig {
    pub fn rest_socket(&self) -> Result<SocketAddr> {
        parse_addr("api.restAddr", &self.rest_addr)
    }

    pub fn health_socket(&self) -> Result<SocketAddr> {
        parse_addr("api.healthAddr", &self.health_addr)
    }

    pub fn metrics_socket(&self) -> Result<SocketAddr> {
        parse_addr("api.metricsAddr", &self.metrics_addr)
    }

    pub fn session_policy(&self) -> SessionPolicy {
        if self.session_tokens.is_empty() {
            SessionPolicy::any()
        } else {
            SessionPolicy::tokens(self.session_tokens.iter().cloned())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CapacityConfig {
    pub retry_initial_interval_ms: u64,
    pub retry_max_interval_ms: u64,
    pub retry_max_elapsed_ms: u64,
    /// Bound of the capacity report queue
    pub intake_capacity: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        let updater = CapacityUpdaterConfig::default();
        Self {
            retry_initial_interval_ms: updater.initial_interval.as_millis() as u64,
            retry_max_interval_ms: updater.max_interval.as_millis() as u64,
            retry_max_elapsed_ms: updater.max_elapsed_time.as_millis() as u64,
            intake_capacity: 256,
        }
    }
}

impl CapacityConfig {
    pub fn updater(&self) -> CapacityUpdaterConfig {
        CapacityUpdaterConfig {
            initial_interval: Duration::from_millis(self.retry_initial_interval_ms),
            max_interval: Duration::from_millis(self.retry_max_interval_ms),
            max_elapsed_time: Duration::from_millis(self.retry_max_elapsed_ms),
        }
    }
}

impl FrameworkConfig {
    /// Load from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: FrameworkConfig = if raw.trim().is_empty() {
            FrameworkConfig::default()
        } else {
            serde_yaml::from_str(raw)
                .map_err(|e| Error::Configuration(format!("Invalid configuration: {}", e)))?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.api.rest_socket()?;
        self.api.health_socket()?;
        self.api.metrics_socket()?;

        let capacity = &self.capacity;
        if capacity.retry_initial_interval_ms == 0 {
            return Err(Error::Configuration(
                "capacity.retryInitialIntervalMs must be positive".into(),
            ));
        }
        if capacity.retry_max_interval_ms < capacity.retry_initial_interval_ms {
            return Err(Error::Configuration(
                "capacity.retryMaxIntervalMs must not be below retryInitialIntervalMs".into(),
            ));
        }
        if capacity.intake_capacity == 0 {
            return Err(Error::Configuration(
                "capacity.intakeCapacity must be positive".into(),
            ));
        }

        let providers = &self.providers;
        if providers.cluster_block.enabled && providers.cluster_block.type_name.trim().is_empty() {
            return Err(Error::Configuration(
                "providers.clusterBlock.typeName must not be empty".into(),
            ));
        }
        if providers.shared_mount.enabled && providers.shared_mount.type_name.trim().is_empty() {
            return Err(Error::Configuration(
                "providers.sharedMount.typeName must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} {:?}: {}", field, value, e)))
}
