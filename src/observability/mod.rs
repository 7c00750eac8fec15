// src/observability/mod.rs
//! Logging and metrics setup
//!
//! - **Tracing**: `tracing-subscriber` with `RUST_LOG` filtering, plain or JSON
//! - **Metrics**: `metrics` facade, exported over HTTP for Prometheus when a
//!   port is configured

pub mod metrics;

use crate::utils::config::ObservabilityConfig;
use crate::utils::errors::{PoolError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| PoolError::Config(format!("invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true);

    let installed = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| PoolError::Config(format!("failed to install tracing subscriber: {}", e)))
}

/// Install the Prometheus exporter if a metrics port is configured
///
/// Must be called from inside a tokio runtime.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let Some(port) = config.metrics_port else {
        return Ok(());
    };

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| PoolError::Config(format!("failed to start metrics exporter: {}", e)))?;

    info!("Prometheus metrics exported on {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_without_port() {
        let config = ObservabilityConfig::default();
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_tracing_installs_once() {
        let config = ObservabilityConfig::default();
        let _ = init_tracing(&config);
        assert!(matches!(init_tracing(&config), Err(PoolError::Config(_))));
    }
}
