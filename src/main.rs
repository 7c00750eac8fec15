// src/main.rs
//! Engine Pool service
//!
//! Keeps inference engines warm: preloads the configured models, logs pool
//! statistics on every watchdog interval, and unloads everything on Ctrl+C.

use anyhow::{Context, Result};
use engine_pool::observability::{init_metrics, init_tracing};
use engine_pool::utils::config::ServiceConfig;
use engine_pool::{EnginePool, LoadOptions, MockEngineFactory};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first; it decides the log format
    let config = ServiceConfig::load().context("failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.observability)?;
    init_metrics(&config.observability)?;

    info!("Starting Engine Pool v{}", engine_pool::VERSION);
    info!("Configuration loaded: {:?}", config);

    // Real GPU backends plug in through `EngineFactory`
    let factory = Arc::new(MockEngineFactory::new());
    let pool = EnginePool::with_config(factory, config.pool.clone())?;

    for model_ref in &config.pool.preload {
        match pool.get(model_ref, LoadOptions::new()).await {
            Ok(_) => info!("Preloaded {}", model_ref),
            Err(e) => error!("Failed to preload {}: {}", model_ref, e),
        }
    }

    let mut report = tokio::time::interval(config.pool.watchdog.interval());
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                info!("Received shutdown signal, cleaning up...");
                break;
            }
            _ = report.tick() => {
                let stats = pool.stats();
                info!(
                    "Pool stats: {}",
                    serde_json::to_string(&stats).unwrap_or_else(|_| format!("{:?}", stats))
                );
            }
        }
    }

    pool.shutdown().await;
    info!("Engine pool stopped gracefully");
    Ok(())
}
