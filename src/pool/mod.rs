// src/pool/mod.rs
//! Engine pool
//!
//! - **Manager**: `get`/`evict`/`clear`/`stats` over a bounded set of engines
//! - **LRU store**: recency-ordered storage with capacity eviction
//! - **Executor**: bounded workers for blocking load/unload calls
//! - **Watchdog**: periodic health sweeps with in-place restarts
//!
//! # Architecture
//!
//! ```text
//!   get(model, opts)
//!         │
//!         ▼
//! ┌───────────────────┐  hit + healthy   ┌──────────────┐
//! │    EnginePool     │ ───────────────▶ │  engine Arc  │
//! │ ┌───────────────┐ │                  └──────────────┘
//! │ │   LruStore    │ │  miss / stale
//! │ │  (max_size)   │ │ ──────────────┐
//! │ └───────────────┘ │               ▼
//! │ ┌───────────────┐ │     ┌────────────────────┐
//! │ │ in-flight map │◀┼─────│ LoadExecutor (N)   │
//! │ └───────────────┘ │     │ load / unload      │
//! └─────────▲─────────┘     └────────────────────┘
//!           │ sweep every interval
//!     ┌─────┴─────┐
//!     │ Watchdog  │── restart ──▶ EventSink
//!     └───────────┘
//! ```

pub mod entry;
pub mod executor;
pub mod lru;
pub mod manager;
pub mod stats;
pub mod watchdog;

pub use entry::Entry;
pub use executor::{LoadExecutor, TaskFailed, TaskHandle};
pub use lru::LruStore;
pub use manager::EnginePool;
pub use stats::{HealthStatus, ModelInfo, PoolCounters, PoolStats};
pub use watchdog::SweepReport;

#[cfg(test)]
pub(crate) mod testing {
    use crate::engine::LoadOptions;
    use crate::utils::config::PoolConfig;
    use std::time::Duration;

    /// Pool config with the background watchdog off, so tests drive sweeps
    pub(crate) fn test_config(max_size: usize) -> PoolConfig {
        let mut config = PoolConfig {
            max_size,
            ..PoolConfig::default()
        };
        config.watchdog.enabled = false;
        config
    }

    pub(crate) fn options(value: serde_json::Value) -> LoadOptions {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected a JSON object, got {}", other),
        }
    }

    /// Poll `cond` until it holds, failing the test after 5 seconds
    pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not met within 5s"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
