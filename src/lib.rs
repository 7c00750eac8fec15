// src/lib.rs
//! Engine Pool Library
//!
//! Keeps a bounded set of loaded GPU inference engines resident and hands
//! them out by model reference, so switching between recently used models
//! does not pay the multi-second load cost again.
//!
//! # Architecture
//!
//! The library is structured into several key modules:
//!
//! - **engine**: Backend engine trait, factory seam, and a mock engine
//! - **pool**: LRU store, pool manager, load executor, and health watchdog
//! - **events**: Alerts published on watchdog restarts
//! - **observability**: Tracing setup and Prometheus metrics
//! - **utils**: Configuration and error types
//!
//! # Example
//!
//! ```no_run
//! use engine_pool::{EnginePool, LoadOptions, MockEngineFactory};
//! use std::sync::Arc;
//!
//! # async fn run() -> engine_pool::Result<()> {
//! let pool = EnginePool::new(Arc::new(MockEngineFactory::new()))?;
//! let engine = pool.get("/models/dolphin-34b-awq", LoadOptions::new()).await?;
//! if let Ok(tokens) = engine.stream("Hello", &LoadOptions::new()) {
//!     tokens.for_each(|token| print!("{}", token));
//! }
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

// Public module exports
pub mod engine;
pub mod events;
pub mod observability;
pub mod pool;
pub mod utils;

// Re-export commonly used types
pub use engine::{
    BackendError, Engine, EngineFactory, EngineKey, LoadOptions, MockEngine, MockEngineFactory,
    TokenStream,
};
pub use events::{Alert, AlertLevel, BroadcastEventSink, EventSink, LogEventSink};
pub use pool::{EnginePool, PoolStats, SweepReport};
pub use utils::config::{PoolConfig, ServiceConfig};
pub use utils::errors::{LoadFailure, PoolError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[tokio::test]
    async fn test_end_to_end_stream() {
        let pool = EnginePool::new(Arc::new(MockEngineFactory::new())).unwrap();

        let engine = pool.get("/models/legal-7b", LoadOptions::new()).await.unwrap();
        let tokens: String = engine
            .stream("Quelle est la loi?", &LoadOptions::new())
            .unwrap()
            .collect();
        assert!(tokens.starts_with("Réponse juridique"));

        pool.shutdown().await;
        assert!(pool.is_empty());
    }
}
