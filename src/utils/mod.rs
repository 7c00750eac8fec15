// src/utils/mod.rs
//! Common utilities: configuration and error types

pub mod config;
pub mod errors;

pub use self::config::{ObservabilityConfig, PoolConfig, ServiceConfig, WatchdogConfig};
pub use self::errors::{LoadFailure, PoolError, Result};
