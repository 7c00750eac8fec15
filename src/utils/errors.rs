// src/utils/errors.rs
//! Error types for the engine pool
//!
//! Every error here is `Clone`: a single load outcome is shared by all
//! callers waiting on the same in-flight key.

use crate::engine::BackendError;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors surfaced by the pool to application code
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// Loading an engine failed; nothing was inserted into the pool
    #[error("failed to load engine for '{model_ref}': {cause}")]
    Load {
        model_ref: String,
        cause: LoadFailure,
    },

    /// Capacity must be at least 1
    #[error("invalid pool capacity {0}: must be at least 1")]
    InvalidCapacity(usize),

    /// Configuration could not be loaded or failed validation
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine was removed from the pool while the caller waited on its
    /// restart
    #[error("engine for '{0}' was removed from the pool during a restart")]
    Evicted(String),

    /// The pool has been shut down
    #[error("engine pool has been shut down")]
    ShutDown,
}

/// Why a load did not produce a ready engine
#[derive(Debug, Clone, Error)]
pub enum LoadFailure {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("load timed out after {0:?}")]
    Timeout(Duration),

    /// Worker panicked or was cancelled
    #[error("load aborted: {0}")]
    Aborted(String),
}

impl PoolError {
    pub(crate) fn load(model_ref: impl Into<String>, cause: impl Into<LoadFailure>) -> Self {
        PoolError::Load {
            model_ref: model_ref.into(),
            cause: cause.into(),
        }
    }

    /// True when the error came from a load that exceeded its deadline
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            PoolError::Load {
                cause: LoadFailure::Timeout(_),
                ..
            }
        )
    }
}

impl From<config::ConfigError> for PoolError {
    fn from(err: config::ConfigError) -> Self {
        PoolError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display() {
        let err = PoolError::load("dolphin-34b", BackendError::Load("out of memory".into()));
        assert_eq!(
            err.to_string(),
            "failed to load engine for 'dolphin-34b': model load failed: out of memory"
        );
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_timeout_detection() {
        let err = PoolError::load("slow", LoadFailure::Timeout(Duration::from_secs(5)));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_invalid_capacity_display() {
        assert_eq!(
            PoolError::InvalidCapacity(0).to_string(),
            "invalid pool capacity 0: must be at least 1"
        );
    }
}
