// src/engine/mod.rs
//! Inference engine capability interface
//!
//! The pool never looks inside an engine. Backends (llama.cpp servers,
//! vLLM, in-process transformers) implement [`Engine`] and are built by an
//! [`EngineFactory`] on every cache miss.
//!
//! All methods are blocking and take `&self`: an engine owns its own
//! interior state so the watchdog can reload the same instance in place.

pub mod mock;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use mock::{MockEngine, MockEngineFactory};

/// Load options passed through to a backend, ordered by key
pub type LoadOptions = serde_json::Map<String, serde_json::Value>;

/// Finite, non-restartable sequence of generated tokens
pub type TokenStream = Box<dyn Iterator<Item = String> + Send>;

/// Errors reported by engine backends
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("model load failed: {0}")]
    Load(String),

    #[error("engine is not loaded")]
    NotLoaded,

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("unload failed: {0}")]
    Unload(String),

    #[error("unsupported model: {0}")]
    Unsupported(String),
}

/// A GPU-resident inference backend
pub trait Engine: Send + Sync {
    /// Load `model_ref`; may take seconds to minutes
    fn load(&self, model_ref: &str, options: &LoadOptions) -> Result<(), BackendError>;

    /// Stream completion tokens for `prompt`
    fn stream(&self, prompt: &str, options: &LoadOptions) -> Result<TokenStream, BackendError>;

    /// Release GPU resources. Calling it twice is harmless.
    fn unload(&self) -> Result<(), BackendError>;

    /// Cheap liveness probe
    fn health(&self) -> bool;

    /// Backend name used in alerts and metric labels
    fn kind(&self) -> &str {
        "Engine"
    }
}

/// Builds unloaded engines for the pool
pub trait EngineFactory: Send + Sync {
    fn create(&self, key: &EngineKey) -> Result<Arc<dyn Engine>, BackendError>;
}

impl<F> EngineFactory for F
where
    F: Fn(&EngineKey) -> Result<Arc<dyn Engine>, BackendError> + Send + Sync,
{
    fn create(&self, key: &EngineKey) -> Result<Arc<dyn Engine>, BackendError> {
        self(key)
    }
}

/// Identity of a pooled engine: model reference plus canonical options
///
/// Requests for the same model with different options never share an engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineKey {
    model_ref: String,
    options: String,
}

impl EngineKey {
    pub fn new(model_ref: impl Into<String>, options: &LoadOptions) -> Self {
        // serde_json::Map is BTreeMap-backed, so serialization is key-sorted
        let options = serde_json::Value::Object(options.clone()).to_string();
        Self {
            model_ref: model_ref.into(),
            options,
        }
    }

    /// Key for a model loaded with no options
    pub fn bare(model_ref: impl Into<String>) -> Self {
        Self::new(model_ref, &LoadOptions::new())
    }

    pub fn model_ref(&self) -> &str {
        &self.model_ref
    }

    /// Canonical JSON form of the load options
    pub fn canonical_options(&self) -> &str {
        &self.options
    }

    pub fn has_options(&self) -> bool {
        self.options != "{}"
    }
}

impl fmt::Display for EngineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_options() {
            write!(f, "{} {}", self.model_ref, self.options)
        } else {
            f.write_str(&self.model_ref)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: serde_json::Value) -> LoadOptions {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_key_canonicalizes_option_order() {
        let a = options(json!({"quant": "awq", "gpu_layers": 40}));
        let b = options(json!({"gpu_layers": 40, "quant": "awq"}));

        assert_eq!(EngineKey::new("dolphin", &a), EngineKey::new("dolphin", &b));
        assert_eq!(
            EngineKey::new("dolphin", &a).canonical_options(),
            r#"{"gpu_layers":40,"quant":"awq"}"#
        );
    }

    #[test]
    fn test_key_distinguishes_options() {
        let awq = options(json!({"quant": "awq"}));
        let gptq = options(json!({"quant": "gptq"}));

        assert_ne!(EngineKey::new("dolphin", &awq), EngineKey::new("dolphin", &gptq));
        assert_ne!(EngineKey::new("dolphin", &awq), EngineKey::bare("dolphin"));
    }

    #[test]
    fn test_key_display() {
        assert_eq!(EngineKey::bare("/models/llama.gguf").to_string(), "/models/llama.gguf");
        let key = EngineKey::new("m", &options(json!({"port": 8001})));
        assert_eq!(key.to_string(), r#"m {"port":8001}"#);
        assert!(key.has_options());
    }

    #[test]
    fn test_closure_factory() {
        let factory = |_key: &EngineKey| -> Result<Arc<dyn Engine>, BackendError> {
            Ok(Arc::new(MockEngine::new()))
        };
        let engine = factory.create(&EngineKey::bare("m")).unwrap();
        assert_eq!(engine.kind(), "MockEngine");
    }
}
