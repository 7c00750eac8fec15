// src/engine/mock.rs
//! In-process mock engine for development and testing
//!
//! Behaves like a real backend from the pool's point of view: loads take
//! time, health can be flipped at runtime, and loads can be forced to fail.

use crate::engine::{BackendError, Engine, EngineFactory, EngineKey, LoadOptions, TokenStream};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Mock engine with controllable health and load behaviour
pub struct MockEngine {
    loaded: Mutex<Option<String>>,
    healthy: AtomicBool,
    fail_loads: AtomicBool,
    load_delay: Duration,
    health_delay: Duration,
    load_calls: AtomicUsize,
    unload_calls: AtomicUsize,
    health_calls: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            loaded: Mutex::new(None),
            healthy: AtomicBool::new(true),
            fail_loads: AtomicBool::new(false),
            load_delay: Duration::ZERO,
            health_delay: Duration::ZERO,
            load_calls: AtomicUsize::new(0),
            unload_calls: AtomicUsize::new(0),
            health_calls: AtomicUsize::new(0),
        }
    }

    /// Simulate slow model loading
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Simulate a slow or hanging health endpoint
    pub fn with_health_delay(mut self, delay: Duration) -> Self {
        self.health_delay = delay;
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }

    pub fn loaded_model(&self) -> Option<String> {
        self.loaded.lock().clone()
    }

    pub fn load_count(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn unload_count(&self) -> usize {
        self.unload_calls.load(Ordering::SeqCst)
    }

    pub fn health_count(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MockEngine {
    fn load(&self, model_ref: &str, _options: &LoadOptions) -> Result<(), BackendError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }

        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(BackendError::Load(format!("mock failure loading {}", model_ref)));
        }

        debug!("MockEngine loaded {}", model_ref);
        *self.loaded.lock() = Some(model_ref.to_string());
        Ok(())
    }

    fn stream(&self, prompt: &str, options: &LoadOptions) -> Result<TokenStream, BackendError> {
        let model = self.loaded_model().ok_or(BackendError::NotLoaded)?;

        let max_tokens = options
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(100) as usize;

        let head: String = prompt.chars().take(20).collect();
        let response = if model.to_lowercase().contains("legal") {
            format!("Réponse juridique au sujet de: {}...", head)
        } else {
            format!("Response to: {}...", head)
        };

        let tokens: Vec<String> = response
            .split_whitespace()
            .take(max_tokens)
            .map(|word| format!("{} ", word))
            .collect();

        Ok(Box::new(tokens.into_iter()))
    }

    fn unload(&self) -> Result<(), BackendError> {
        self.unload_calls.fetch_add(1, Ordering::SeqCst);
        self.loaded.lock().take();
        Ok(())
    }

    fn health(&self) -> bool {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        if !self.health_delay.is_zero() {
            std::thread::sleep(self.health_delay);
        }
        self.healthy.load(Ordering::SeqCst) && self.is_loaded()
    }

    fn kind(&self) -> &str {
        "MockEngine"
    }
}

/// Factory producing [`MockEngine`]s and remembering every engine it built
#[derive(Default)]
pub struct MockEngineFactory {
    load_delay: Duration,
    health_delay: Duration,
    failing: Mutex<HashSet<String>>,
    created: Mutex<Vec<(EngineKey, Arc<MockEngine>)>>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_health_delay(mut self, delay: Duration) -> Self {
        self.health_delay = delay;
        self
    }

    /// Make every future engine for `model_ref` fail to load
    pub fn fail_model(&self, model_ref: impl Into<String>) {
        self.failing.lock().insert(model_ref.into());
    }

    /// Number of engines built so far
    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Every engine built so far, oldest first
    pub fn created(&self) -> Vec<Arc<MockEngine>> {
        self.created.lock().iter().map(|(_, e)| Arc::clone(e)).collect()
    }

    /// Engines built for `model_ref`, oldest first
    pub fn engines_for(&self, model_ref: &str) -> Vec<Arc<MockEngine>> {
        self.created
            .lock()
            .iter()
            .filter(|(key, _)| key.model_ref() == model_ref)
            .map(|(_, e)| Arc::clone(e))
            .collect()
    }

    /// Most recently built engine for `model_ref`
    pub fn latest(&self, model_ref: &str) -> Option<Arc<MockEngine>> {
        self.engines_for(model_ref).pop()
    }
}

impl EngineFactory for MockEngineFactory {
    fn create(&self, key: &EngineKey) -> Result<Arc<dyn Engine>, BackendError> {
        let engine = Arc::new(
            MockEngine::new()
                .with_load_delay(self.load_delay)
                .with_health_delay(self.health_delay),
        );
        if self.failing.lock().contains(key.model_ref()) {
            engine.set_fail_loads(true);
        }

        self.created.lock().push((key.clone(), Arc::clone(&engine)));
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_and_stream() {
        let engine = MockEngine::new();
        assert!(matches!(
            engine.stream("hi", &LoadOptions::new()),
            Err(BackendError::NotLoaded)
        ));

        engine.load("/models/dolphin", &LoadOptions::new()).unwrap();
        assert!(engine.health());

        let tokens: Vec<String> = engine.stream("Hello world", &LoadOptions::new()).unwrap().collect();
        assert_eq!(tokens.concat(), "Response to: Hello world... ");
    }

    #[test]
    fn test_stream_respects_max_tokens() {
        let engine = MockEngine::new();
        engine.load("legal-fr", &LoadOptions::new()).unwrap();

        let mut options = LoadOptions::new();
        options.insert("max_tokens".into(), 2.into());
        let tokens: Vec<String> = engine.stream("contrat", &options).unwrap().collect();
        assert_eq!(tokens, vec!["Réponse ".to_string(), "juridique ".to_string()]);
    }

    #[test]
    fn test_unload_is_idempotent() {
        let engine = MockEngine::new();
        engine.load("m", &LoadOptions::new()).unwrap();
        engine.unload().unwrap();
        engine.unload().unwrap();
        assert!(!engine.is_loaded());
        assert!(!engine.health());
        assert_eq!(engine.unload_count(), 2);
    }

    #[test]
    fn test_failing_loads() {
        let engine = MockEngine::new();
        engine.set_fail_loads(true);
        assert!(engine.load("m", &LoadOptions::new()).is_err());
        assert!(!engine.is_loaded());
        assert_eq!(engine.load_count(), 1);
    }

    #[test]
    fn test_factory_tracks_engines() {
        let factory = MockEngineFactory::new();
        factory.fail_model("bad");

        let good = factory.create(&EngineKey::bare("good")).unwrap();
        let bad = factory.create(&EngineKey::bare("bad")).unwrap();

        assert!(good.load("good", &LoadOptions::new()).is_ok());
        assert!(bad.load("bad", &LoadOptions::new()).is_err());
        assert_eq!(factory.created_count(), 2);
        assert_eq!(factory.engines_for("good").len(), 1);
        assert!(factory.latest("bad").is_some());
    }
}
