// src/pool/entry.rs
//! Pool entry: one resident engine plus its bookkeeping

use crate::engine::{Engine, EngineKey, LoadOptions};
use crate::pool::stats::{HealthStatus, ModelInfo};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mutable bookkeeping, guarded separately from the store structure so the
/// watchdog can update it from a snapshot.
#[derive(Debug)]
struct Book {
    last_used: Instant,
    last_used_at: DateTime<Utc>,
    last_health_check: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    load_duration: Duration,
    benchmarks: BTreeMap<String, f64>,
}

/// A resident engine owned by the pool
pub struct Entry {
    key: EngineKey,
    engine: Arc<dyn Engine>,
    options: LoadOptions,
    book: Mutex<Book>,
}

impl Entry {
    pub(crate) fn new(
        key: EngineKey,
        engine: Arc<dyn Engine>,
        options: LoadOptions,
        load_duration: Duration,
    ) -> Self {
        Self {
            key,
            engine,
            options,
            book: Mutex::new(Book {
                last_used: Instant::now(),
                last_used_at: Utc::now(),
                last_health_check: None,
                consecutive_failures: 0,
                load_duration,
                benchmarks: BTreeMap::new(),
            }),
        }
    }

    pub fn key(&self) -> &EngineKey {
        &self.key
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    pub(crate) fn touch(&self) {
        let mut book = self.book.lock();
        book.last_used = Instant::now();
        book.last_used_at = Utc::now();
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.book.lock().consecutive_failures
    }

    /// Record a probe outcome; returns the failure streak afterwards
    pub(crate) fn record_probe(&self, healthy: bool) -> u32 {
        let mut book = self.book.lock();
        book.last_health_check = Some(Utc::now());
        if healthy {
            book.consecutive_failures = 0;
        } else {
            book.consecutive_failures += 1;
        }
        book.consecutive_failures
    }

    pub(crate) fn reset_failures(&self) {
        self.book.lock().consecutive_failures = 0;
    }

    pub(crate) fn set_load_duration(&self, duration: Duration) {
        self.book.lock().load_duration = duration;
    }

    pub(crate) fn record_benchmarks(&self, figures: impl IntoIterator<Item = (String, f64)>) {
        self.book.lock().benchmarks.extend(figures);
    }

    pub(crate) fn info(&self, max_failures: u32) -> ModelInfo {
        let book = self.book.lock();
        ModelInfo {
            key: self.key.to_string(),
            model_ref: self.key.model_ref().to_string(),
            backend: self.engine.kind().to_string(),
            last_used: book.last_used_at,
            idle_secs: book.last_used.elapsed().as_secs_f64(),
            last_health_check: book.last_health_check,
            consecutive_failures: book.consecutive_failures,
            load_duration_ms: book.load_duration.as_secs_f64() * 1000.0,
            health: HealthStatus::from_failures(book.consecutive_failures, max_failures),
            benchmarks: book.benchmarks.clone(),
        }
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("backend", &self.engine.kind())
            .field("book", &*self.book.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    fn entry() -> Entry {
        Entry::new(
            EngineKey::bare("m"),
            Arc::new(MockEngine::new()),
            LoadOptions::new(),
            Duration::from_millis(1500),
        )
    }

    #[test]
    fn test_failure_streak() {
        let entry = entry();
        assert_eq!(entry.record_probe(false), 1);
        assert_eq!(entry.record_probe(false), 2);
        assert_eq!(entry.record_probe(true), 0);
        assert_eq!(entry.record_probe(false), 1);
        entry.reset_failures();
        assert_eq!(entry.consecutive_failures(), 0);
    }

    #[test]
    fn test_info() {
        let entry = entry();
        entry.record_probe(false);
        entry.record_benchmarks([("tokens_per_second".to_string(), 42.5)]);

        let info = entry.info(3);
        assert_eq!(info.model_ref, "m");
        assert_eq!(info.backend, "MockEngine");
        assert_eq!(info.consecutive_failures, 1);
        assert_eq!(info.health, HealthStatus::Warning);
        assert!((info.load_duration_ms - 1500.0).abs() < f64::EPSILON);
        assert_eq!(info.benchmarks.get("tokens_per_second"), Some(&42.5));
        assert!(info.last_health_check.is_some());
        assert!(info.idle_secs >= 0.0);
    }
}
