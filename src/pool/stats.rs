// src/pool/stats.rs
//! Pool statistics
//!
//! Counters live inside the pool's structural lock and are copied out by
//! `EnginePool::stats()`. They only grow until `reset_stats()` is called.

use crate::observability::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Monotonic pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolCounters {
    /// Requests served by a healthy resident engine
    pub hits: u64,

    /// Requests that had to wait for a load or restart
    pub misses: u64,

    /// Successful engine loads
    pub total_loads: u64,

    /// Engines removed from the pool (eviction, removal, clear)
    pub total_unloads: u64,

    /// Health probes issued
    pub health_checks: u64,

    /// Health probes that failed or timed out
    pub health_failures: u64,

    /// Watchdog restarts that reloaded successfully
    pub auto_restarts: u64,

    /// Watchdog restarts whose reload failed
    pub failed_restarts: u64,
}

impl PoolCounters {
    /// Fraction of requests served from the pool, 0.0 with no traffic
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    // Each counter change below is mirrored to the metrics facade in the
    // same call, so exported series and `stats()` move together.

    pub(crate) fn hit(&mut self, model_ref: &str) {
        self.hits += 1;
        metrics::record_hit(model_ref);
    }

    pub(crate) fn miss(&mut self, model_ref: &str) {
        self.misses += 1;
        metrics::record_miss(model_ref);
    }

    pub(crate) fn loaded(&mut self, model_ref: &str, backend: &str, elapsed: Duration) {
        self.total_loads += 1;
        metrics::record_load(model_ref, backend, elapsed);
    }

    pub(crate) fn unloaded(&mut self, count: usize) {
        self.total_unloads += count as u64;
        metrics::record_unloads(count);
    }

    pub(crate) fn probed(&mut self, model_ref: &str, healthy: bool) {
        self.health_checks += 1;
        if !healthy {
            self.health_failures += 1;
        }
        metrics::record_health_check(model_ref, healthy);
    }

    pub(crate) fn restarted(&mut self, succeeded: bool) {
        if succeeded {
            self.auto_restarts += 1;
        } else {
            self.failed_restarts += 1;
        }
        metrics::record_restart(succeeded);
    }
}

/// Health classification of a resident entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
}

impl HealthStatus {
    pub fn from_failures(failures: u32, max_failures: u32) -> Self {
        if failures == 0 {
            HealthStatus::Healthy
        } else if failures < max_failures {
            HealthStatus::Warning
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// Point-in-time view of one resident engine
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub key: String,
    pub model_ref: String,
    pub backend: String,
    pub last_used: DateTime<Utc>,
    pub idle_secs: f64,
    pub last_health_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub load_duration_ms: f64,
    pub health: HealthStatus,
    pub benchmarks: BTreeMap<String, f64>,
}

/// Point-in-time pool snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub cache_size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
    #[serde(flatten)]
    pub counters: PoolCounters,

    /// Resident model references, least recently used first
    pub models: Vec<String>,

    pub entries: Vec<ModelInfo>,
}

impl PoolStats {
    pub fn hits(&self) -> u64 {
        self.counters.hits
    }

    pub fn misses(&self) -> u64 {
        self.counters.misses
    }

    pub fn total_loads(&self) -> u64 {
        self.counters.total_loads
    }

    pub fn total_unloads(&self) -> u64 {
        self.counters.total_unloads
    }

    pub fn health_checks(&self) -> u64 {
        self.counters.health_checks
    }

    pub fn health_failures(&self) -> u64 {
        self.counters.health_failures
    }

    pub fn auto_restarts(&self) -> u64 {
        self.counters.auto_restarts
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let mut counters = PoolCounters::default();
        assert_eq!(counters.hit_rate(), 0.0);

        counters.hits = 3;
        counters.misses = 1;
        assert!((counters.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counting_helpers() {
        let mut counters = PoolCounters::default();
        counters.miss("m");
        counters.loaded("m", "MockEngine", Duration::from_millis(5));
        counters.hit("m");
        counters.probed("m", true);
        counters.probed("m", false);
        counters.unloaded(2);
        counters.restarted(true);
        counters.restarted(false);

        assert_eq!(counters.hits, 1);
        assert_eq!(counters.misses, 1);
        assert_eq!(counters.total_loads, 1);
        assert_eq!(counters.total_unloads, 2);
        assert_eq!(counters.health_checks, 2);
        assert_eq!(counters.health_failures, 1);
        assert_eq!(counters.auto_restarts, 1);
        assert_eq!(counters.failed_restarts, 1);
    }

    #[test]
    fn test_health_status() {
        assert_eq!(HealthStatus::from_failures(0, 3), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_failures(2, 3), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_failures(3, 3), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_stats_serialization_is_flat() {
        let stats = PoolStats {
            cache_size: 1,
            max_size: 2,
            hit_rate: 0.5,
            counters: PoolCounters {
                hits: 1,
                misses: 1,
                ..Default::default()
            },
            models: vec!["m".into()],
            entries: vec![],
        };

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["hits"], 1);
        assert_eq!(json["cache_size"], 1);
        assert_eq!(json["models"][0], "m");
    }
}
