// src/observability/metrics.rs
//! Prometheus-style metrics for the engine pool
//!
//! Thin wrappers over the `metrics` facade so call sites stay one line.
//! Without an installed recorder these are no-ops.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Longest model label kept, to bound label cardinality
const MAX_LABEL_LEN: usize = 32;

/// Turn a model path into a short, Prometheus-safe label
///
/// Keeps the file name only, replaces anything outside `[A-Za-z0-9_.-]`
/// with `_`, and keeps the last 32 characters.
pub fn model_label(model_ref: &str) -> String {
    let name = model_ref
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(model_ref);

    let sanitized: Vec<char> = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let start = sanitized.len().saturating_sub(MAX_LABEL_LEN);
    sanitized[start..].iter().collect()
}

pub fn record_hit(model_ref: &str) {
    counter!("engine_pool_hits_total", "model" => model_label(model_ref)).increment(1);
}

pub fn record_miss(model_ref: &str) {
    counter!("engine_pool_misses_total", "model" => model_label(model_ref)).increment(1);
}

pub fn record_load(model_ref: &str, backend: &str, elapsed: Duration) {
    counter!("engine_pool_loads_total").increment(1);
    histogram!(
        "model_load_seconds",
        "model_name" => model_label(model_ref),
        "backend" => backend.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_unloads(count: usize) {
    if count > 0 {
        counter!("engine_pool_unloads_total").increment(count as u64);
    }
}

pub fn record_health_check(model_ref: &str, healthy: bool) {
    let model = model_label(model_ref);
    counter!("engine_pool_health_checks_total", "model" => model.clone()).increment(1);
    if !healthy {
        counter!("engine_pool_health_failures_total", "model" => model).increment(1);
    }
}

pub fn record_restart(succeeded: bool) {
    if succeeded {
        counter!("engine_pool_auto_restarts_total").increment(1);
    } else {
        counter!("engine_pool_failed_restarts_total").increment(1);
    }
}

pub fn record_pool_size(size: usize, max_size: usize) {
    gauge!("engine_pool_size").set(size as f64);
    gauge!("engine_pool_max_size").set(max_size as f64);
}

pub fn record_benchmark(model_ref: &str, backend: &str, name: &str, value: f64) {
    let metric = match name {
        "tokens_per_second" => "model_tokens_per_second",
        "memory_used" => "model_memory_mb",
        "gpu_utilization" => "model_gpu_utilization",
        _ => return,
    };
    gauge!(
        metric,
        "model_name" => model_label(model_ref),
        "backend" => backend.to_string()
    )
    .set(value);
}
