// src/events.rs
//! Alert events published by the pool
//!
//! The watchdog publishes one CRITICAL alert every time it force-restarts an
//! engine. Consumers (dashboards, notifiers) subscribe through an
//! [`EventSink`]; the pool never waits on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// Alert event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,

    /// Model the alert is about
    pub model_ref: String,

    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Alert for a watchdog-initiated restart of `backend`
    pub fn backend_restart(backend: &str, model_ref: &str) -> Self {
        Self {
            level: AlertLevel::Critical,
            message: format!("Backend restart: {}", backend),
            model_ref: model_ref.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of pool alerts
pub trait EventSink: Send + Sync {
    /// Must not block
    fn publish(&self, alert: Alert);
}

/// Writes alerts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn publish(&self, alert: Alert) {
        match alert.level {
            AlertLevel::Critical => error!(model = %alert.model_ref, "{}", alert.message),
            AlertLevel::Warning => warn!(model = %alert.model_ref, "{}", alert.message),
            AlertLevel::Info => info!(model = %alert.model_ref, "{}", alert.message),
        }
    }
}

/// Fans alerts out to any number of subscribers
///
/// Slow subscribers lose the oldest alerts rather than blocking the pool.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<Alert>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, alert: Alert) {
        // No subscribers is not an error
        let _ = self.tx.send(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_alert_shape() {
        let alert = Alert::backend_restart("LlamaCppBackend", "/models/llama.gguf");
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["level"], "CRITICAL");
        assert_eq!(json["message"], "Backend restart: LlamaCppBackend");
        assert_eq!(json["model_ref"], "/models/llama.gguf");
    }

    #[tokio::test]
    async fn test_broadcast_delivery() {
        let sink = BroadcastEventSink::new(8);
        let mut rx = sink.subscribe();

        sink.publish(Alert::backend_restart("MockEngine", "m"));

        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.level, AlertLevel::Critical);
        assert_eq!(alert.message, "Backend restart: MockEngine");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let sink = BroadcastEventSink::default();
        sink.publish(Alert::backend_restart("MockEngine", "m"));
        LogEventSink.publish(Alert::backend_restart("MockEngine", "m"));
    }
}
