// src/pool/watchdog.rs
//! Background health monitor
//!
//! Every `interval` the watchdog probes each resident engine. An engine that
//! fails `max_failures` probes in a row is restarted in place: unloaded and
//! loaded again on the same instance, without leaving the pool. Requests for
//! the model during the restart wait for it through the usual in-flight
//! marker.
//!
//! The watchdog task holds only a weak reference to the pool, so dropping
//! the last `EnginePool` handle ends it.

use crate::engine::Engine;
use crate::events::Alert;
use crate::pool::entry::Entry;
use crate::pool::manager::PoolInner;
use crate::utils::errors::{PoolError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one health sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Engines probed
    pub checked: usize,

    /// Probes that failed or timed out
    pub failed: usize,

    /// Engines restarted successfully
    pub restarted: usize,

    /// Restarts whose reload failed
    pub restart_failures: usize,
}

pub(crate) struct Watchdog {
    started: AtomicBool,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    pub(crate) fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Start the sweep loop unless it already runs or was stopped
    pub(crate) fn ensure_running(&self, pool: &Arc<PoolInner>, interval: Duration) {
        if self.cancel.is_cancelled() || self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let pool = Arc::downgrade(pool);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(run(pool, cancel, interval));
        *self.handle.lock() = Some(handle);
    }

    /// Stop the loop; a sweep in progress finishes first
    pub(crate) fn stop(&self) {
        self.cancel.cancel();
        self.handle.lock().take();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }
}

async fn run(pool: Weak<PoolInner>, cancel: CancellationToken, interval: Duration) {
    info!("Engine watchdog started (interval={:?})", interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let report = pool.sweep().await;
                debug!(
                    "Watchdog sweep: checked={}, failed={}, restarted={}",
                    report.checked, report.failed, report.restarted
                );
            }
        }
    }

    info!("Engine watchdog stopped");
}

impl PoolInner {
    /// Probe every resident engine once, restarting those over the limit
    pub(crate) async fn sweep(self: &Arc<Self>) -> SweepReport {
        let entries: Vec<Arc<Entry>> = {
            let state = self.state.lock();
            if state.closed {
                return SweepReport::default();
            }
            state.store.iter().map(|(_, e)| Arc::clone(e)).collect()
        };

        let max_failures = self.config.watchdog.max_failures;
        let mut report = SweepReport::default();

        for entry in entries {
            // Already being restarted
            if self.state.lock().is_busy(entry.key()) {
                continue;
            }

            report.checked += 1;
            let healthy = self.probe(entry.key(), entry.engine()).await;
            let failures = entry.record_probe(healthy);
            if healthy {
                continue;
            }

            report.failed += 1;
            warn!(
                "Engine {} failed health check ({}/{})",
                entry.key(),
                failures,
                max_failures
            );

            if failures >= max_failures {
                match self.restart(&entry).await {
                    Some(true) => report.restarted += 1,
                    Some(false) => report.restart_failures += 1,
                    None => {}
                }
            }
        }

        report
    }

    /// Restart `entry` in place if it is still resident and idle
    ///
    /// Returns `None` when the restart was skipped or the entry left the
    /// pool before it finished, otherwise whether the reload succeeded.
    async fn restart(self: &Arc<Self>, entry: &Arc<Entry>) -> Option<bool> {
        let pending = {
            let mut state = self.state.lock();
            let resident = state
                .store
                .peek(entry.key())
                .is_some_and(|current| Arc::ptr_eq(current, entry));
            if state.closed || !resident || state.is_busy(entry.key()) {
                return None;
            }

            let inner = Arc::clone(self);
            let target = Arc::clone(entry);
            state.begin(entry.key(), Some(Arc::clone(entry)), move |id| {
                inner.reload_in_place(target, id)
            })
        };

        warn!(
            "Restarting engine {} after {} consecutive health failures",
            entry.key(),
            entry.consecutive_failures()
        );
        self.events.publish(Alert::backend_restart(
            entry.engine().kind(),
            entry.key().model_ref(),
        ));

        match pending.await {
            Ok(_) => Some(true),
            Err(PoolError::Evicted(_)) => None,
            Err(_) => Some(false),
        }
    }

    async fn reload_in_place(
        self: Arc<Self>,
        entry: Arc<Entry>,
        marker: u64,
    ) -> Result<Arc<dyn Engine>> {
        let key = entry.key().clone();
        let engine = Arc::clone(entry.engine());

        let unloading = Arc::clone(&engine);
        match self.executor.spawn(move || unloading.unload()).await {
            Ok(Ok(())) => debug!("Unloaded {} for restart", key),
            Ok(Err(e)) => warn!("Unload before restart of {} failed: {}", key, e),
            Err(e) => warn!("Unload before restart of {} failed: {}", key, e),
        }

        let reloaded = self.run_load(&key, &engine, entry.options()).await;

        let resident = {
            let mut state = self.state.lock();
            state.finish(&key, marker);
            let resident = state
                .store
                .peek(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &entry));
            if resident {
                state.counters.restarted(reloaded.is_ok());
            }
            resident
        };

        if !resident {
            // Removal handed this unload to us
            info!("Engine {} left the pool during its restart, unloading", key);
            if let Err(e) = self.executor.submit_unload(&key, Arc::clone(&engine)).await {
                warn!("Unload of {} after restart failed: {}", key, e);
            }
            return Err(PoolError::Evicted(key.model_ref().to_string()));
        }

        match reloaded {
            Ok(elapsed) => {
                entry.reset_failures();
                entry.set_load_duration(elapsed);
                info!("Restarted engine {} in {:.2}s", key, elapsed.as_secs_f64());
                Ok(engine)
            }
            Err(e) => {
                error!("Restart of engine {} failed: {}", key, e);
                Err(e)
            }
        }
    }
}
