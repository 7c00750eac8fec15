// src/pool/manager.rs
//! Engine pool manager
//!
//! Hands out ready engines by model reference, reusing resident ones and
//! loading new ones on demand. Loaded engines live in a bounded LRU store;
//! the least recently used engine is unloaded in the background when a new
//! one needs room.
//!
//! # Locking
//!
//! One `parking_lot::Mutex` guards the store structure, the in-flight load
//! markers and the counters. It is held for bookkeeping only, never across
//! an `.await` and never while an engine is loading, unloading or probing.
//!
//! # Per-key loads
//!
//! A key being loaded (or restarted by the watchdog) has an in-flight marker:
//! a shared future every concurrent caller for that key awaits. The load
//! itself runs in its own task, so a caller giving up does not abandon a
//! half-loaded engine.
//!
//! An entry removed from the store while the watchdog restarts it loses its
//! marker at once, so new requests start a fresh load. The restart task owns
//! the unload of that engine and runs it after its reload returns; nothing
//! else touches the engine in the meantime.

use crate::engine::{Engine, EngineFactory, EngineKey, LoadOptions};
use crate::events::{EventSink, LogEventSink};
use crate::observability::metrics;
use crate::pool::entry::Entry;
use crate::pool::executor::{LoadExecutor, TaskFailed};
use crate::pool::lru::LruStore;
use crate::pool::stats::{PoolCounters, PoolStats};
use crate::pool::watchdog::{SweepReport, Watchdog};
use crate::utils::config::PoolConfig;
use crate::utils::errors::{LoadFailure, PoolError, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of an in-flight load, shared by every caller waiting on the key
pub(crate) type PendingLoad = Shared<BoxFuture<'static, Result<Arc<dyn Engine>>>>;

/// Resolves once an engine that left the store has been unloaded
type Release = BoxFuture<'static, ()>;

/// In-flight marker for one key
pub(crate) struct InFlight {
    id: u64,
    outcome: PendingLoad,

    /// Entry being restarted in place; `None` for a fresh load
    restarting: Option<Arc<Entry>>,
}

/// Everything guarded by the pool lock
pub(crate) struct PoolState {
    pub(crate) store: LruStore<EngineKey, Arc<Entry>>,
    pub(crate) inflight: HashMap<EngineKey, InFlight>,
    pub(crate) counters: PoolCounters,
    pub(crate) closed: bool,
    next_marker: u64,
}

impl PoolState {
    pub(crate) fn is_busy(&self, key: &EngineKey) -> bool {
        self.inflight.contains_key(key)
    }

    /// Spawn `task` under a fresh marker for `key`
    pub(crate) fn begin<F>(
        &mut self,
        key: &EngineKey,
        restarting: Option<Arc<Entry>>,
        task: impl FnOnce(u64) -> F,
    ) -> PendingLoad
    where
        F: std::future::Future<Output = Result<Arc<dyn Engine>>> + Send + 'static,
    {
        self.next_marker += 1;
        let id = self.next_marker;
        let outcome = shared_outcome(key.model_ref(), tokio::spawn(task(id)));
        self.inflight.insert(
            key.clone(),
            InFlight {
                id,
                outcome: outcome.clone(),
                restarting,
            },
        );
        outcome
    }

    /// Drop the marker for `key` if it is still the one numbered `id`
    pub(crate) fn finish(&mut self, key: &EngineKey, id: u64) {
        if self.inflight.get(key).is_some_and(|marker| marker.id == id) {
            self.inflight.remove(key);
        }
    }

    /// Take the marker of a restart of `entry`, if one is running
    fn detach_restart(&mut self, key: &EngineKey, entry: &Arc<Entry>) -> Option<PendingLoad> {
        let restarting = self
            .inflight
            .get(key)
            .and_then(|marker| marker.restarting.as_ref())
            .is_some_and(|target| Arc::ptr_eq(target, entry));
        if restarting {
            self.inflight.remove(key).map(|marker| marker.outcome)
        } else {
            None
        }
    }
}

pub(crate) struct PoolInner {
    pub(crate) config: PoolConfig,
    pub(crate) factory: Arc<dyn EngineFactory>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) executor: LoadExecutor,
    pub(crate) state: Mutex<PoolState>,
    pub(crate) watchdog: Watchdog,
}

enum Lookup {
    Pending(PendingLoad),
    Resident(Arc<Entry>),
    Absent,
}

/// Hot-swapping pool of inference engines
///
/// Cheap to clone; every clone talks to the same pool. Construct one per
/// process and pass it to whoever needs engines.
#[derive(Clone)]
pub struct EnginePool {
    inner: Arc<PoolInner>,
}

impl EnginePool {
    /// Create a pool with default configuration
    pub fn new(factory: Arc<dyn EngineFactory>) -> Result<Self> {
        Self::with_config(factory, PoolConfig::default())
    }

    /// Create a pool with custom configuration
    pub fn with_config(factory: Arc<dyn EngineFactory>, config: PoolConfig) -> Result<Self> {
        Self::with_event_sink(factory, config, Arc::new(LogEventSink))
    }

    /// Create a pool publishing restart alerts to `events`
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn with_event_sink(
        factory: Arc<dyn EngineFactory>,
        config: PoolConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "Initializing engine pool (max_size={}, workers={})",
            config.max_size, config.executor_workers
        );

        let state = PoolState {
            store: LruStore::new(config.max_size)?,
            inflight: HashMap::new(),
            counters: PoolCounters::default(),
            closed: false,
            next_marker: 0,
        };
        metrics::record_pool_size(0, config.max_size);

        Ok(Self {
            inner: Arc::new(PoolInner {
                executor: LoadExecutor::new(config.executor_workers),
                state: Mutex::new(state),
                watchdog: Watchdog::new(),
                factory,
                events,
                config,
            }),
        })
    }

    /// Get a ready engine for `model_ref`, loading it if needed
    ///
    /// Blocks (asynchronously) until the engine is loaded. Concurrent calls
    /// for the same model and options share one load.
    pub async fn get(&self, model_ref: &str, options: LoadOptions) -> Result<Arc<dyn Engine>> {
        let key = EngineKey::new(model_ref, &options);

        let lookup = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::ShutDown);
            }
            if let Some(marker) = state.inflight.get(&key) {
                let pending = marker.outcome.clone();
                state.counters.miss(key.model_ref());
                Lookup::Pending(pending)
            } else if let Some(entry) = state.store.get(&key) {
                Lookup::Resident(Arc::clone(entry))
            } else {
                Lookup::Absent
            }
        };

        let stale = match lookup {
            Lookup::Pending(pending) => {
                debug!("Waiting for in-flight load of {}", key);
                return pending.await;
            }
            Lookup::Resident(entry) => {
                // Probe without the lock: a hung backend only stalls this caller
                let healthy = self.inner.probe(&key, entry.engine()).await;
                if healthy {
                    entry.touch();
                    self.inner.state.lock().counters.hit(key.model_ref());
                    debug!("Cache hit for {}", key);
                    return Ok(Arc::clone(entry.engine()));
                }
                warn!("Cached engine {} is unhealthy, reloading", key);
                Some(entry)
            }
            Lookup::Absent => None,
        };

        let pending = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::ShutDown);
            }
            state.counters.miss(key.model_ref());

            match state.inflight.get(&key) {
                Some(marker) => marker.outcome.clone(),
                None => {
                    if let Some(current) = state.store.peek(&key).cloned() {
                        let is_stale = stale.as_ref().is_some_and(|s| Arc::ptr_eq(s, &current));
                        if !is_stale {
                            // Someone else loaded it while we were probing
                            current.touch();
                            return Ok(Arc::clone(current.engine()));
                        }
                        state.store.remove(&key);
                        self.inner.release(&mut state, vec![(key.clone(), current)]);
                    }
                    self.inner.start_load(&mut state, key.clone(), options)
                }
            }
        };

        pending.await
    }

    /// Remove every resident engine for `model_ref`
    ///
    /// Unloads run in the background. Returns whether anything was removed.
    pub fn evict(&self, model_ref: &str) -> bool {
        let mut state = self.inner.state.lock();
        let keys: Vec<EngineKey> = state
            .store
            .keys()
            .into_iter()
            .filter(|k| k.model_ref() == model_ref)
            .collect();
        self.inner.remove_keys(&mut state, keys)
    }

    /// Remove the engine for exactly `key`
    pub fn evict_key(&self, key: &EngineKey) -> bool {
        let mut state = self.inner.state.lock();
        self.inner.remove_keys(&mut state, vec![key.clone()])
    }

    /// Unload every engine, waiting until all unloads have finished
    ///
    /// Engines caught mid-restart are unloaded once their reload returns;
    /// this waits for that too.
    pub async fn clear(&self) {
        let releases = {
            let mut state = self.inner.state.lock();
            let drained = state.store.drain();
            self.inner.release(&mut state, drained)
        };

        let count = releases.len();
        futures::future::join_all(releases).await;
        info!("Cleared {} engines from pool", count);
    }

    /// Change the maximum number of resident engines
    ///
    /// Shrinking unloads least recently used engines in the background.
    pub fn set_max_size(&self, max_size: usize) -> Result<()> {
        let mut state = self.inner.state.lock();
        let evicted = state.store.set_capacity(max_size)?;
        info!("Engine pool max size set to {}", max_size);
        self.inner.release(&mut state, evicted);
        Ok(())
    }

    /// Point-in-time statistics
    pub fn stats(&self) -> PoolStats {
        let (counters, snapshot, max_size) = {
            let state = self.inner.state.lock();
            (state.counters, state.store.snapshot(), state.store.capacity())
        };

        let max_failures = self.inner.config.watchdog.max_failures;
        PoolStats {
            cache_size: snapshot.len(),
            max_size,
            hit_rate: counters.hit_rate(),
            counters,
            models: snapshot.iter().map(|(k, _)| k.model_ref().to_string()).collect(),
            entries: snapshot.iter().map(|(_, e)| e.info(max_failures)).collect(),
        }
    }

    /// Zero all counters; resident engines are untouched
    pub fn reset_stats(&self) {
        self.inner.state.lock().counters = PoolCounters::default();
        debug!("Engine pool counters reset");
    }

    /// Run one health sweep now, independent of the watchdog schedule
    pub async fn check_health(&self) -> SweepReport {
        self.inner.sweep().await
    }

    /// Attach benchmark figures to every resident engine of `model_ref`
    ///
    /// Returns false when the model is not resident.
    pub fn record_benchmark<I>(&self, model_ref: &str, tokens_per_second: f64, extra: I) -> bool
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let entries: Vec<Arc<Entry>> = {
            let state = self.inner.state.lock();
            state
                .store
                .iter()
                .filter(|(k, _)| k.model_ref() == model_ref)
                .map(|(_, e)| Arc::clone(e))
                .collect()
        };
        if entries.is_empty() {
            return false;
        }

        let mut figures = vec![("tokens_per_second".to_string(), tokens_per_second)];
        figures.extend(extra);

        for entry in entries {
            for (name, value) in &figures {
                metrics::record_benchmark(model_ref, entry.engine().kind(), name, *value);
            }
            entry.record_benchmarks(figures.clone());
        }
        true
    }

    /// Stop the watchdog and unload everything; later `get`s fail
    pub async fn shutdown(&self) {
        info!("Shutting down engine pool");
        self.inner.state.lock().closed = true;
        self.inner.watchdog.stop();
        self.clear().await;
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().store.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.inner.state.lock().store.capacity()
    }

    /// Whether any engine for `model_ref` is resident
    pub fn contains(&self, model_ref: &str) -> bool {
        let state = self.inner.state.lock();
        let found = state.store.iter().any(|(k, _)| k.model_ref() == model_ref);
        found
    }

    pub fn watchdog_running(&self) -> bool {
        self.inner.watchdog.is_running()
    }

    #[cfg(test)]
    pub(crate) fn is_loading(&self, key: &EngineKey) -> bool {
        self.inner.state.lock().is_busy(key)
    }
}

impl PoolInner {
    /// Register an in-flight marker for `key` and load it in a separate task
    fn start_load(
        self: &Arc<Self>,
        state: &mut PoolState,
        key: EngineKey,
        options: LoadOptions,
    ) -> PendingLoad {
        let inner = Arc::clone(self);
        let task_key = key.clone();
        state.begin(&key, None, move |id| inner.load_and_insert(task_key, options, id))
    }

    async fn load_and_insert(
        self: Arc<Self>,
        key: EngineKey,
        options: LoadOptions,
        marker: u64,
    ) -> Result<Arc<dyn Engine>> {
        let loaded = self.create_and_load(&key, &options).await;

        let mut state = self.state.lock();
        state.finish(&key, marker);

        let (engine, elapsed) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Failed to load engine {}: {}", key, e);
                return Err(e);
            }
        };

        if state.closed {
            drop(state);
            self.executor.submit_unload(&key, engine);
            return Err(PoolError::ShutDown);
        }

        let entry = Arc::new(Entry::new(key.clone(), Arc::clone(&engine), options, elapsed));
        let evicted = state.store.put(key.clone(), entry);
        state.counters.loaded(key.model_ref(), engine.kind(), elapsed);
        self.release(&mut state, evicted);
        drop(state);

        info!("Loaded engine {} in {:.2}s", key, elapsed.as_secs_f64());
        if self.config.watchdog.enabled {
            self.watchdog.ensure_running(&self, self.config.watchdog.interval());
        }
        Ok(engine)
    }

    async fn create_and_load(
        &self,
        key: &EngineKey,
        options: &LoadOptions,
    ) -> Result<(Arc<dyn Engine>, Duration)> {
        let engine = self
            .factory
            .create(key)
            .map_err(|e| PoolError::load(key.model_ref(), e))?;
        let elapsed = self.run_load(key, &engine, options).await?;
        Ok((engine, elapsed))
    }

    /// Load `engine` on the executor under the configured deadline
    ///
    /// The deadline includes time queued for a worker. A load still queued
    /// when it passes never starts; one already running is left to finish
    /// and its engine is unloaded afterwards.
    pub(crate) async fn run_load(
        &self,
        key: &EngineKey,
        engine: &Arc<dyn Engine>,
        options: &LoadOptions,
    ) -> Result<Duration> {
        let limit = self.config.load_timeout();
        let started = Instant::now();

        let task_engine = Arc::clone(engine);
        let task_ref = key.model_ref().to_string();
        let task_options = options.clone();
        let cancel = CancellationToken::new();
        let mut handle = self.executor.spawn_cancellable(
            move || task_engine.load(&task_ref, &task_options),
            cancel.clone(),
        );

        match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(Ok(()))) => Ok(started.elapsed()),
            Ok(Ok(Err(e))) => Err(PoolError::load(key.model_ref(), e)),
            Ok(Err(failed)) => Err(PoolError::load(
                key.model_ref(),
                LoadFailure::Aborted(failed.to_string()),
            )),
            Err(_) => {
                cancel.cancel();
                warn!("Load of {} exceeded {:?}", key, limit);
                let executor = self.executor.clone();
                let stray_key = key.clone();
                let stray = Arc::clone(engine);
                tokio::spawn(async move {
                    match handle.await {
                        Err(TaskFailed::Cancelled) => {
                            debug!("Timed-out load of {} was skipped before starting", stray_key)
                        }
                        _ => {
                            let _ = executor.submit_unload(&stray_key, stray).await;
                        }
                    }
                });
                Err(PoolError::load(key.model_ref(), LoadFailure::Timeout(limit)))
            }
        }
    }

    /// Probe `engine` under the health deadline; timeouts count as unhealthy
    pub(crate) async fn probe(&self, key: &EngineKey, engine: &Arc<dyn Engine>) -> bool {
        let engine = Arc::clone(engine);
        let probe = tokio::task::spawn_blocking(move || engine.health());

        let healthy = match tokio::time::timeout(self.config.health_timeout(), probe).await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(e)) => {
                warn!("Health probe for {} panicked: {}", key, e);
                false
            }
            Err(_) => {
                warn!("Health probe for {} timed out", key);
                false
            }
        };

        self.state.lock().counters.probed(key.model_ref(), healthy);
        healthy
    }

    fn remove_keys(&self, state: &mut PoolState, keys: Vec<EngineKey>) -> bool {
        let removed: Vec<(EngineKey, Arc<Entry>)> = keys
            .into_iter()
            .filter_map(|key| state.store.remove(&key).map(|entry| (key, entry)))
            .collect();

        let found = !removed.is_empty();
        self.release(state, removed);
        found
    }

    /// Unload entries that just left the store
    ///
    /// Returned futures resolve when each engine is unloaded; dropping them
    /// leaves the unloads running in the background.
    fn release(&self, state: &mut PoolState, removed: Vec<(EngineKey, Arc<Entry>)>) -> Vec<Release> {
        state.counters.unloaded(removed.len());
        metrics::record_pool_size(state.store.len(), state.store.capacity());

        removed
            .into_iter()
            .map(|(key, entry)| match state.detach_restart(&key, &entry) {
                Some(restart) => {
                    info!("Engine {} left the pool mid-restart, unloading after it", key);
                    restart.map(|_| ()).boxed()
                }
                None => {
                    info!("Evicting engine {} from pool", key);
                    self.executor
                        .submit_unload(&key, Arc::clone(entry.engine()))
                        .map(|_| ())
                        .boxed()
                }
            })
            .collect()
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.watchdog.stop();
        let state = self.state.get_mut();
        for (key, entry) in state.store.drain() {
            debug!("Unloading engine {} on pool drop", key);
            self.executor.submit_unload(&key, Arc::clone(entry.engine()));
        }
    }
}

/// Turn a load task into a future every waiter can clone
fn shared_outcome(model_ref: &str, handle: JoinHandle<Result<Arc<dyn Engine>>>) -> PendingLoad {
    let model_ref = model_ref.to_string();
    handle
        .map(move |joined| {
            joined.unwrap_or_else(|e| Err(PoolError::load(model_ref, LoadFailure::Aborted(e.to_string()))))
        })
        .boxed()
        .shared()
}
