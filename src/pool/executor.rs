// src/pool/executor.rs
//! Bounded executor for blocking engine operations
//!
//! `load` and `unload` can block for minutes. They run on tokio's blocking
//! thread pool, but at most `workers` at a time: a semaphore gates entry the
//! same way the agent pool gates process acquisition.
//!
//! A queued task can be cancelled until it gets a worker. Once running it
//! always finishes; blocking engine calls cannot be interrupted.

use crate::engine::{Engine, EngineKey};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A task that did not run to completion
#[derive(Debug, Clone, Error)]
pub enum TaskFailed {
    /// The blocking closure panicked
    #[error("worker task failed: {0}")]
    Panicked(String),

    /// Cancelled while waiting for a worker; the closure never ran
    #[error("task cancelled before it started")]
    Cancelled,
}

/// Handle to a task running on the executor
///
/// Dropping the handle detaches the task; it still runs to completion.
pub struct TaskHandle<T> {
    inner: JoinHandle<Result<T, TaskFailed>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskFailed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match ready!(Pin::new(&mut this.inner).poll(cx)) {
            Ok(result) => Poll::Ready(result),
            Err(e) => Poll::Ready(Err(TaskFailed::Panicked(e.to_string()))),
        }
    }
}

/// Semaphore-bounded pool of blocking workers
#[derive(Clone)]
pub struct LoadExecutor {
    runtime: Handle,
    permits: Arc<Semaphore>,
    workers: usize,
    pending: Arc<AtomicUsize>,
}

impl LoadExecutor {
    /// Create an executor running at most `workers` blocking tasks at once
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime. Tasks are spawned on that
    /// runtime, so submitting work later does not need one.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        debug!("Load executor initialized with {} workers", workers);

        Self {
            runtime: Handle::current(),
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Tasks submitted but not yet finished (queued or running)
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Run `task` on a blocking worker once a slot is free
    pub fn spawn<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_cancellable(task, CancellationToken::new())
    }

    /// Like [`spawn`](Self::spawn), but skipped if `cancel` fires before a
    /// worker picks it up
    pub fn spawn_cancellable<F, T>(&self, task: F, cancel: CancellationToken) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let pending = Arc::clone(&self.pending);
        pending.fetch_add(1, Ordering::SeqCst);

        let inner = self.runtime.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TaskFailed::Cancelled),
                // The semaphore is never closed
                permit = permits.acquire_owned() => {
                    let _permit = permit.ok();
                    if cancel.is_cancelled() {
                        Err(TaskFailed::Cancelled)
                    } else {
                        tokio::task::spawn_blocking(task)
                            .await
                            .map_err(|e| TaskFailed::Panicked(e.to_string()))
                    }
                }
            };
            pending.fetch_sub(1, Ordering::SeqCst);
            result
        });

        TaskHandle { inner }
    }

    /// Unload `engine` in the background, logging the outcome
    pub fn submit_unload(&self, key: &EngineKey, engine: Arc<dyn Engine>) -> TaskHandle<()> {
        let label = key.to_string();
        self.spawn(move || match engine.unload() {
            Ok(()) => info!("Unloaded engine {}", label),
            Err(e) => warn!("Failed to unload engine {}: {}", label, e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let executor = LoadExecutor::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                executor.spawn(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(executor.pending(), 0);
    }

    #[tokio::test]
    async fn test_returns_value() {
        let executor = LoadExecutor::new(1);
        let value = executor.spawn(|| 21 * 2).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let executor = LoadExecutor::new(1);
        let result = executor.spawn(|| panic!("backend crashed")).await;
        assert!(result.is_err());

        // The worker slot is released after a panic
        assert_eq!(executor.spawn(|| 1).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_task_never_runs() {
        let executor = LoadExecutor::new(1);
        let ran = Arc::new(AtomicUsize::new(0));

        let started = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&started);
        let busy = executor.spawn(move || {
            flag.store(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
        });
        while started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let cancel = CancellationToken::new();
        let counter = Arc::clone(&ran);
        let queued = executor.spawn_cancellable(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            cancel.clone(),
        );

        cancel.cancel();
        assert!(matches!(queued.await, Err(TaskFailed::Cancelled)));
        busy.await.unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(executor.pending(), 0);
    }

    #[tokio::test]
    async fn test_submit_unload() {
        let executor = LoadExecutor::new(1);
        let engine = Arc::new(MockEngine::new());

        executor
            .submit_unload(&EngineKey::bare("m"), engine.clone())
            .await
            .unwrap();
        assert_eq!(engine.unload_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_workers_clamped() {
        assert_eq!(LoadExecutor::new(0).workers(), 1);
    }
}
