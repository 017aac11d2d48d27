//! Fixed-size pool of pinned workers.
//!
//! This module defines the [`ThreadPool`] struct, which multiplexes N
//! [`Worker`]s behind a single [`ThreadPool::call`] entry point. Idle workers
//! sit on a stack guarded by a semaphore with one permit per worker, so the
//! number of permits is the pool's availability. A call borrows a worker for
//! exactly as long as its task runs and always gives it back, whatever the
//! outcome. The borrow travels with the task, so a caller that stops waiting
//! (a timeout, a dropped future) leaves the worker borrowed until its task has
//! actually returned.
//!
//! Shutdown is coordinated through a [`CancellationToken`]: once it fires, no
//! call acquires a worker anymore. [`ThreadPool::stop_and_wait`] then waits for
//! every borrowed worker to come back, stops and joins each one, and only then
//! reports the pool as stopped.

use crate::{CallError, Error, NoopMetrics, PoolConfig, PoolMetrics, Worker};
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// A fixed-size pool of workers, each pinned to its own OS thread.
///
/// The pool is meant to be shared (typically behind an [`Arc`]) by every task
/// of an async service that needs to run thread-affine or blocking work.
///
/// # Example
/// ```
/// use pinpool::{PoolConfig, ThreadPool};
/// use std::convert::Infallible;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = ThreadPool::with_config(PoolConfig::new(1).with_parallelism(2))?;
///
/// let value = pool.call(|| Ok::<_, Infallible>(21 * 2)).await?;
/// assert_eq!(value, 42);
///
/// pool.stop_and_wait().await;
/// assert!(pool.call(|| Ok::<_, Infallible>(0)).await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct ThreadPool {
    idle: Arc<Mutex<Vec<Arc<Worker>>>>,
    available: Arc<Semaphore>,
    size: usize,
    stop: CancellationToken,
    stopped: CancellationToken,
    draining: AtomicBool,
    metrics: Arc<dyn PoolMetrics>,
}

impl core::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("size", &self.size)
            .field("idle", &self.idle_workers())
            .field("stopping", &self.is_stopping())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl ThreadPool {
    /// Creates a pool of `num_threads` workers, validated against the host's
    /// CPU count.
    ///
    /// # Errors
    ///
    /// See [`ThreadPool::with_config`].
    pub fn new(num_threads: usize) -> Result<Self, Error> {
        Self::with_config(PoolConfig::new(num_threads))
    }

    /// Creates a pool from `config` without metrics.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyPool`] or [`Error::TooManyThreads`] if the size is
    ///   invalid (see [`PoolConfig::validate`]).
    /// - [`Error::Spawn`] if a worker thread could not be created. Workers that
    ///   were already started are stopped and joined first.
    pub fn with_config(config: PoolConfig) -> Result<Self, Error> {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Creates a pool that reports to `metrics`.
    ///
    /// # Errors
    ///
    /// See [`ThreadPool::with_config`].
    pub fn with_metrics(config: PoolConfig, metrics: Arc<dyn PoolMetrics>) -> Result<Self, Error> {
        Self::build(config, metrics, CancellationToken::new())
    }

    /// Creates a pool whose stop signal is a child of `parent`.
    ///
    /// Cancelling `parent` makes every later call fail with
    /// [`CallError::PoolStopped`]. The workers keep running until
    /// [`ThreadPool::stop_and_wait`] is called (or the pool is dropped).
    ///
    /// # Errors
    ///
    /// See [`ThreadPool::with_config`].
    pub fn with_parent_token(
        config: PoolConfig,
        metrics: Arc<dyn PoolMetrics>,
        parent: &CancellationToken,
    ) -> Result<Self, Error> {
        Self::build(config, metrics, parent.child_token())
    }

    fn build(
        config: PoolConfig,
        metrics: Arc<dyn PoolMetrics>,
        stop: CancellationToken,
    ) -> Result<Self, Error> {
        config.validate()?;

        let size = config.num_threads();
        let mut workers: Vec<Arc<Worker>> = Vec::with_capacity(size);

        for id in 0..size {
            let worker = Worker::new(id, &config);
            if let Err(err) = worker.start() {
                #[cfg(feature = "tracing")]
                tracing::warn!("Tearing down {} started workers: {err}", workers.len());

                for started in &workers {
                    started.stop();
                }
                for started in &workers {
                    started.join_blocking();
                }
                return Err(err);
            }
            workers.push(Arc::new(worker));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Started {size} pinned workers ({}-0..{})",
            config.thread_name(),
            size - 1
        );

        Ok(Self {
            idle: Arc::new(Mutex::new(workers)),
            available: Arc::new(Semaphore::new(size)),
            size,
            stop,
            stopped: CancellationToken::new(),
            draining: AtomicBool::new(false),
            metrics,
        })
    }

    /// Number of workers the pool was created with.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Number of workers currently waiting for work.
    pub fn idle_workers(&self) -> usize {
        self.idle.lock().len()
    }

    /// `true` once shutdown has begun. Calls fail fast from this point on.
    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// `true` once every worker has been stopped and joined.
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Runs `task` on an idle worker's thread and waits for its result.
    ///
    /// Waits for a worker if all of them are busy. Which worker runs the task
    /// is unspecified, so tasks submitted concurrently may complete in any
    /// order.
    ///
    /// # Errors
    ///
    /// - [`CallError::PoolStopped`] if shutdown began before a worker was
    ///   acquired.
    /// - [`CallError::Task`] with the task's own error, unchanged.
    ///
    /// # Panics
    ///
    /// A panic inside `task` is resumed on the caller. The worker goes back to
    /// the pool and stays usable.
    pub async fn call<F, T, E>(&self, task: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        if self.stop.is_cancelled() {
            return Err(CallError::PoolStopped);
        }

        let start = Instant::now();
        let lease = tokio::select! {
            biased;
            () = self.stop.cancelled() => None,
            lease = self.lease() => lease,
        };
        let Some(lease) = lease else {
            return Err(CallError::PoolStopped);
        };
        self.metrics.record_wait(start.elapsed());

        // Released on the worker thread once the task returns, in field order:
        // the task stops counting as in flight before its worker is handed out.
        let worker = Arc::clone(&lease.worker);
        let in_flight = InFlight::enter(Arc::clone(&self.metrics));
        let result = worker.call_holding(task, (in_flight, lease)).await;

        self.metrics.record_call(start.elapsed());
        result
    }

    /// Borrows an idle worker. `None` once the pool has been drained.
    async fn lease(&self) -> Option<Lease> {
        let permit = Arc::clone(&self.available).acquire_owned().await.ok()?;
        let worker = self.idle.lock().pop()?;

        Some(Lease {
            idle: Arc::clone(&self.idle),
            worker,
            _permit: permit,
        })
    }

    /// Stops the pool and waits until every worker has exited.
    ///
    /// The first call fires the stop signal, waits for all borrowed workers to
    /// be returned (so in-flight tasks finish and deliver their results), then
    /// stops and joins each worker. Later or concurrent calls wait for that
    /// same drain to finish. The drain happens exactly once.
    ///
    /// The first caller's future must be driven to completion; dropping it
    /// part-way leaves the other waiters pending.
    pub async fn stop_and_wait(&self) {
        self.stop.cancel();

        if self.draining.swap(true, Ordering::AcqRel) {
            self.stopped.cancelled().await;
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining thread pool ({} of {} workers busy)",
            self.size - self.idle_workers(),
            self.size
        );

        // Holding every permit means every worker is back on the idle stack.
        let mut permits = Vec::with_capacity(self.size);
        for _ in 0..self.size {
            match self.available.acquire().await {
                Ok(permit) => permits.push(permit),
                Err(_) => break,
            }
        }

        let workers = core::mem::take(&mut *self.idle.lock());
        for worker in &workers {
            worker.stop();
        }
        for worker in &workers {
            worker.join().await;

            #[cfg(feature = "tracing")]
            tracing::trace!("Worker {} joined after {} tasks", worker.id(), worker.tasks_run());
        }

        self.available.close();
        drop(permits);
        self.stopped.cancel();

        #[cfg(feature = "tracing")]
        tracing::info!("Thread pool shutdown complete");
    }
}

/// A worker borrowed from the idle stack. Returned on drop.
struct Lease {
    idle: Arc<Mutex<Vec<Arc<Worker>>>>,
    worker: Arc<Worker>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Lease {
    fn drop(&mut self) {
        // Pushed back before the permit is released (fields drop after this).
        self.idle.lock().push(Arc::clone(&self.worker));
    }
}

/// Counts a task as in flight until it has returned (or was never run).
struct InFlight(Arc<dyn PoolMetrics>);

impl InFlight {
    fn enter(metrics: Arc<dyn PoolMetrics>) -> Self {
        metrics.task_started();
        Self(metrics)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.task_finished();
    }
}
