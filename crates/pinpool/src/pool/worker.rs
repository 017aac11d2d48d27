use crate::{
    CallError, Error, PoolConfig,
    pool::job::{Execution, Job},
};
use parking_lot::Mutex;
use std::{
    panic,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a [`Worker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, no thread spawned yet.
    Created,
    /// The run loop is accepting tasks.
    Running,
    /// Stop was requested; the run loop is finishing its current task.
    Stopping,
    /// The run loop has exited.
    Stopped,
}

/// A task executor bound to a single dedicated OS thread.
///
/// Every task a worker runs executes on the same thread, for the whole life of
/// the worker. This is what makes it safe to call code that keeps thread-local
/// or thread-affine native state, and what keeps blocking I/O off the async
/// scheduler.
///
/// A worker runs at most one task at a time. Concurrent [`Worker::call`]s on
/// the same worker are serialized: the second waits until the first has its
/// result.
///
/// Dropping a worker closes its submission channel, which also ends the run
/// loop once the current task is done.
pub struct Worker {
    id: usize,
    name: String,
    stack_size: Option<usize>,
    submit: mpsc::Sender<Job>,
    inbox: Mutex<Option<mpsc::Receiver<Job>>>,
    slot: tokio::sync::Mutex<()>,
    stop: CancellationToken,
    exited: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    tasks_run: Arc<AtomicU64>,
}

impl core::fmt::Debug for Worker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("tasks_run", &self.tasks_run())
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Creates a worker in the [`WorkerState::Created`] state. Its thread is
    /// named after the config's thread name prefix and `id`.
    pub fn new(id: usize, config: &PoolConfig) -> Self {
        let (submit, inbox) = mpsc::channel(1);

        Self {
            id,
            name: config.worker_thread_name(id),
            stack_size: config.stack_size(),
            submit,
            inbox: Mutex::new(Some(inbox)),
            slot: tokio::sync::Mutex::new(()),
            stop: CancellationToken::new(),
            exited: CancellationToken::new(),
            handle: Mutex::new(None),
            tasks_run: Arc::new(AtomicU64::new(0)),
        }
    }

    pub const fn id(&self) -> usize {
        self.id
    }

    /// Name of the worker's OS thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of tasks this worker has picked up.
    pub fn tasks_run(&self) -> u64 {
        self.tasks_run.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> WorkerState {
        if self.exited.is_cancelled() {
            WorkerState::Stopped
        } else if self.stop.is_cancelled() {
            WorkerState::Stopping
        } else if self.inbox.lock().is_some() {
            WorkerState::Created
        } else {
            WorkerState::Running
        }
    }

    /// Spawns the worker's thread and starts its run loop.
    ///
    /// Does nothing if the worker was already started or stopped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the OS refuses to create the thread. The
    /// worker is then [`WorkerState::Stopped`].
    pub fn start(&self) -> Result<(), Error> {
        let Some(inbox) = self.inbox.lock().take() else {
            return Ok(());
        };

        let id = self.id;
        let stop = self.stop.clone();
        let exited = self.exited.clone();
        let tasks_run = Arc::clone(&self.tasks_run);

        let mut builder = thread::Builder::new().name(self.name.clone());
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }

        match builder.spawn(move || run_loop(id, inbox, stop, exited, tasks_run)) {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to spawn worker {id}: {err}");

                self.stop.cancel();
                self.exited.cancel();
                Err(Error::Spawn(err))
            }
        }
    }

    /// Runs `task` on this worker's thread and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`CallError::PoolStopped`] if the worker has been asked to stop, or if
    ///   it stopped before the task could run.
    /// - [`CallError::Task`] with the task's own error if it ran and failed.
    ///
    /// # Panics
    ///
    /// If `task` panics, the panic is resumed on the caller. The worker itself
    /// survives and keeps serving calls.
    pub async fn call<F, T, E>(&self, task: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.call_holding(task, ()).await
    }

    /// Like [`Worker::call`], but keeps `held` alive until `task` has returned
    /// on the worker thread, even if the caller stops waiting first. If the
    /// task never runs, `held` is dropped along with it.
    pub(crate) async fn call_holding<F, T, E, G>(
        &self,
        task: F,
        held: G,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        G: Send + 'static,
    {
        if self.stop.is_cancelled() {
            return Err(CallError::PoolStopped);
        }

        // Held until the result arrives, so at most one task is in flight.
        let _slot = tokio::select! {
            biased;
            () = self.stop.cancelled() => return Err(CallError::PoolStopped),
            guard = self.slot.lock() => guard,
        };

        let (job, pending) = Job::new(move || {
            let _held = held;
            task()
        });
        if self.submit.send(job).await.is_err() {
            return Err(CallError::PoolStopped);
        }

        match pending.wait().await {
            Execution::Completed(result) => result.map_err(CallError::Task),
            Execution::Panicked(payload) => panic::resume_unwind(payload),
            Execution::Abandoned => Err(CallError::PoolStopped),
        }
    }

    /// Asks the run loop to exit after its current task. Never blocks; calling
    /// it again has no further effect.
    pub fn stop(&self) {
        self.stop.cancel();

        // Never started: nothing will ever drain the inbox, so drop it here.
        // Queued jobs are abandoned as they are dropped.
        if let Some(mut inbox) = self.inbox.lock().take() {
            inbox.close();
            while let Ok(job) = inbox.try_recv() {
                drop(job);
            }
            self.exited.cancel();
        }
    }

    /// Waits until the run loop has exited and reclaims its thread.
    ///
    /// Only returns once [`Worker::stop`] was called (or the worker failed to
    /// start). Inside a tokio runtime the OS-level join runs on the blocking
    /// pool, since thread-local destructors may still be running on the
    /// worker thread after its run loop has exited.
    pub async fn join(&self) {
        self.exited.cancelled().await;

        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let joined = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => matches!(
                runtime.spawn_blocking(move || handle.join()).await,
                Ok(Ok(()))
            ),
            Err(_) => handle.join().is_ok(),
        };
        self.report_join(joined);
    }

    /// Joins the worker thread, blocking the current thread until it exits.
    pub(crate) fn join_blocking(&self) {
        if let Some(handle) = self.handle.lock().take() {
            self.report_join(handle.join().is_ok());
        }
    }

    fn report_join(&self, _joined: bool) {
        #[cfg(feature = "tracing")]
        if !_joined {
            tracing::error!("Worker {} thread panicked", self.id);
        }
    }
}

/// Body of a worker thread.
///
/// Waits for either the stop signal or a job, biased toward stop. Jobs run
/// synchronously here, so every task sees the same OS thread.
fn run_loop(
    _id: usize,
    mut inbox: mpsc::Receiver<Job>,
    stop: CancellationToken,
    exited: CancellationToken,
    tasks_run: Arc<AtomicU64>,
) {
    // Fires even if the loop unwinds.
    let _exited = exited.drop_guard();

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {_id} started");

    while let Some(job) = futures::executor::block_on(next_job(&mut inbox, &stop)) {
        tasks_run.fetch_add(1, Ordering::Relaxed);
        job.run();
    }

    // Tear down the result path: reject new submissions, then answer every
    // queued job with `Abandoned` by dropping it.
    inbox.close();
    let mut _abandoned = 0_usize;
    while let Ok(job) = inbox.try_recv() {
        drop(job);
        _abandoned += 1;
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {_id} stopped ({_abandoned} queued jobs abandoned)");
}

async fn next_job(inbox: &mut mpsc::Receiver<Job>, stop: &CancellationToken) -> Option<Job> {
    tokio::select! {
        biased;
        () = stop.cancelled() => None,
        job = inbox.recv() => job,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use std::{
        cell::{Cell, RefCell},
        convert::Infallible,
        thread::ThreadId,
    };

    fn config() -> PoolConfig {
        PoolConfig::new(1).with_thread_name("test-worker")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_task_on_its_thread() {
        let worker = Worker::new(0, &config());
        assert_eq!(worker.state(), WorkerState::Created);
        worker.start().unwrap();
        assert_eq!(worker.state(), WorkerState::Running);

        let name = worker
            .call(|| Ok::<_, Infallible>(thread::current().name().map(str::to_owned)))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("test-worker-0"));
        assert_eq!(worker.tasks_run(), 1);

        worker.stop();
        worker.join().await;
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sequential_tasks_share_one_thread() {
        thread_local! {
            static CALLS: Cell<u32> = const { Cell::new(0) };
        }

        let worker = Worker::new(0, &config());
        worker.start().unwrap();

        let first: (ThreadId, u32) = worker
            .call(|| {
                let calls = CALLS.with(|c| {
                    c.set(c.get() + 1);
                    c.get()
                });
                Ok::<_, Infallible>((thread::current().id(), calls))
            })
            .await
            .unwrap();
        tokio::task::yield_now().await;
        let second: (ThreadId, u32) = worker
            .call(|| {
                let calls = CALLS.with(|c| {
                    c.set(c.get() + 1);
                    c.get()
                });
                Ok::<_, Infallible>((thread::current().id(), calls))
            })
            .await
            .unwrap();

        assert_eq!(first.0, second.0);
        assert_ne!(first.0, thread::current().id());
        // Thread-local state carried over between the two calls.
        assert_eq!((first.1, second.1), (1, 2));

        worker.stop();
        worker.join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn zero_value_is_not_pool_stopped() {
        let worker = Worker::new(0, &config());
        worker.start().unwrap();

        let value = worker.call(|| Ok::<_, Infallible>(0_i64)).await;
        assert_eq!(value, Ok(0));

        let value = worker.call(|| Ok::<_, Infallible>(())).await;
        assert_eq!(value, Ok(()));

        worker.stop();
        worker.join().await;

        let value = worker.call(|| Ok::<_, Infallible>(0_i64)).await;
        assert_eq!(value, Err(CallError::PoolStopped));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn task_error_passes_through() {
        let worker = Worker::new(0, &config());
        worker.start().unwrap();

        let result = worker.call(|| Err::<u8, _>("bad offset")).await;
        assert_eq!(result, Err(CallError::Task("bad offset")));

        worker.stop();
        worker.join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stopped_worker_rejects_calls() {
        let worker = Worker::new(0, &config());
        worker.start().unwrap();
        worker.stop();
        worker.join().await;

        let result = worker.call(|| Ok::<_, Infallible>(42)).await;
        assert_eq!(result, Err(CallError::PoolStopped));
        assert_eq!(worker.tasks_run(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_before_start_is_immediately_stopped() {
        let worker = Worker::new(0, &config());
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopped);

        // Starting afterwards spawns nothing.
        worker.start().unwrap();
        worker.join().await;
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queued_job_is_abandoned_on_stop() {
        // Not started: the job sits in the inbox until the worker is stopped,
        // which tears down the result path without running it.
        let worker = Arc::new(Worker::new(0, &config()));

        let caller = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.call(|| Ok::<_, Infallible>(42)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.stop();

        let result = caller.await.unwrap();
        assert_eq!(result, Err(CallError::PoolStopped));
        assert_eq!(worker.tasks_run(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_are_serialized() {
        let worker = Arc::new(Worker::new(0, &config()));
        worker.start().unwrap();

        let active = Arc::new(AtomicU64::new(0));
        let overlap = Arc::new(AtomicU64::new(0));

        let calls = (0..4).map(|_| {
            let worker = Arc::clone(&worker);
            let active = Arc::clone(&active);
            let overlap = Arc::clone(&overlap);
            async move {
                worker
                    .call(move || {
                        if active.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlap.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(20));
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, Infallible>(())
                    })
                    .await
            }
        });

        for result in futures::future::join_all(calls).await {
            result.unwrap();
        }

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        assert_eq!(worker.tasks_run(), 4);

        worker.stop();
        worker.join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_is_resumed_and_worker_survives() {
        let worker = Arc::new(Worker::new(0, &config()));
        worker.start().unwrap();

        let panicking = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
                worker
                    .call(|| -> Result<u8, Infallible> { panic!("corrupt block") })
                    .await
            })
        };
        let err = panicking.await.unwrap_err();
        assert!(err.is_panic());

        let value = worker.call(|| Ok::<_, Infallible>(7)).await;
        assert_eq!(value, Ok(7));

        worker.stop();
        worker.join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_in_flight_task() {
        let worker = Arc::new(Worker::new(0, &config()));
        worker.start().unwrap();

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let caller = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
                worker
                    .call(move || {
                        let _ = started_tx.send(());
                        thread::sleep(Duration::from_millis(100));
                        Ok::<_, Infallible>("done")
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopping);
        worker.join().await;

        assert_eq!(caller.await.unwrap(), Ok("done"));
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn join_keeps_runtime_responsive_during_thread_teardown() {
        struct SlowTeardown;

        impl Drop for SlowTeardown {
            fn drop(&mut self) {
                thread::sleep(Duration::from_millis(200));
            }
        }

        thread_local! {
            static TEARDOWN: RefCell<Option<SlowTeardown>> = const { RefCell::new(None) };
        }

        let worker = Worker::new(0, &config());
        worker.start().unwrap();
        // Runs after the run loop has exited, while the OS thread winds down.
        worker
            .call(|| {
                TEARDOWN.with(|t| *t.borrow_mut() = Some(SlowTeardown));
                Ok::<_, Infallible>(())
            })
            .await
            .unwrap();

        let ticks = Arc::new(AtomicU64::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        worker.stop();
        worker.join().await;
        ticker.abort();

        // A join that blocked the only runtime thread would starve the ticker.
        assert!(ticks.load(Ordering::SeqCst) >= 5);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }
}
