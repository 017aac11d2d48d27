//! Error types for the pinned thread pool.
//!
//! Two families of errors exist:
//!
//! - [`Error`] is returned while building a pool or starting a worker. When it
//!   is returned, no pool exists and no worker thread has been left running.
//! - [`CallError`] is returned by [`crate::ThreadPool::call`] and
//!   [`crate::Worker::call`]. The pool itself only ever produces
//!   [`CallError::PoolStopped`]; every other failure is the submitted task's own
//!   error, passed through untouched in [`CallError::Task`].

/// A construction-time error.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A pool needs at least one worker.
    #[error("thread pool size must be greater than 0")]
    EmptyPool,

    /// At least one parallel execution context must stay free for the rest of
    /// the process.
    #[error(
        "thread pool size {requested} must be less than the available parallelism ({available})"
    )]
    TooManyThreads { requested: usize, available: usize },

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The error returned by a call submitted to a worker or pool.
///
/// `PoolStopped` never wraps a task error: it always means the task was never
/// run, or that its result could not be delivered because the worker was torn
/// down. A stopped pool never resumes, so retrying against the same pool is
/// pointless.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError<E> {
    /// The call was not serviced because shutdown has begun or completed.
    #[error("thread pool stopped")]
    PoolStopped,

    /// The task ran and returned this error.
    #[error(transparent)]
    Task(E),
}

impl<E> CallError<E> {
    /// Returns `true` if the call was refused or abandoned due to shutdown.
    pub const fn is_pool_stopped(&self) -> bool {
        matches!(self, Self::PoolStopped)
    }

    /// Returns the task's own error, if the task ran and failed.
    pub fn into_task_error(self) -> Option<E> {
        match self {
            Self::PoolStopped => None,
            Self::Task(err) => Some(err),
        }
    }
}
