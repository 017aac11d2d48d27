//! Type-erased jobs and their replies.
//!
//! A [`Job`] carries a caller's task to a worker thread. Its result travels
//! back over a oneshot channel as an [`Execution`]. The reply half is owned by
//! the job itself, so a job that is dropped without being run (for example,
//! because the worker was stopped while the job sat in its queue) still
//! answers: it sends [`Execution::Abandoned`] from its `Drop` impl. A waiter is
//! therefore never left hanging, and never mistakes an abandoned job for a task
//! that legitimately returned a zero value.

use core::panic::AssertUnwindSafe;
use std::{any::Any, panic};
use tokio::sync::oneshot;

pub(crate) type PanicPayload = Box<dyn Any + Send + 'static>;

/// The outcome of submitting a task to a worker.
pub(crate) enum Execution<R> {
    /// The task ran to completion and produced this value.
    Completed(R),
    /// The task panicked on the worker thread.
    Panicked(PanicPayload),
    /// The task never ran: the result path was torn down first.
    Abandoned,
}

/// Reply half of a job. Delivers exactly one [`Execution`].
struct Reply<R> {
    tx: Option<oneshot::Sender<Execution<R>>>,
}

impl<R> Reply<R> {
    fn deliver(mut self, execution: Execution<R>) {
        if let Some(tx) = self.tx.take() {
            // The caller may have given up on the result.
            let _ = tx.send(execution);
        }
    }
}

impl<R> Drop for Reply<R> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Execution::Abandoned);
        }
    }
}

/// A task packaged for execution on a worker thread.
pub(crate) struct Job {
    run: Box<dyn FnOnce() + Send + 'static>,
}

impl Job {
    /// Wraps `task` and returns the job along with the receiver its
    /// [`Execution`] will arrive on.
    pub(crate) fn new<F, R>(task: F) -> (Self, Pending<R>)
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let reply = Reply { tx: Some(tx) };

        let run = Box::new(move || {
            let execution = match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(value) => Execution::Completed(value),
                Err(payload) => Execution::Panicked(payload),
            };
            reply.deliver(execution);
        });

        (Self { run }, Pending { rx })
    }

    /// Runs the task on the current thread and sends its result.
    pub(crate) fn run(self) {
        (self.run)();
    }
}

/// Receiving half of a job.
pub(crate) struct Pending<R> {
    rx: oneshot::Receiver<Execution<R>>,
}

impl<R> Pending<R> {
    /// Waits for the job's [`Execution`].
    ///
    /// A closed channel without a message is reported as
    /// [`Execution::Abandoned`] as well.
    pub(crate) async fn wait(self) -> Execution<R> {
        self.rx.await.unwrap_or(Execution::Abandoned)
    }
}
