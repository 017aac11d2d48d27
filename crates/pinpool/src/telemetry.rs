//! Observability sink for the thread pool.
//!
//! The pool does not register instruments globally. Instead, a [`PoolMetrics`]
//! implementation is handed to [`crate::ThreadPool::with_metrics`]:
//!
//! - [`NoopMetrics`] discards everything (the default).
//! - `OtelMetrics` (behind the `metrics` feature) records OpenTelemetry
//!   instruments created from a caller-supplied [`opentelemetry::metrics::Meter`].
//!
//! Every serviced call produces one wait measurement, one total duration
//! measurement, and a matched `task_started`/`task_finished` pair. None of these
//! influence scheduling.

use core::time::Duration;

/// Recorder for the pool's instruments.
pub trait PoolMetrics: Send + Sync {
    /// Time a call spent waiting for an idle worker.
    fn record_wait(&self, elapsed: Duration);

    /// Total time of a call, from submission until its result was available.
    fn record_call(&self, elapsed: Duration);

    /// A task was handed to a worker.
    fn task_started(&self);

    /// A task handed to a worker has returned (or its caller went away).
    fn task_finished(&self);
}

/// A [`PoolMetrics`] that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl PoolMetrics for NoopMetrics {
    fn record_wait(&self, _elapsed: Duration) {}

    fn record_call(&self, _elapsed: Duration) {}

    fn task_started(&self) {}

    fn task_finished(&self) {}
}

#[cfg(feature = "metrics")]
pub use otel::OtelMetrics;

#[cfg(feature = "metrics")]
mod otel {
    use super::PoolMetrics;
    use core::time::Duration;
    use opentelemetry::{
        KeyValue,
        metrics::{Histogram, Meter, UpDownCounter},
    };

    /// OpenTelemetry-backed [`PoolMetrics`].
    ///
    /// Durations are recorded in milliseconds. Both histograms carry a `stage`
    /// attribute (`wait` or `complete`) so they can be charted side by side.
    #[derive(Debug, Clone)]
    pub struct OtelMetrics {
        wait: Histogram<f64>,
        complete: Histogram<f64>,
        tasks_inflight: UpDownCounter<i64>,
        wait_attrs: [KeyValue; 1],
        complete_attrs: [KeyValue; 1],
    }

    impl OtelMetrics {
        pub fn new(meter: &Meter) -> Self {
            Self {
                wait: meter
                    .f64_histogram("thread_pool_wait_duration")
                    .with_unit("ms")
                    .with_description("Time spent waiting for an idle pinned worker")
                    .build(),
                complete: meter
                    .f64_histogram("thread_pool_call_duration")
                    .with_unit("ms")
                    .with_description("End-to-end call duration, including the wait")
                    .build(),
                tasks_inflight: meter
                    .i64_up_down_counter("thread_pool_tasks_inflight")
                    .with_description("Tasks currently executing on pinned workers")
                    .build(),
                wait_attrs: [KeyValue::new("stage", "wait")],
                complete_attrs: [KeyValue::new("stage", "complete")],
            }
        }
    }

    impl PoolMetrics for OtelMetrics {
        fn record_wait(&self, elapsed: Duration) {
            self.wait
                .record(elapsed.as_secs_f64() * 1_000.0, &self.wait_attrs);
        }

        fn record_call(&self, elapsed: Duration) {
            self.complete
                .record(elapsed.as_secs_f64() * 1_000.0, &self.complete_attrs);
        }

        fn task_started(&self) {
            self.tasks_inflight.add(1, &[]);
        }

        fn task_finished(&self) {
            self.tasks_inflight.add(-1, &[]);
        }
    }
}
