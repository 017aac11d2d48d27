//! Concurrent lookup loops.

use crate::index::{LABEL_NAMES, MemoryIndex};
use pinpool::{CallError, ThreadedReader};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Counters shared by every lookup loop.
#[derive(Debug, Default)]
pub struct LoadStats {
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl LoadStats {
    /// Lookups that returned a value.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Lookups the index answered with an error.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Lookups refused because the pool was shutting down.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn observe<T, E>(&self, result: &Result<T, CallError<E>>) {
        let counter = match result {
            Ok(_) => &self.completed,
            Err(CallError::Task(_)) => &self.failed,
            Err(CallError::PoolStopped) => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Spawns `concurrency` loops that issue lookups until `stop` fires or the
/// pool refuses a call.
pub fn spawn(
    reader: &ThreadedReader<MemoryIndex>,
    concurrency: usize,
    num_labels: usize,
    stop: &CancellationToken,
) -> (JoinSet<()>, Arc<LoadStats>) {
    let stats = Arc::new(LoadStats::default());
    let mut loops = JoinSet::new();

    for id in 0..concurrency {
        let reader = reader.clone();
        let stats = Arc::clone(&stats);
        let stop = stop.clone();
        loops.spawn(async move {
            let mut step = id;
            while !stop.is_cancelled() {
                if !lookup(&reader, &stats, step, num_labels).await {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Lookup loop {id} exiting, pool is stopped");
                    break;
                }
                step = step.wrapping_add(concurrency);
            }
        });
    }

    (loops, stats)
}

/// Runs the lookup for `step`. Returns `false` once the pool is stopped.
async fn lookup(
    reader: &ThreadedReader<MemoryIndex>,
    stats: &LoadStats,
    step: usize,
    num_labels: usize,
) -> bool {
    let name = LABEL_NAMES[step % LABEL_NAMES.len()];
    let value = step % num_labels;

    // Mostly postings lookups, the hot path of a real query. Every 16th step
    // asks for a value one past the end so the error path stays exercised.
    let stopped = match step % 8 {
        0 => {
            let result = reader.label_values(name).await;
            stats.observe(&result);
            result.is_err_and(|e| e.is_pool_stopped())
        }
        1 => {
            let result = reader.lookup_symbol((step % (num_labels + 1)) as u32).await;
            stats.observe(&result);
            result.is_err_and(|e| e.is_pool_stopped())
        }
        _ => {
            let value = if step % 16 == 15 { num_labels } else { value };
            let result = reader.postings_offset(name, &format!("{name}-{value}")).await;
            stats.observe(&result);
            result.is_err_and(|e| e.is_pool_stopped())
        }
    };

    !stopped
}
