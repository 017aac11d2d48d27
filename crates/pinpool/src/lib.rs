//! A fixed-size pool of workers, each bound to its own OS thread for its
//! entire life.
//!
//! Async services occasionally need to run code that must not execute on the
//! general-purpose scheduler: code relying on thread-local or thread-affine
//! native state, or blocking I/O over memory-mapped files. [`ThreadPool`] owns
//! a handful of dedicated threads for that work and hands them out one call at
//! a time, with bounded availability acting as backpressure.
//!
//! - [`Worker`] runs tasks one at a time on a single dedicated thread.
//! - [`ThreadPool`] lends idle workers to callers and shuts down without
//!   leaking threads.
//! - [`ThreadedReader`] routes every operation of an [`IndexReader`] through a
//!   pool.
//!
//! ```
//! use pinpool::{CallError, PoolConfig, ThreadPool};
//! use std::convert::Infallible;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), pinpool::Error> {
//! let pool = ThreadPool::with_config(PoolConfig::new(1).with_parallelism(2))?;
//!
//! // A legitimate zero value...
//! assert_eq!(pool.call(|| Ok::<_, Infallible>(0)).await, Ok(0));
//!
//! // ...is never confused with a stopped pool.
//! pool.stop_and_wait().await;
//! assert_eq!(
//!     pool.call(|| Ok::<_, Infallible>(0)).await,
//!     Err(CallError::PoolStopped)
//! );
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod pool;
mod reader;
mod telemetry;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::pool::manager::*;
pub use crate::pool::worker::*;
pub use crate::reader::*;
pub use crate::telemetry::*;
