//! Pinned workers and the pool that multiplexes them.
//!
//! ## Structure
//!
//! - [`worker`] - a single task executor bound to one OS thread.
//! - [`manager`] - the fixed-size [`ThreadPool`](manager::ThreadPool).
//! - `job` - type-erased tasks and the tagged results they deliver.

mod job;
pub mod manager;
pub mod worker;
