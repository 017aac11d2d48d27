//! Routing an index reader's operations through a [`crate::ThreadPool`].
//!
//! ## Structure
//!
//! - [`interface`] - the [`IndexReader`](interface::IndexReader) contract
//!   implemented by on-disk index readers.
//! - [`threaded`] - [`ThreadedReader`](threaded::ThreadedReader), which runs
//!   every reader operation on a pinned worker.

pub mod interface;
pub mod threaded;

pub use interface::*;
pub use threaded::*;
