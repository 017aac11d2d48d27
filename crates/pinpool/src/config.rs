use crate::Error;

/// Default prefix for worker thread names.
pub const DEFAULT_THREAD_NAME: &str = "pinpool";

/// Construction parameters for a [`crate::ThreadPool`].
///
/// Only the worker count is required. The remaining settings control how each
/// worker's dedicated thread is spawned, and how much parallelism the host is
/// assumed to have.
///
/// # Example
/// ```
/// use pinpool::PoolConfig;
///
/// let config = PoolConfig::new(2)
///     .with_thread_name("index-reader")
///     .with_stack_size(4 * 1024 * 1024);
/// assert_eq!(config.num_threads(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    num_threads: usize,
    thread_name: String,
    stack_size: Option<usize>,
    parallelism: Option<usize>,
}

impl PoolConfig {
    /// Creates a configuration for a pool of `num_threads` workers.
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            stack_size: None,
            parallelism: None,
        }
    }

    /// Sets the prefix used for worker thread names. Worker `i` is named
    /// `{prefix}-{i}`.
    #[must_use]
    pub fn with_thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Sets the stack size, in bytes, of each worker thread.
    #[must_use]
    pub const fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Overrides the host parallelism used to validate the pool size.
    ///
    /// Useful when the process runs under a CPU quota that `num_cpus` does not
    /// see, or to make validation deterministic.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    pub const fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub const fn stack_size(&self) -> Option<usize> {
        self.stack_size
    }

    /// The parallelism the pool size is checked against: the override if set,
    /// otherwise the number of logical CPUs.
    pub fn parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(num_cpus::get)
    }

    /// Checks that the pool has at least one worker and leaves at least one
    /// parallel execution context for the rest of the process.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyPool`] if `num_threads` is 0.
    /// - [`Error::TooManyThreads`] if `num_threads >= parallelism()`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.num_threads == 0 {
            return Err(Error::EmptyPool);
        }

        let available = self.parallelism();
        if self.num_threads >= available {
            return Err(Error::TooManyThreads {
                requested: self.num_threads,
                available,
            });
        }

        Ok(())
    }

    pub(crate) fn worker_thread_name(&self, id: usize) -> String {
        format!("{}-{id}", self.thread_name)
    }
}
