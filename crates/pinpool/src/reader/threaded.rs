use crate::{CallError, IndexReader, Range, ThreadPool};
use std::sync::Arc;

/// An [`IndexReader`] whose every operation runs on one of a
/// [`ThreadPool`]'s pinned workers.
///
/// Each method packages the matching reader call in a task, submits it with
/// [`ThreadPool::call`], and hands back the reader's own result. Reader errors
/// come back verbatim as [`CallError::Task`]; if the pool is shutting down the
/// call fails with [`CallError::PoolStopped`] and the reader is not touched.
/// There are no retries and no caching.
pub struct ThreadedReader<R> {
    pool: Arc<ThreadPool>,
    reader: Arc<R>,
}

impl<R> Clone for ThreadedReader<R> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            reader: Arc::clone(&self.reader),
        }
    }
}

impl<R> core::fmt::Debug for ThreadedReader<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadedReader")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl<R: IndexReader> ThreadedReader<R> {
    pub fn new(pool: Arc<ThreadPool>, reader: R) -> Self {
        Self::from_arc(pool, Arc::new(reader))
    }

    /// Wraps a reader that is already shared elsewhere.
    pub const fn from_arc(pool: Arc<ThreadPool>, reader: Arc<R>) -> Self {
        Self { pool, reader }
    }

    /// The wrapped reader. Calling it directly bypasses the pool.
    pub fn inner(&self) -> &R {
        &self.reader
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    pub async fn index_version(&self) -> Result<i32, CallError<R::Error>> {
        let reader = Arc::clone(&self.reader);
        self.pool.call(move || reader.index_version()).await
    }

    pub async fn postings_offset(
        &self,
        name: &str,
        value: &str,
    ) -> Result<Range, CallError<R::Error>> {
        let reader = Arc::clone(&self.reader);
        let (name, value) = (name.to_owned(), value.to_owned());
        self.pool
            .call(move || reader.postings_offset(&name, &value))
            .await
    }

    pub async fn lookup_symbol(&self, offset: u32) -> Result<String, CallError<R::Error>> {
        let reader = Arc::clone(&self.reader);
        self.pool.call(move || reader.lookup_symbol(offset)).await
    }

    pub async fn label_values(&self, name: &str) -> Result<Vec<String>, CallError<R::Error>> {
        let reader = Arc::clone(&self.reader);
        let name = name.to_owned();
        self.pool.call(move || reader.label_values(&name)).await
    }

    pub async fn label_names(&self) -> Result<Vec<String>, CallError<R::Error>> {
        let reader = Arc::clone(&self.reader);
        self.pool.call(move || reader.label_names()).await
    }

    pub async fn close(&self) -> Result<(), CallError<R::Error>> {
        let reader = Arc::clone(&self.reader);
        self.pool.call(move || reader.close()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PoolConfig;
    use parking_lot::Mutex;
    use std::{collections::BTreeMap, thread};

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    enum MockError {
        #[error("label {0} not found")]
        NotFound(String),
        #[error("symbol offset {0} out of bounds")]
        OutOfBounds(u32),
    }

    /// In-memory reader that records which thread served each operation.
    #[derive(Default)]
    struct MockReader {
        labels: BTreeMap<String, Vec<String>>,
        symbols: Vec<String>,
        threads: Mutex<Vec<String>>,
        closed: Mutex<bool>,
    }

    impl MockReader {
        fn new() -> Self {
            let mut labels = BTreeMap::new();
            labels.insert("job".to_string(), vec!["api".to_string(), "db".to_string()]);
            labels.insert("zone".to_string(), vec!["a".to_string()]);
            Self {
                labels,
                symbols: vec!["__name__".to_string(), "up".to_string()],
                ..Self::default()
            }
        }

        fn record(&self) {
            let name = thread::current().name().unwrap_or_default().to_owned();
            self.threads.lock().push(name);
        }
    }

    impl IndexReader for MockReader {
        type Error = MockError;

        fn index_version(&self) -> Result<i32, Self::Error> {
            self.record();
            Ok(2)
        }

        fn postings_offset(&self, name: &str, value: &str) -> Result<Range, Self::Error> {
            self.record();
            let values = self
                .labels
                .get(name)
                .ok_or_else(|| MockError::NotFound(name.to_owned()))?;
            let idx = values
                .iter()
                .position(|v| v == value)
                .ok_or_else(|| MockError::NotFound(format!("{name}={value}")))?;
            let start = idx as i64 * 16;
            Ok(Range::new(start, start + 16))
        }

        fn lookup_symbol(&self, offset: u32) -> Result<String, Self::Error> {
            self.record();
            self.symbols
                .get(offset as usize)
                .cloned()
                .ok_or(MockError::OutOfBounds(offset))
        }

        fn label_values(&self, name: &str) -> Result<Vec<String>, Self::Error> {
            self.record();
            Ok(self.labels.get(name).cloned().unwrap_or_default())
        }

        fn label_names(&self) -> Result<Vec<String>, Self::Error> {
            self.record();
            Ok(self.labels.keys().cloned().collect())
        }

        fn close(&self) -> Result<(), Self::Error> {
            self.record();
            *self.closed.lock() = true;
            Ok(())
        }
    }

    fn threaded() -> ThreadedReader<MockReader> {
        let pool = ThreadPool::with_config(
            PoolConfig::new(1)
                .with_parallelism(2)
                .with_thread_name("index"),
        )
        .unwrap();
        ThreadedReader::new(Arc::new(pool), MockReader::new())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_operation_runs_on_a_pool_thread() {
        let reader = threaded();

        assert_eq!(reader.index_version().await, Ok(2));
        assert_eq!(
            reader.postings_offset("job", "db").await,
            Ok(Range::new(16, 32))
        );
        assert_eq!(reader.lookup_symbol(1).await, Ok("up".to_string()));
        assert_eq!(
            reader.label_values("job").await,
            Ok(vec!["api".to_string(), "db".to_string()])
        );
        assert_eq!(
            reader.label_names().await,
            Ok(vec!["job".to_string(), "zone".to_string()])
        );
        assert_eq!(reader.close().await, Ok(()));
        assert!(*reader.inner().closed.lock());

        let threads = reader.inner().threads.lock().clone();
        assert_eq!(threads.len(), 6);
        assert!(threads.iter().all(|name| name == "index-0"));

        reader.pool().stop_and_wait().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reader_errors_pass_through() {
        let reader = threaded();

        assert_eq!(
            reader.postings_offset("job", "cache").await,
            Err(CallError::Task(MockError::NotFound("job=cache".to_string())))
        );
        assert_eq!(
            reader.lookup_symbol(99).await,
            Err(CallError::Task(MockError::OutOfBounds(99)))
        );
        assert_eq!(reader.label_values("missing").await, Ok(Vec::new()));

        reader.pool().stop_and_wait().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stopped_pool_never_touches_reader() {
        let reader = threaded();
        reader.pool().stop_and_wait().await;

        assert_eq!(reader.index_version().await, Err(CallError::PoolStopped));
        assert_eq!(reader.close().await, Err(CallError::PoolStopped));
        assert!(reader.inner().threads.lock().is_empty());
        assert!(!*reader.inner().closed.lock());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn clones_share_pool_and_reader() {
        let reader = threaded();
        let clones = (0..8u32).map(|i| {
            let reader = reader.clone();
            tokio::spawn(async move { reader.lookup_symbol(i % 2).await })
        });

        for result in futures::future::join_all(clones).await {
            assert!(result.unwrap().is_ok());
        }
        assert_eq!(reader.inner().threads.lock().len(), 8);

        reader.pool().stop_and_wait().await;
    }
}
