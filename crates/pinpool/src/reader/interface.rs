/// A byte range within an index file, as returned by
/// [`IndexReader::postings_offset`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: i64,
    pub end: i64,
}

impl Range {
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub const fn len(&self) -> i64 {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Read-only access to an index header.
///
/// Implementations typically perform blocking reads over a memory-mapped file,
/// which is why [`crate::ThreadedReader`] exists to keep them off the async
/// scheduler. The pool only needs each operation to be callable from another
/// thread, hence the `Send + Sync + 'static` bound.
pub trait IndexReader: Send + Sync + 'static {
    type Error: Send + 'static;

    /// Version of the index format.
    fn index_version(&self) -> Result<i32, Self::Error>;

    /// Location of the postings list for the label pair `name=value`.
    fn postings_offset(&self, name: &str, value: &str) -> Result<Range, Self::Error>;

    /// Resolves a symbol table reference to its string.
    fn lookup_symbol(&self, offset: u32) -> Result<String, Self::Error>;

    /// All values of the label `name`.
    fn label_values(&self, name: &str) -> Result<Vec<String>, Self::Error>;

    /// All label names.
    fn label_names(&self) -> Result<Vec<String>, Self::Error>;

    /// Releases the reader's resources.
    fn close(&self) -> Result<(), Self::Error>;
}
