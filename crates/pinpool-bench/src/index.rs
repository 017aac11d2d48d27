//! Synthetic index header.
//!
//! Stands in for a memory-mapped block index: every lookup sleeps the calling
//! thread for a fixed delay, the way a page fault on a cold mapping would.
//! Running it through a [`pinpool::ThreadedReader`] keeps that stall off the
//! async runtime's threads.

use core::time::Duration;
use pinpool::{IndexReader, Range};
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

/// Label names present in every synthetic index.
pub const LABEL_NAMES: [&str; 4] = ["__name__", "instance", "job", "zone"];

const INDEX_VERSION: i32 = 2;
const POSTINGS_ENTRY_BYTES: i64 = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("label {name}={value} not found")]
    NotFound { name: String, value: String },
    #[error("symbol offset {0} out of bounds")]
    SymbolOutOfBounds(u32),
    #[error("index is closed")]
    Closed,
}

#[derive(Debug)]
pub struct MemoryIndex {
    postings: BTreeMap<String, Vec<String>>,
    symbols: Vec<String>,
    delay: Duration,
    closed: AtomicBool,
}

impl MemoryIndex {
    /// Builds an index where every label name has `num_values` values.
    pub fn new(num_values: usize, delay: Duration) -> Self {
        let postings: BTreeMap<_, _> = LABEL_NAMES
            .iter()
            .map(|&name| {
                let values = (0..num_values).map(|i| format!("{name}-{i}")).collect();
                (name.to_owned(), values)
            })
            .collect();

        let symbols = postings
            .iter()
            .flat_map(|(name, values)| core::iter::once(name).chain(values))
            .cloned()
            .collect();

        Self {
            postings,
            symbols,
            delay,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of entries in the symbol table.
    #[cfg(test)]
    fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    fn stall(&self) -> Result<(), IndexError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::Closed);
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        Ok(())
    }
}

impl IndexReader for MemoryIndex {
    type Error = IndexError;

    fn index_version(&self) -> Result<i32, Self::Error> {
        self.stall()?;
        Ok(INDEX_VERSION)
    }

    fn postings_offset(&self, name: &str, value: &str) -> Result<Range, Self::Error> {
        self.stall()?;

        let not_found = || IndexError::NotFound {
            name: name.to_owned(),
            value: value.to_owned(),
        };
        // Postings lists are laid out name by name, value by value.
        let mut start = 0;
        for (label, values) in &self.postings {
            if label == name {
                let idx = values.iter().position(|v| v == value).ok_or_else(not_found)?;
                start += idx as i64 * POSTINGS_ENTRY_BYTES;
                return Ok(Range::new(start, start + POSTINGS_ENTRY_BYTES));
            }
            start += values.len() as i64 * POSTINGS_ENTRY_BYTES;
        }
        Err(not_found())
    }

    fn lookup_symbol(&self, offset: u32) -> Result<String, Self::Error> {
        self.stall()?;
        self.symbols
            .get(offset as usize)
            .cloned()
            .ok_or(IndexError::SymbolOutOfBounds(offset))
    }

    fn label_values(&self, name: &str) -> Result<Vec<String>, Self::Error> {
        self.stall()?;
        Ok(self.postings.get(name).cloned().unwrap_or_default())
    }

    fn label_names(&self) -> Result<Vec<String>, Self::Error> {
        self.stall()?;
        Ok(self.postings.keys().cloned().collect())
    }

    fn close(&self) -> Result<(), Self::Error> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
