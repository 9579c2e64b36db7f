//! Lazy result streams
//!
//! A [`DocumentStream`] fetches matching documents page by page, resuming
//! after the last id it has seen, so arbitrarily large result sets never
//! have to be materialized.

use std::collections::VecDeque;

use crate::error::Result;
use crate::models::{Document, DocumentId};
use crate::storage::query::{Query, SortOrder};
use crate::storage::sqlite::SqliteStore;

/// Default number of documents fetched per round trip
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Sort, limit and paging options of a find
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: SortOrder,
    /// Maximum number of results; 0 means unbounded
    pub limit: usize,
    pub batch_size: usize,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            sort: SortOrder::default(),
            limit: 0,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Single-collection result stream
pub struct DocumentStream {
    store: SqliteStore,
    collection: String,
    query: Query,
    options: FindOptions,
    buffer: VecDeque<Document>,
    last_id: Option<DocumentId>,
    fetched: usize,
    exhausted: bool,
}

impl DocumentStream {
    pub(crate) fn new(store: SqliteStore, collection: &str, query: Query, options: FindOptions) -> Self {
        Self {
            store,
            collection: collection.to_string(),
            query,
            options,
            buffer: VecDeque::new(),
            last_id: None,
            fetched: 0,
            exhausted: false,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Number of matching documents, capped at the limit
    ///
    /// Independent of how far the stream has been consumed.
    pub fn total_count(&self) -> Result<u64> {
        let total = self.store.count(&self.collection, &self.query)?;
        Ok(cap(total, self.options.limit))
    }

    /// Check whether at least one more document is available
    pub fn has_next(&mut self) -> Result<bool> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill()?;
        }
        Ok(!self.buffer.is_empty())
    }

    fn fill(&mut self) -> Result<()> {
        let remaining = match self.options.limit {
            0 => usize::MAX,
            limit => limit.saturating_sub(self.fetched),
        };
        let page = self.options.batch_size.max(1).min(remaining);
        if page == 0 {
            self.exhausted = true;
            return Ok(());
        }

        let docs = self.store.find_page(
            &self.collection,
            &self.query,
            self.options.sort,
            self.last_id.as_ref(),
            page,
        )?;

        if docs.len() < page {
            self.exhausted = true;
        }
        if let Some(last) = docs.last() {
            self.last_id = last.id.clone();
        }
        self.fetched += docs.len();
        self.buffer.extend(docs);
        Ok(())
    }
}

impl Iterator for DocumentStream {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => self.buffer.pop_front().map(Ok),
            Ok(false) => None,
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

pub(crate) fn cap(total: u64, limit: usize) -> u64 {
    match limit {
        0 => total,
        limit => total.min(limit as u64),
    }
}
