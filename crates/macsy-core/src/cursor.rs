//! Merged result cursor
//!
//! Presents several per-collection streams that share one sort order as a
//! single lazy stream with an optional global limit. Streams are drained
//! one after another; callers arrange them so that concatenation preserves
//! the global order (shards of later years hold later ids).

use crate::error::Result;
use crate::models::Document;
use crate::storage::stream::cap;
use crate::storage::DocumentStream;

/// Lazy, ordered, optionally capped stream over several streams
pub struct MergeCursor {
    streams: Vec<DocumentStream>,
    current: usize,
    limit: usize,
    yielded: usize,
}

impl MergeCursor {
    /// Wrap `streams`, dropping those with no results
    ///
    /// `limit` caps the combined output; 0 means unbounded.
    pub fn new(streams: Vec<DocumentStream>, limit: usize) -> Result<Self> {
        let mut non_empty = Vec::with_capacity(streams.len());
        for mut stream in streams {
            if stream.has_next()? {
                non_empty.push(stream);
            }
        }
        Ok(Self {
            streams: non_empty,
            current: 0,
            limit,
            yielded: 0,
        })
    }

    /// Cursor without results
    pub fn empty() -> Self {
        Self {
            streams: Vec::new(),
            current: 0,
            limit: 0,
            yielded: 0,
        }
    }

    /// Total number of results, capped at the global limit
    ///
    /// Independent of how far the cursor has been consumed.
    pub fn total_count(&self) -> Result<u64> {
        let mut total = 0u64;
        for stream in &self.streams {
            total += stream.total_count()?;
        }
        Ok(cap(total, self.limit))
    }

    /// Number of non-empty underlying streams
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn limit_reached(&self) -> bool {
        self.limit > 0 && self.yielded >= self.limit
    }
}

impl Iterator for MergeCursor {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.limit_reached() {
            return None;
        }

        while let Some(stream) = self.streams.get_mut(self.current) {
            match stream.next() {
                Some(Ok(doc)) => {
                    self.yielded += 1;
                    return Some(Ok(doc));
                }
                Some(Err(e)) => return Some(Err(e)),
                None => self.current += 1,
            }
        }
        None
    }
}
