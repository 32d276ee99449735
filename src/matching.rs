//! Match path and lazy table scans.
//!
//! Everything here is an on-demand iterator. [`Matches`] issues one
//! `IN (...)` statement per batch of query hashes as the consumer advances;
//! [`KeysetScan`] pages through a table by key. Neither holds more than one
//! batch/page of rows in memory, and neither keeps a connection checked out
//! between calls to `next()`.
//!
//! Iterators yield `StoreResult<T>`. After the first error they are fused
//! and return `None`.

use rusqlite::{params, params_from_iter, Connection, Row};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::{instrument, trace};

use crate::cursor::CursorMode;
use crate::error::StoreResult;
use crate::models::{Fingerprint, Match, Offset, Song, SongId};
use crate::pool::ConnectionPool;
use crate::schema;

// ============================================================================
// Match Path
// ============================================================================

/// Lazy `(song_id, offset_delta)` sequence for a set of query hashes.
///
/// Query pairs are folded into a `hash -> query_offset` map first. A hash
/// repeated in the query keeps only its last offset, and its batch position
/// is where it was first seen.
pub struct Matches<'s> {
    pool: &'s ConnectionPool,
    query_offsets: FxHashMap<String, Offset>,
    hashes: Vec<String>,
    batch_size: usize,
    next_batch_start: usize,
    pending: std::vec::IntoIter<Match>,
    failed: bool,
}

impl<'s> Matches<'s> {
    /// `batch_size` must already be validated against the bound-parameter
    /// limit; see [`crate::config::StoreConfig::validate`].
    pub(crate) fn new<I, H>(pool: &'s ConnectionPool, pairs: I, batch_size: usize) -> Self
    where
        I: IntoIterator<Item = (H, Offset)>,
        H: Into<String>,
    {
        let mut query_offsets = FxHashMap::default();
        let mut hashes = Vec::new();
        for (hash, offset) in pairs {
            let hash = hash.into();
            if query_offsets.insert(hash.clone(), offset).is_none() {
                hashes.push(hash);
            }
        }

        Self {
            pool,
            query_offsets,
            hashes,
            batch_size,
            next_batch_start: 0,
            pending: Vec::new().into_iter(),
            failed: false,
        }
    }

    /// Distinct query hashes after folding.
    pub fn distinct_hashes(&self) -> usize {
        self.hashes.len()
    }

    /// Number of statements a full pass issues.
    pub fn batch_count(&self) -> usize {
        self.hashes.len().div_ceil(self.batch_size)
    }

    #[instrument(skip(self), level = "trace")]
    fn fetch_batch(&self, start: usize) -> StoreResult<Vec<Match>> {
        let end = (start + self.batch_size).min(self.hashes.len());
        let batch = &self.hashes[start..end];
        let sql = schema::select_matches_sql(batch.len());

        self.pool.scoped(CursorMode::Read, |conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut rows = stmt.query(params_from_iter(batch.iter()))?;
            let mut matches = Vec::new();
            while let Some(row) = rows.next()? {
                let hash: String = row.get(0)?;
                let song_id = row.get(1)?;
                let stored_offset: Offset = row.get(2)?;
                if let Some(&query_offset) = self.query_offsets.get(&hash) {
                    matches.push(Match::new(song_id, stored_offset, query_offset));
                }
            }
            trace!(batch_len = batch.len(), matches = matches.len(), "batch fetched");
            Ok(matches)
        })
    }
}

impl Iterator for Matches<'_> {
    type Item = StoreResult<Match>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(m) = self.pending.next() {
                return Some(Ok(m));
            }
            if self.failed || self.next_batch_start >= self.hashes.len() {
                return None;
            }

            let start = self.next_batch_start;
            self.next_batch_start += self.batch_size;
            match self.fetch_batch(start) {
                Ok(batch) => self.pending = batch.into_iter(),
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

// ============================================================================
// Keyset Scans
// ============================================================================

/// Fetches the page after the closure's own keyset position, at most
/// `limit` rows, and advances that position past the returned rows.
type PageFetch<'s, T> = Box<dyn FnMut(&Connection, usize) -> StoreResult<Vec<T>> + 's>;

/// Lazy full-table scan, fetched one keyset page at a time.
///
/// Each page is read in its own scoped cursor, so rows inserted behind the
/// scan position mid-scan are not seen, and rows ahead of it are.
pub struct KeysetScan<'s, T> {
    pool: &'s ConnectionPool,
    fetch: PageFetch<'s, T>,
    page_size: usize,
    buffer: VecDeque<T>,
    exhausted: bool,
}

pub type FingerprintScan<'s> = KeysetScan<'s, Fingerprint>;
pub type SongScan<'s> = KeysetScan<'s, Song>;

impl<'s, T> KeysetScan<'s, T> {
    fn new(pool: &'s ConnectionPool, page_size: usize, fetch: PageFetch<'s, T>) -> Self {
        Self {
            pool,
            fetch,
            page_size,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fetch_page(&mut self) -> StoreResult<()> {
        let page_size = self.page_size;
        let fetch = &mut self.fetch;
        let page = self
            .pool
            .scoped(CursorMode::Read, |conn| fetch(conn, page_size))?;

        if page.len() < page_size {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<T> Iterator for KeysetScan<'_, T> {
    type Item = StoreResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                self.buffer.clear();
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

/// Every stored fingerprint, or only those for `hash` when given.
///
/// The full scan pages by `rowid`. A single-hash scan pages by
/// `(song_id, offset)`, which is the order of the unique index it reads.
pub(crate) fn scan_fingerprints<'s>(
    pool: &'s ConnectionPool,
    hash: Option<String>,
    page_size: usize,
) -> FingerprintScan<'s> {
    let fetch: PageFetch<'s, Fingerprint> = match hash {
        Some(hash) => {
            let mut after: (SongId, i64) = (SongId::MIN, -1);
            let fetch: PageFetch<'s, Fingerprint> = Box::new(move |conn: &Connection, limit| {
                let mut stmt = conn.prepare_cached(schema::SELECT_FINGERPRINTS_BY_HASH_PAGE)?;
                let mut rows = stmt.query(params![hash, after.0, after.1, limit as i64])?;
                let mut page = Vec::new();
                while let Some(row) = rows.next()? {
                    page.push(fingerprint_from_row(row)?);
                }
                if let Some(last) = page.last() {
                    after = (last.song_id, i64::from(last.offset));
                }
                Ok(page)
            });
            fetch
        }
        None => {
            let mut after: i64 = 0;
            let fetch: PageFetch<'s, Fingerprint> = Box::new(move |conn: &Connection, limit| {
                let mut stmt = conn.prepare_cached(schema::SELECT_FINGERPRINTS_PAGE)?;
                let mut rows = stmt.query(params![after, limit as i64])?;
                let mut page = Vec::new();
                while let Some(row) = rows.next()? {
                    after = row.get(3)?;
                    page.push(fingerprint_from_row(row)?);
                }
                Ok(page)
            });
            fetch
        }
    };
    KeysetScan::new(pool, page_size, fetch)
}

fn fingerprint_from_row(row: &Row<'_>) -> rusqlite::Result<Fingerprint> {
    Ok(Fingerprint {
        hash: row.get(0)?,
        song_id: row.get(1)?,
        offset: row.get(2)?,
    })
}

/// Every song whose fingerprints are complete, in `song_id` order.
pub(crate) fn scan_songs(pool: &ConnectionPool, page_size: usize) -> SongScan<'_> {
    let mut after: SongId = 0;
    let fetch: PageFetch<'_, Song> = Box::new(move |conn, limit| {
        let mut stmt = conn.prepare_cached(schema::SELECT_SONGS_PAGE)?;
        let mut rows = stmt.query(params![after, limit as i64])?;
        let mut page = Vec::new();
        while let Some(row) = rows.next()? {
            page.push(Song {
                song_id: row.get(0)?,
                song_name: row.get(1)?,
                file_hash: row.get(2)?,
            });
        }
        if let Some(last) = page.last() {
            after = last.song_id;
        }
        Ok(page)
    });
    KeysetScan::new(pool, page_size, fetch)
}
