//! SQLite-backed fingerprint store.
//!
//! Every public operation runs in its own scoped cursor: it commits as a
//! unit or rolls back and returns the original error. The match path and
//! the scans run one scoped cursor per batch/page.

use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, instrument};

use crate::config::{check_parameter_bound, StoreConfig};
use crate::cursor::CursorMode;
use crate::error::StoreResult;
use crate::matching::{self, FingerprintScan, Matches, SongScan};
use crate::models::{Offset, SongId, SongMetadata, StoreStats};
use crate::pool::ConnectionPool;
use crate::schema;

pub struct FingerprintStore {
    pool: ConnectionPool,
    match_batch_size: usize,
    scan_page_size: usize,
}

impl FingerprintStore {
    /// Opens the store described by `config` and runs [`setup`](Self::setup).
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let store = Self::open_without_setup(config)?;
        store.setup()?;
        Ok(store)
    }

    /// Opens the store without touching the schema.
    pub fn open_without_setup(config: &StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Self {
            pool: ConnectionPool::from_config(config),
            match_batch_size: config.match_batch_size,
            scan_page_size: config.scan_page_size,
        })
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Rebuilds the connection pool from scratch. Process lifecycle
    /// management calls this in a forked child before using the store.
    pub fn after_fork(&self) {
        self.pool.reset();
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Creates both tables if missing, then purges songs left unfinished by
    /// an earlier run. Must run before any other operation.
    pub fn setup(&self) -> StoreResult<()> {
        let purged = self.pool.scoped(CursorMode::Write, |conn| {
            conn.execute(schema::CREATE_SONGS_TABLE, [])?;
            conn.execute(schema::CREATE_FINGERPRINTS_TABLE, [])?;
            Ok(conn.execute(schema::DELETE_UNFINGERPRINTED, [])?)
        })?;
        info!(path = %self.pool.path().display(), purged, "fingerprint store ready");
        Ok(())
    }

    /// Drops both tables and runs [`setup`](Self::setup) again.
    pub fn empty(&self) -> StoreResult<()> {
        self.pool.scoped(CursorMode::Write, |conn| {
            conn.execute(schema::DROP_FINGERPRINTS, [])?;
            conn.execute(schema::DROP_SONGS, [])?;
            Ok(())
        })?;
        info!(
            "dropped {} and {}",
            schema::FINGERPRINTS_TABLE,
            schema::SONGS_TABLE
        );
        self.setup()
    }

    pub fn delete_unfingerprinted_songs(&self) -> StoreResult<usize> {
        let purged = self.pool.scoped(CursorMode::Write, |conn| {
            Ok(conn.execute(schema::DELETE_UNFINGERPRINTED, [])?)
        })?;
        info!(purged, "deleted unfingerprinted songs");
        Ok(purged)
    }

    // ========================================================================
    // Write Path
    // ========================================================================

    /// Registers a song in the unfinished state and returns its id.
    #[instrument(skip(self, file_hash), level = "trace")]
    pub fn insert_song(&self, song_name: &str, file_hash: &[u8]) -> StoreResult<SongId> {
        self.pool.scoped(CursorMode::Write, |conn| {
            conn.prepare_cached(schema::INSERT_SONG)?
                .execute(params![song_name, file_hash])?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Inserts one fingerprint. A duplicate triple is a no-op.
    pub fn insert(&self, hash: &str, song_id: SongId, offset: Offset) -> StoreResult<()> {
        self.pool.scoped(CursorMode::Write, |conn| {
            conn.prepare_cached(schema::INSERT_FINGERPRINT)?
                .execute(params![hash, song_id, offset])?;
            Ok(())
        })
    }

    /// Inserts every `(hash, offset)` pair for `song_id` in one transaction.
    ///
    /// Duplicates, within the batch or against stored rows, are skipped.
    /// Returns the number of rows actually added.
    #[instrument(skip(self, pairs), level = "trace")]
    pub fn insert_hashes<I, H>(&self, song_id: SongId, pairs: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = (H, Offset)>,
        H: AsRef<str>,
    {
        let inserted = self.pool.scoped(CursorMode::Write, |conn| {
            let mut stmt = conn.prepare_cached(schema::INSERT_FINGERPRINT)?;
            let mut inserted = 0;
            for (hash, offset) in pairs {
                inserted += stmt.execute(params![hash.as_ref(), song_id, offset])?;
            }
            Ok(inserted)
        })?;
        debug!(song_id, inserted, "inserted fingerprints");
        Ok(inserted)
    }

    /// Marks the song's fingerprints as complete. Calling it again is a no-op.
    pub fn set_song_fingerprinted(&self, song_id: SongId) -> StoreResult<()> {
        self.pool.scoped(CursorMode::Write, |conn| {
            conn.execute(schema::UPDATE_SONG_FINGERPRINTED, [song_id])?;
            Ok(())
        })
    }

    /// Deletes a song and, through the cascade, all of its fingerprints.
    /// Returns whether a song was removed.
    pub fn delete_song(&self, song_id: SongId) -> StoreResult<bool> {
        self.pool.scoped(CursorMode::Write, |conn| {
            Ok(conn.execute(schema::DELETE_SONG, [song_id])? > 0)
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Name and file hash of a song, or `None` if no song has that id.
    /// Unfinished songs are returned too.
    pub fn get_song_by_id(&self, song_id: SongId) -> StoreResult<Option<SongMetadata>> {
        self.pool.scoped(CursorMode::Read, |conn| {
            let song = conn
                .prepare_cached(schema::SELECT_SONG)?
                .query_row([song_id], |row| {
                    Ok(SongMetadata {
                        song_name: row.get(0)?,
                        file_hash: row.get(1)?,
                    })
                })
                .optional()?;
            Ok(song)
        })
    }

    /// Number of songs whose fingerprints are complete.
    pub fn get_num_songs(&self) -> StoreResult<u64> {
        self.count(schema::SELECT_NUM_SONGS)
    }

    pub fn get_num_fingerprints(&self) -> StoreResult<u64> {
        self.count(schema::SELECT_NUM_FINGERPRINTS)
    }

    pub fn stats(&self) -> StoreResult<StoreStats> {
        Ok(StoreStats {
            songs: self.get_num_songs()?,
            fingerprints: self.get_num_fingerprints()?,
        })
    }

    fn count(&self, sql: &str) -> StoreResult<u64> {
        let n: i64 = self
            .pool
            .scoped(CursorMode::Read, |conn| Ok(conn.query_row(sql, [], |r| r.get(0))?))?;
        Ok(n as u64)
    }

    /// Lazily lists completed songs.
    pub fn get_songs(&self) -> SongScan<'_> {
        matching::scan_songs(&self.pool, self.scan_page_size)
    }

    /// Lazily lists stored fingerprints: all of them, or only those for `hash`.
    pub fn query(&self, hash: Option<&str>) -> FingerprintScan<'_> {
        matching::scan_fingerprints(&self.pool, hash.map(str::to_owned), self.scan_page_size)
    }

    // ========================================================================
    // Match Path
    // ========================================================================

    /// Lazily yields a [`Match`](crate::models::Match) for every stored
    /// fingerprint whose hash appears in `pairs`, batching the lookup by the
    /// configured batch size.
    pub fn return_matches<I, H>(&self, pairs: I) -> Matches<'_>
    where
        I: IntoIterator<Item = (H, Offset)>,
        H: Into<String>,
    {
        Matches::new(&self.pool, pairs, self.match_batch_size)
    }

    /// Same as [`return_matches`](Self::return_matches) with an explicit
    /// batch size, which must be within the bound-parameter limit.
    pub fn return_matches_batched<I, H>(
        &self,
        pairs: I,
        batch_size: usize,
    ) -> StoreResult<Matches<'_>>
    where
        I: IntoIterator<Item = (H, Offset)>,
        H: Into<String>,
    {
        check_parameter_bound("batch_size", batch_size)?;
        Ok(Matches::new(&self.pool, pairs, batch_size))
    }
}
