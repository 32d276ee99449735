//! Bounded connection cache.
//!
//! Acquire never waits: it takes an idle connection if one is cached and
//! opens a fresh one otherwise. Capacity only bounds how many connections
//! are kept idle on release; a release into a full cache closes the
//! connection.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use rusqlite::{Connection, OpenFlags};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::StoreResult;

/// How the pool opens new backend connections.
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    pub path: PathBuf,
    pub busy_timeout: Duration,
    pub wal: bool,
}

impl ConnectionOptions {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            path: config.path.clone(),
            busy_timeout: config.busy_timeout(),
            wal: config.wal,
        }
    }

    /// Opens a connection in autocommit mode. Transactions are only ever
    /// opened by a scoped cursor.
    fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        if self.wal {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(%mode, "journal mode set");
        }
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(conn)
    }
}

struct IdleCache {
    tx: Sender<Connection>,
    rx: Receiver<Connection>,
}

impl IdleCache {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }
}

/// Process-local pool of SQLite connections to one database file.
///
/// Safe to share across threads; each checked-out [`PooledConnection`] is
/// owned by exactly one operation until it is dropped.
pub struct ConnectionPool {
    options: ConnectionOptions,
    capacity: usize,
    idle: RwLock<IdleCache>,
}

impl ConnectionPool {
    pub fn new(options: ConnectionOptions, capacity: usize) -> Self {
        Self {
            options,
            capacity,
            idle: RwLock::new(IdleCache::new(capacity)),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(ConnectionOptions::from_config(config), config.pool_capacity)
    }

    pub fn path(&self) -> &Path {
        &self.options.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of connections currently cached and not checked out.
    pub fn idle_connections(&self) -> usize {
        self.idle.read().unwrap_or_else(PoisonError::into_inner).rx.len()
    }

    /// Takes a cached connection, or opens a new one if none is idle.
    pub fn acquire(&self) -> StoreResult<PooledConnection<'_>> {
        let cached = self
            .idle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rx
            .try_recv()
            .ok();

        let conn = match cached {
            Some(conn) => conn,
            None => {
                debug!(path = %self.options.path.display(), "opening new connection");
                self.options.open()?
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self,
        })
    }

    fn release(&self, conn: Connection) {
        if !conn.is_autocommit() {
            warn!("connection released inside an open transaction, closing it");
            close(conn);
            return;
        }

        let result = self
            .idle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tx
            .try_send(conn);

        match result {
            Ok(()) => {}
            Err(TrySendError::Full(conn)) | Err(TrySendError::Disconnected(conn)) => {
                debug!(capacity = self.capacity, "pool full, closing connection");
                close(conn);
            }
        }
    }

    /// Drops every idle connection and starts over with an empty cache.
    ///
    /// Connections checked out at the time are left alone and are cached
    /// again on release. Call this in a child process after a fork, so the
    /// child never reuses connections opened by its parent.
    pub fn reset(&self) {
        let mut idle = self.idle.write().unwrap_or_else(PoisonError::into_inner);
        let dropped = idle.rx.len();
        *idle = IdleCache::new(self.capacity);
        debug!(dropped, "connection pool reset");
    }
}

fn close(conn: Connection) {
    if let Err((_, err)) = conn.close() {
        warn!(%err, "failed to close connection cleanly");
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Returned to the pool (or closed) when dropped.
pub struct PooledConnection<'p> {
    conn: Option<Connection>,
    pool: &'p ConnectionPool,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection is only taken on drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection is only taken on drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use tempfile::TempDir;

    fn test_pool(dir: &TempDir, capacity: usize) -> ConnectionPool {
        ConnectionPool::from_config(&StoreConfig {
            pool_capacity: capacity,
            ..StoreConfig::at(dir.path().join("pool.sqlite3"))
        })
    }

    #[test]
    fn test_sequential_acquire_reuses_one_connection() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, 5);

        for _ in 0..20 {
            let conn = pool.acquire().unwrap();
            let one: i64 = conn.query_row("SELECT 1", [], |r| r.get(0)).unwrap();
            assert_eq!(one, 1);
        }
        assert_eq!(pool.idle_connections(), 1);
    }

    #[test]
    fn test_release_never_exceeds_capacity() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, 5);

        let held: Vec<_> = (0..8).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.idle_connections(), 0);
        drop(held);
        assert_eq!(pool.idle_connections(), 5);

        let again: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.idle_connections(), 2);
        drop(again);
        assert_eq!(pool.idle_connections(), 5);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, 3);

        (0..64).into_par_iter().for_each(|_| {
            let conn = pool.acquire().unwrap();
            let one: i64 = conn.query_row("SELECT 1", [], |r| r.get(0)).unwrap();
            assert_eq!(one, 1);
        });
        assert!(pool.idle_connections() <= 3);
    }

    #[test]
    fn test_connection_in_transaction_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, 5);

        {
            let conn = pool.acquire().unwrap();
            conn.execute_batch("BEGIN").unwrap();
        }
        assert_eq!(pool.idle_connections(), 0);
    }

    #[test]
    fn test_reset_drops_idle_but_keeps_checked_out() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, 5);

        let held = pool.acquire().unwrap();
        drop((0..4).map(|_| pool.acquire().unwrap()).collect::<Vec<_>>());
        assert_eq!(pool.idle_connections(), 4);

        pool.reset();
        assert_eq!(pool.idle_connections(), 0);

        assert!(held.is_autocommit());
        drop(held);
        assert_eq!(pool.idle_connections(), 1);
    }

    #[test]
    fn test_connections_enforce_foreign_keys() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir, 5);
        let conn = pool.acquire().unwrap();
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |r| r.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
        assert!(conn.is_autocommit());
    }
}
