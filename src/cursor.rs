//! Single-operation transactional scope over a pooled connection.
//!
//! A [`ScopedCursor`] checks a connection out of the pool, opens a
//! transaction on it and finishes that transaction exactly once: `commit`
//! on success, rollback on any other exit (early return, `?`, panic). The
//! connection goes back to the pool when the cursor is dropped.

use rusqlite::Connection;
use std::ops::Deref;
use tracing::warn;

use crate::error::StoreResult;
use crate::pool::{ConnectionPool, PooledConnection};

/// Transaction flavour opened by a cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorMode {
    /// `BEGIN DEFERRED`: takes no write lock until the first write.
    Read,
    /// `BEGIN IMMEDIATE`: takes the write lock up front, so concurrent
    /// writers wait on the busy timeout instead of failing a lock upgrade.
    Write,
}

impl CursorMode {
    fn begin_sql(self) -> &'static str {
        match self {
            CursorMode::Read => "BEGIN DEFERRED",
            CursorMode::Write => "BEGIN IMMEDIATE",
        }
    }
}

/// An open transaction on a connection checked out of the pool.
///
/// Derefs to [`Connection`] for running statements inside the transaction.
pub struct ScopedCursor<'p> {
    conn: PooledConnection<'p>,
    finished: bool,
}

impl<'p> ScopedCursor<'p> {
    /// Acquires a connection and opens a transaction in `mode`.
    pub fn begin(pool: &'p ConnectionPool, mode: CursorMode) -> StoreResult<Self> {
        let conn = pool.acquire()?;
        conn.execute_batch(mode.begin_sql())?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    /// Commits the transaction. On failure the cursor still rolls back
    /// when dropped.
    pub fn commit(mut self) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    /// Rolls the transaction back. The connection is closed instead of
    /// cached if the rollback itself fails.
    pub fn rollback(mut self) -> StoreResult<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Deref for ScopedCursor<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for ScopedCursor<'_> {
    fn drop(&mut self) {
        if self.finished || self.conn.is_autocommit() {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            warn!(%err, "rollback failed, connection will be closed");
        }
    }
}

impl ConnectionPool {
    /// Runs `op` inside a scoped cursor.
    ///
    /// Commits if `op` returns `Ok`. Otherwise the transaction is rolled
    /// back and the original error is returned unchanged.
    pub fn scoped<T, F>(&self, mode: CursorMode, op: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let cursor = ScopedCursor::begin(self, mode)?;
        match op(&*cursor) {
            Ok(value) => {
                cursor.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = cursor.rollback() {
                    warn!(%rollback_err, "rollback after failed operation also failed");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::error::StoreError;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use tempfile::TempDir;

    fn test_pool(dir: &TempDir) -> ConnectionPool {
        let pool = ConnectionPool::from_config(&StoreConfig::at(dir.path().join("cursor.sqlite3")));
        pool.acquire()
            .unwrap()
            .execute_batch("CREATE TABLE t (v INTEGER NOT NULL UNIQUE)")
            .unwrap();
        pool
    }

    fn count(pool: &ConnectionPool) -> i64 {
        pool.scoped(CursorMode::Read, |conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn test_commit_on_success() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir);

        pool.scoped(CursorMode::Write, |conn| {
            conn.execute("INSERT INTO t (v) VALUES (1), (2)", [])?;
            Ok(())
        })
        .unwrap();

        assert_eq!(count(&pool), 2);
        assert_eq!(pool.idle_connections(), 1);
    }

    #[test]
    fn test_error_rolls_back_and_propagates_original() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir);

        let result: StoreResult<()> = pool.scoped(CursorMode::Write, |conn| {
            conn.execute("INSERT INTO t (v) VALUES (1)", [])?;
            conn.execute("INSERT INTO t (v) VALUES (1)", [])?;
            Ok(())
        });

        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));
        assert_eq!(count(&pool), 0);
        // Rolled-back connection is clean and goes back to the pool
        assert_eq!(pool.idle_connections(), 1);
    }

    #[test]
    fn test_dropped_cursor_rolls_back() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir);

        {
            let cursor = ScopedCursor::begin(&pool, CursorMode::Write).unwrap();
            cursor.execute("INSERT INTO t (v) VALUES (7)", []).unwrap();
        }

        assert_eq!(count(&pool), 0);
    }

    #[test]
    fn test_panic_rolls_back() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _: StoreResult<()> = pool.scoped(CursorMode::Write, |conn| {
                conn.execute("INSERT INTO t (v) VALUES (3)", [])?;
                panic!("operation blew up mid-transaction");
            });
        }));

        assert!(outcome.is_err());
        assert_eq!(count(&pool), 0);
    }

    #[test]
    fn test_explicit_commit_and_rollback() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(&dir);

        let cursor = ScopedCursor::begin(&pool, CursorMode::Write).unwrap();
        cursor.execute("INSERT INTO t (v) VALUES (1)", []).unwrap();
        cursor.commit().unwrap();

        let cursor = ScopedCursor::begin(&pool, CursorMode::Write).unwrap();
        cursor.execute("INSERT INTO t (v) VALUES (2)", []).unwrap();
        cursor.rollback().unwrap();

        assert_eq!(count(&pool), 1);
    }
}
