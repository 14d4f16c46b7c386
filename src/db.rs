//! SQLite-backed storage with a bounded connection pool.
//!
//! A pool of up to `pool_size` connections (r2d2) instead of a single
//! `Arc<Mutex<Connection>>` so WAL-mode reads can parallelise. Writes are
//! still serialised by SQLite's own page lock + busy_timeout.
//!
//! Read/write helpers are fail-soft: storage trouble is logged and degrades
//! to an absent value (`None`, empty vec, 0) so a flaky disk cannot take the
//! whole service down. The one fail-loud path is [`Database::with_transaction`],
//! where multi-statement account provisioning must either fully commit or
//! fully roll back.
//!
//! Tables:
//! - `users`: email, password_hash, name, morse_code, avatar_url, created_at
//! - `user_settings`: per-user display and life-calculation preferences
//! - `core_attributes`: the six 0..1 attribute scores + last_sync_at

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Params, Row, Transaction, TransactionBehavior};
use std::time::Duration;
use thiserror::Error;

use crate::config::DatabaseConfig;

/// A connection checked out of the pool, returned on drop.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Storage-layer failures that callers may need to distinguish.
#[derive(Debug, Error)]
pub enum DbError {
    /// The pool is closed or both acquisition attempts failed.
    #[error("connection pool unavailable")]
    PoolUnavailable,
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        email         TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        name          TEXT NOT NULL,
        morse_code    TEXT,
        avatar_url    TEXT,
        created_at    TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS user_settings (
        user_id           INTEGER PRIMARY KEY REFERENCES users(id),
        language          TEXT    NOT NULL DEFAULT 'zh-TW',
        birth_date        TEXT    NOT NULL DEFAULT '1990-01-01',
        birth_time        TEXT    NOT NULL DEFAULT '00:00:00',
        expectancy_preset TEXT    NOT NULL DEFAULT 'average',
        custom_expectancy INTEGER NOT NULL DEFAULT 85,
        sleep_offset      REAL    NOT NULL DEFAULT 8.0,
        today_sleep_time  REAL    NOT NULL DEFAULT 8.0,
        today_work_time   REAL    NOT NULL DEFAULT 8.0,
        work_start        TEXT    NOT NULL DEFAULT '09:00',
        work_end          TEXT    NOT NULL DEFAULT '18:00',
        decimal_precision INTEGER NOT NULL DEFAULT 6,
        sound_enabled     INTEGER NOT NULL DEFAULT 0,
        gravity_enabled   INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS core_attributes (
        user_id      INTEGER PRIMARY KEY REFERENCES users(id),
        health       REAL NOT NULL DEFAULT 0.5,
        mind         REAL NOT NULL DEFAULT 0.5,
        skill        REAL NOT NULL DEFAULT 0.5,
        social       REAL NOT NULL DEFAULT 0.5,
        adventure    REAL NOT NULL DEFAULT 0.5,
        spirit       REAL NOT NULL DEFAULT 0.5,
        last_sync_at TEXT NOT NULL
    );";

/// Bounded SQLite connection pool plus the query helpers built on it.
///
/// The pool lives behind `Mutex<Option<…>>` so [`Database::shutdown`] can
/// drop it exactly once while concurrent callers observe a closed pool
/// instead of a dangling one.
#[derive(Debug)]
pub struct Database {
    pool: Mutex<Option<Pool<SqliteConnectionManager>>>,
}

impl Database {
    /// Open (or create) the database at the configured path and warm the pool.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if config.pool_size == 0 {
            bail!("database pool_size must be at least 1");
        }
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        // WAL mode for concurrent reads + crash safety; busy_timeout makes
        // writers queue instead of erroring under contention.
        let busy_timeout_ms = config.busy_timeout_ms;
        let manager = SqliteConnectionManager::file(&config.path).with_init(move |conn| {
            conn.execute_batch(&format!(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = {busy_timeout_ms};"
            ))
        });

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .build(manager)
            .with_context(|| {
                format!("failed to build connection pool for {}", config.path.display())
            })?;

        pool.get()
            .context("failed to acquire connection for schema init")?
            .execute_batch(SCHEMA)
            .context("failed to initialize database schema")?;

        tracing::info!(
            path = %config.path.display(),
            pool_size = config.pool_size,
            "database pool initialized"
        );

        Ok(Self {
            pool: Mutex::new(Some(pool)),
        })
    }

    // ── Connection Lifecycle ────────────────────────────────────────

    /// Check a connection out of the pool, retrying exactly once on failure.
    pub fn acquire(&self) -> Result<PooledConnection, DbError> {
        let pool = self
            .pool
            .lock()
            .as_ref()
            .cloned()
            .ok_or(DbError::PoolUnavailable)?;

        match pool.get() {
            Ok(conn) => Ok(conn),
            Err(first) => {
                tracing::warn!("connection acquisition failed, retrying once: {first}");
                pool.get().map_err(|second| {
                    tracing::error!("connection acquisition failed again: {second}");
                    DbError::PoolUnavailable
                })
            }
        }
    }

    /// Drop the pool, releasing every connection. Safe to call repeatedly;
    /// later fail-soft calls return absent values and [`Database::acquire`]
    /// reports [`DbError::PoolUnavailable`].
    pub fn shutdown(&self) {
        if self.pool.lock().take().is_some() {
            tracing::info!("database pool closed");
        }
    }

    // ── Fail-Soft Helpers ───────────────────────────────────────────

    /// Run a single-row query. Absence and failure both yield `None`;
    /// failures are logged here, never surfaced.
    pub fn query_one<T, P, F>(&self, sql: &str, params: P, map: F) -> Option<T>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = match self.acquire() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("query_one: {e}");
                return None;
            }
        };
        match conn.query_row(sql, params, map) {
            Ok(value) => Some(value),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                tracing::error!("query_one failed: {e}");
                None
            }
        }
    }

    /// Run a multi-row query, preserving statement order. Failure yields an
    /// empty vec.
    pub fn query_all<T, P, F>(&self, sql: &str, params: P, map: F) -> Vec<T>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = match self.acquire() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("query_all: {e}");
                return Vec::new();
            }
        };
        let mut stmt = match conn.prepare(sql) {
            Ok(stmt) => stmt,
            Err(e) => {
                tracing::error!("query_all prepare failed: {e}");
                return Vec::new();
            }
        };
        let rows = match stmt.query_map(params, map) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("query_all failed: {e}");
                return Vec::new();
            }
        };
        match rows.collect::<rusqlite::Result<Vec<_>>>() {
            Ok(values) => values,
            Err(e) => {
                tracing::error!("query_all row mapping failed: {e}");
                Vec::new()
            }
        }
    }

    /// Run a single auto-committed statement. Returns the affected-row
    /// count, or 0 when anything goes wrong.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> usize {
        let conn = match self.acquire() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("execute: {e}");
                return 0;
            }
        };
        match conn.execute(sql, params) {
            Ok(count) => count,
            Err(e) => {
                tracing::error!("execute failed: {e}");
                0
            }
        }
    }

    /// Run a single INSERT and return the generated rowid, or 0 on failure.
    pub fn insert_and_get_id<P: Params>(&self, sql: &str, params: P) -> i64 {
        let conn = match self.acquire() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("insert_and_get_id: {e}");
                return 0;
            }
        };
        match conn.execute(sql, params) {
            Ok(_) => conn.last_insert_rowid(),
            Err(e) => {
                tracing::error!("insert_and_get_id failed: {e}");
                0
            }
        }
    }

    // ── Scoped Transactions ─────────────────────────────────────────

    /// Run `f` inside one immediate-mode transaction: the write lock is
    /// taken at BEGIN, so a scope that reads before writing never has to
    /// upgrade mid-transaction, and racing writers queue on the busy
    /// timeout instead. A normal return commits; any `Err` (or unwind)
    /// rolls the whole transaction back and the error reaches the caller
    /// unchanged. The connection returns to the pool on every exit path.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<DbError>,
    {
        let mut conn = self.acquire()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(DbError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(DbError::from)?;
        Ok(value)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_db(pool_size: u32) -> (TempDir, Database) {
        let tmp = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: tmp.path().join("chronos.db"),
            pool_size,
            ..DatabaseConfig::default()
        };
        let db = Database::open(&config).unwrap();
        (tmp, db)
    }

    fn insert_user(db: &Database, email: &str) -> i64 {
        db.insert_and_get_id(
            "INSERT INTO users (email, password_hash, name, created_at)
             VALUES (?1, 'x', 'Test', '2024-01-01T00:00:00+00:00')",
            params![email],
        )
    }

    #[test]
    fn open_creates_schema() {
        let (_tmp, db) = test_db(2);
        let tables = db.query_all(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
            [],
            |row| row.get::<_, String>(0),
        );
        assert!(tables.contains(&"users".to_string()));
        assert!(tables.contains(&"user_settings".to_string()));
        assert!(tables.contains(&"core_attributes".to_string()));
    }

    #[test]
    fn open_rejects_a_zero_pool_size() {
        let tmp = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: tmp.path().join("chronos.db"),
            pool_size: 0,
            ..DatabaseConfig::default()
        };
        let err = Database::open(&config).unwrap_err();
        assert!(err.to_string().contains("pool_size"));
    }

    #[test]
    fn execute_and_query_one_round_trip() {
        let (_tmp, db) = test_db(2);
        let inserted = db.execute(
            "INSERT INTO users (email, password_hash, name, created_at)
             VALUES ('a@b.c', 'hash', 'Alice', '2024-01-01T00:00:00+00:00')",
            [],
        );
        assert_eq!(inserted, 1);

        let name = db.query_one(
            "SELECT name FROM users WHERE email = ?1",
            params!["a@b.c"],
            |row| row.get::<_, String>(0),
        );
        assert_eq!(name.as_deref(), Some("Alice"));
    }

    #[test]
    fn query_one_absent_row_is_none() {
        let (_tmp, db) = test_db(2);
        let missing = db.query_one(
            "SELECT name FROM users WHERE email = ?1",
            params!["nobody@example.com"],
            |row| row.get::<_, String>(0),
        );
        assert!(missing.is_none());
    }

    #[test]
    fn query_one_bad_sql_fails_soft() {
        let (_tmp, db) = test_db(2);
        let result = db.query_one("SELECT FROM no_such_table", [], |row| {
            row.get::<_, String>(0)
        });
        assert!(result.is_none());
    }

    #[test]
    fn query_all_preserves_order_and_fails_soft() {
        let (_tmp, db) = test_db(2);
        for email in ["c@x.y", "a@x.y", "b@x.y"] {
            insert_user(&db, email);
        }

        let emails = db.query_all(
            "SELECT email FROM users ORDER BY email",
            [],
            |row| row.get::<_, String>(0),
        );
        assert_eq!(emails, vec!["a@x.y", "b@x.y", "c@x.y"]);

        let broken = db.query_all("SELECT email FROM no_such_table", [], |row| {
            row.get::<_, String>(0)
        });
        assert!(broken.is_empty());
    }

    #[test]
    fn execute_bad_sql_returns_zero() {
        let (_tmp, db) = test_db(2);
        assert_eq!(db.execute("UPDATE no_such_table SET x = 1", []), 0);
    }

    #[test]
    fn insert_and_get_id_returns_rowid_and_zero_on_conflict() {
        let (_tmp, db) = test_db(2);
        let first = insert_user(&db, "dup@example.com");
        assert!(first > 0);

        // UNIQUE violation on email degrades to 0, not an error.
        let second = insert_user(&db, "dup@example.com");
        assert_eq!(second, 0);
    }

    #[test]
    fn transaction_commits_on_success() {
        let (_tmp, db) = test_db(2);
        let user_id: i64 = db
            .with_transaction(|tx| {
                tx.execute(
                    "INSERT INTO users (email, password_hash, name, created_at)
                     VALUES ('tx@x.y', 'h', 'Tx', '2024-01-01T00:00:00+00:00')",
                    [],
                )
                .map_err(DbError::from)?;
                let id = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO core_attributes (user_id, last_sync_at)
                     VALUES (?1, '2024-01-01T00:00:00+00:00')",
                    params![id],
                )
                .map_err(DbError::from)?;
                Ok::<_, DbError>(id)
            })
            .unwrap();

        let count: Option<i64> = db.query_one(
            "SELECT COUNT(*) FROM core_attributes WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        );
        assert_eq!(count, Some(1));
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let (_tmp, db) = test_db(2);
        let result: Result<(), DbError> = db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO users (email, password_hash, name, created_at)
                 VALUES ('rollback@x.y', 'h', 'Rb', '2024-01-01T00:00:00+00:00')",
                [],
            )
            .map_err(DbError::from)?;
            // Second statement fails: table does not exist.
            tx.execute("INSERT INTO no_such_table (x) VALUES (1)", [])
                .map_err(DbError::from)?;
            Ok(())
        });
        assert!(result.is_err());

        let count: Option<i64> = db.query_one(
            "SELECT COUNT(*) FROM users WHERE email = 'rollback@x.y'",
            [],
            |row| row.get(0),
        );
        assert_eq!(count, Some(0));
    }

    #[test]
    fn transaction_propagates_caller_errors_unchanged() {
        let (_tmp, db) = test_db(2);

        #[derive(Debug, PartialEq)]
        enum TestError {
            Domain,
            Storage,
        }
        impl From<DbError> for TestError {
            fn from(_: DbError) -> Self {
                TestError::Storage
            }
        }

        let result: Result<(), TestError> = db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO users (email, password_hash, name, created_at)
                 VALUES ('domain@x.y', 'h', 'D', '2024-01-01T00:00:00+00:00')",
                [],
            )
            .map_err(DbError::from)
            .map_err(TestError::from)?;
            Err(TestError::Domain)
        });
        assert_eq!(result.unwrap_err(), TestError::Domain);

        // The domain error rolled the insert back too.
        let count: Option<i64> = db.query_one(
            "SELECT COUNT(*) FROM users WHERE email = 'domain@x.y'",
            [],
            |row| row.get(0),
        );
        assert_eq!(count, Some(0));
    }

    #[test]
    fn shutdown_is_idempotent_and_later_calls_degrade() {
        let (_tmp, db) = test_db(2);
        insert_user(&db, "pre@shutdown.example");

        db.shutdown();
        db.shutdown();

        assert!(matches!(db.acquire(), Err(DbError::PoolUnavailable)));
        assert!(db
            .query_one("SELECT COUNT(*) FROM users", [], |row| row.get::<_, i64>(0))
            .is_none());
        assert!(db.query_all("SELECT email FROM users", [], |row| row
            .get::<_, String>(0))
            .is_empty());
        assert_eq!(db.execute("DELETE FROM users", []), 0);
        assert_eq!(insert_user(&db, "post@shutdown.example"), 0);

        let tx_result: Result<(), DbError> = db.with_transaction(|_tx| Ok(()));
        assert!(matches!(tx_result, Err(DbError::PoolUnavailable)));
    }

    #[test]
    fn pool_stays_bounded_under_concurrent_load() {
        let (_tmp, db) = test_db(4);
        let db = Arc::new(db);

        let mut handles = Vec::new();
        for t in 0..8 {
            let db = Arc::clone(&db);
            handles.push(std::thread::spawn(move || {
                for i in 0..25 {
                    let email = format!("user{t}_{i}@example.com");
                    let id = db.insert_and_get_id(
                        "INSERT INTO users (email, password_hash, name, created_at)
                         VALUES (?1, 'h', 'Load', '2024-01-01T00:00:00+00:00')",
                        params![email],
                    );
                    assert!(id > 0);
                    let read_back = db.query_one(
                        "SELECT id FROM users WHERE email = ?1",
                        params![email],
                        |row| row.get::<_, i64>(0),
                    );
                    assert_eq!(read_back, Some(id));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let total: Option<i64> = db.query_one("SELECT COUNT(*) FROM users", [], |row| row.get(0));
        assert_eq!(total, Some(200));

        // No leaked connections: the pool never exceeded its bound.
        let state = db.pool.lock().as_ref().unwrap().state();
        assert!(state.connections <= 4);
        assert!(db.acquire().is_ok());
    }
}
