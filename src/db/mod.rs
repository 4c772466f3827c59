//! Database module for speaker enrollment persistence

mod schema;
pub mod speaker;

use std::path::Path;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::ErrorCode;

use crate::{Error, Result};

pub use schema::SCHEMA_VERSION;
pub use speaker::{SpeakerRepo, StoredSpeaker};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// How long `SQLite` waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Attempts made by [`with_busy_retry`]
const BUSY_RETRIES: u32 = 3;

/// Initialize the database
///
/// # Errors
///
/// Returns error if database cannot be opened or initialized
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager =
        SqliteConnectionManager::file(path).with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    // Run migrations on first connection
    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;

    tracing::info!(version = SCHEMA_VERSION, "database initialized");
    Ok(pool)
}

/// Initialize an in-memory database (for testing)
///
/// # Errors
///
/// Returns error if database cannot be initialized
pub fn init_memory() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;

    Ok(pool)
}

/// Run `op`, retrying a bounded number of times while the database is busy
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or any non-busy error
/// immediately
pub fn with_busy_retry<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(Error::Sqlite(rusqlite::Error::SqliteFailure(e, _)))
                if attempt < BUSY_RETRIES
                    && matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                tracing::debug!(attempt, "database busy, retrying");
                std::thread::sleep(Duration::from_millis(25 * u64::from(attempt)));
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_memory() {
        let pool = init_memory().unwrap();
        let _conn = pool.get().unwrap();
    }

    #[test]
    fn test_busy_retry_is_bounded() {
        let mut calls = 0;
        let result: Result<()> = with_busy_retry(|| {
            calls += 1;
            Err(Error::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                None,
            )))
        });
        assert!(result.is_err());
        assert_eq!(calls, BUSY_RETRIES);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<()> = with_busy_retry(|| {
            calls += 1;
            Err(Error::Database("nope".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
