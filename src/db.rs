//! Database connection and schema management.
//!
//! This module provides SQLite database connectivity with:
//! - Connection pool management
//! - WAL mode so the ledger can be read while a worker commits
//! - Idempotent schema creation through embedded migrations
//!
//! # Example
//!
//! ```no_run
//! use gallery_sync::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("gallery.db")).await?;
//! // Hand db to a Store...
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::instrument;

/// Default maximum number of connections in the pool.
/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in milliseconds.
/// Connections will wait this long before returning SQLITE_BUSY.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Database connection wrapper with connection pool.
///
/// Cloning is cheap; every clone shares the same pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database file at `db_path`.
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Enable WAL mode and a busy timeout
    /// 3. Create any missing tables
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if schema creation fails.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// The pool holds a single connection so every statement sees the same
    /// in-memory database; statements are serialized through it.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if schema creation fails.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Gracefully closes all connections in the pool.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_new_in_memory_succeeds() {
        let db = Database::new_in_memory().await;
        assert!(db.is_ok(), "Failed to create in-memory database");
    }

    #[tokio::test]
    async fn test_database_ledger_table_exists() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query("INSERT INTO download_record (collection_num) VALUES ('12345')")
            .execute(db.pool())
            .await;

        assert!(result.is_ok(), "download_record should exist after migration");
    }

    #[tokio::test]
    async fn test_database_ledger_flags_default_to_zero() {
        let db = Database::new_in_memory().await.unwrap();
        sqlx::query("INSERT INTO download_record (collection_num) VALUES ('12345')")
            .execute(db.pool())
            .await
            .unwrap();

        let (status, dl_status): (i64, i64) = sqlx::query_as(
            "SELECT status, dl_status FROM download_record WHERE collection_num = '12345'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();

        assert_eq!((status, dl_status), (0, 0));
    }

    #[tokio::test]
    async fn test_database_flag_check_constraint() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO download_record (collection_num, status) VALUES ('12345', 7)",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_err(), "flags outside 0/1 should be rejected");
    }

    #[tokio::test]
    async fn test_database_tag_names_unique() {
        let db = Database::new_in_memory().await.unwrap();
        sqlx::query("INSERT INTO tag (tag_name) VALUES ('beach')")
            .execute(db.pool())
            .await
            .unwrap();

        let duplicate = sqlx::query("INSERT INTO tag (tag_name) VALUES ('beach')")
            .execute(db.pool())
            .await;

        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_database_with_tempfile() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).await;
        assert!(db.is_ok(), "Failed to create database at temp path");

        let db = db.unwrap();
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert!(mode.eq_ignore_ascii_case("wal"));
    }

    #[tokio::test]
    async fn test_database_reopen_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        Database::new(&db_path).await.unwrap().close().await;
        let reopened = Database::new(&db_path).await;

        assert!(reopened.is_ok(), "schema creation must tolerate existing tables");
    }
}
