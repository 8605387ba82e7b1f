//! Error types for ledger and metadata store operations.

use thiserror::Error;

/// `SQLite` result codes (primary and extended) meaning another connection
/// holds the lock: BUSY, LOCKED, `BUSY_RECOVERY`, `LOCKED_SHAREDCACHE`, `BUSY_SNAPSHOT`.
const CONTENTION_CODES: [&str; 5] = ["5", "6", "261", "262", "517"];

/// Errors raised by the status ledger and metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another connection held the database, or no pooled connection came
    /// free in time. The same statement may succeed a moment later.
    #[error("database busy: {0}")]
    Busy(#[source] sqlx::Error),

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// No ledger row exists for the collection.
    #[error("collection {0} is not in the ledger")]
    NotInLedger(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_contention(&err) {
            Self::Busy(err)
        } else {
            Self::Database(err)
        }
    }
}

impl StoreError {
    /// True when retrying the same write may succeed.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

fn is_contention(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => {
            db_err
                .code()
                .is_some_and(|code| CONTENTION_CODES.contains(&code.as_ref()))
                || db_err.message().contains("database is locked")
        }
        _ => false,
    }
}
