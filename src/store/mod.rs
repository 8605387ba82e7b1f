//! Status ledger and metadata store backed by `SQLite`.
//!
//! The ledger (`download_record`) holds one row per discovered collection with
//! two flags:
//! - `status`: metadata fetched and stored
//! - `dl_status`: every image written to disk
//!
//! Flags only move from 0 to 1. The fetch pool is the sole writer of
//! `status`, the download pool the sole writer of `dl_status`; the only path
//! back to 0 is the full reset performed on bootstrap.
//!
//! # Example
//!
//! ```ignore
//! use gallery_sync::{Database, Store};
//! use gallery_sync::collection::CollectionId;
//!
//! let store = Store::new(Database::new_in_memory().await?);
//! let ids: Vec<CollectionId> = ["1001", "1002"].iter().filter_map(|s| CollectionId::parse(s)).collect();
//! store.insert_new_ids(&ids).await?;
//! for id in store.pending_metadata().await? {
//!     // fetch and save_collection(...)
//! }
//! ```

mod error;
mod ledger;
mod metadata;
mod repository;

pub use error::StoreError;
pub use ledger::LedgerEntry;
pub use metadata::{CollectionMetadata, CollectionRecord, DownloadJob, SaveOutcome};
pub use repository::CrawlRepository;

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Returns `Ok(())` if at least one row was affected; otherwise [`StoreError::NotInLedger`].
fn check_affected(collection_id: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::NotInLedger(collection_id.to_string()))
    } else {
        Ok(())
    }
}

/// Ledger and metadata access over a shared [`Database`].
///
/// Cloning is cheap; clones share the connection pool. Each statement is
/// atomic and each worker only touches rows of the collection it owns.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }
}
