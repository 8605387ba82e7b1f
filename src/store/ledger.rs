//! Status ledger queries: seeding, reset, and flag reads/writes.

use std::collections::HashSet;

use sqlx::{FromRow, Row};
use tracing::{debug, instrument, warn};

use super::{Result, Store, check_affected};
use crate::collection::CollectionId;

/// One row of the status ledger.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct LedgerEntry {
    /// Catalog identifier.
    #[sqlx(rename = "collection_num")]
    pub collection_id: String,
    /// Metadata has been fetched and stored.
    #[sqlx(rename = "status")]
    pub metadata_fetched: bool,
    /// Every image is on disk.
    #[sqlx(rename = "dl_status")]
    pub download_complete: bool,
}

impl Store {
    /// Total number of ledger rows.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn ledger_count(&self) -> Result<u64> {
        let row = sqlx::query(r"SELECT COUNT(*) AS count FROM download_record")
            .fetch_one(self.db.pool())
            .await?;
        let count: i64 = row.get("count");
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Every identifier currently in the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn ledger_ids(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query(r"SELECT collection_num FROM download_record")
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("collection_num"))
            .collect())
    }

    /// Inserts ledger rows (both flags false) for ids not already present.
    ///
    /// Existing rows are left untouched. Returns how many rows were added.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if any insert fails; nothing is
    /// committed in that case.
    #[instrument(skip(self, ids), fields(candidates = ids.len()))]
    pub async fn insert_new_ids(&self, ids: &[CollectionId]) -> Result<u64> {
        let mut tx = self.db.pool().begin().await?;
        let mut added = 0;
        for id in ids {
            let result = sqlx::query(
                r"INSERT INTO download_record (collection_num) VALUES (?)
                  ON CONFLICT (collection_num) DO NOTHING",
            )
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected();
        }
        tx.commit().await?;

        debug!(added, "ledger rows inserted");
        Ok(added)
    }

    /// Clears every table and reseeds the ledger with `ids`.
    ///
    /// Runs in one transaction: either the old state survives intact or the
    /// fresh ledger replaces it. Returns the number of rows seeded.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if any statement fails.
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn reset_ledger(&self, ids: &[CollectionId]) -> Result<u64> {
        let mut tx = self.db.pool().begin().await?;

        // Children before parents so foreign keys hold at every step.
        for table in ["collection_tag", "image", "tag", "collection", "download_record"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }

        let mut seeded = 0;
        for id in ids {
            let result = sqlx::query(
                r"INSERT INTO download_record (collection_num) VALUES (?)
                  ON CONFLICT (collection_num) DO NOTHING",
            )
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
            seeded += result.rows_affected();
        }
        tx.commit().await?;

        warn!(seeded, "ledger reset and reseeded");
        Ok(seeded)
    }

    /// Ids whose metadata has not been fetched, in ledger insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn pending_metadata(&self) -> Result<Vec<CollectionId>> {
        let rows = sqlx::query(
            r"SELECT collection_num FROM download_record
              WHERE status = 0
              ORDER BY rowid ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let raw: String = row.get("collection_num");
                let parsed = CollectionId::parse(&raw);
                if parsed.is_none() {
                    warn!(collection_id = %raw, "skipping malformed ledger id");
                }
                parsed
            })
            .collect())
    }

    /// Number of ledger rows still waiting for metadata.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn pending_metadata_count(&self) -> Result<u64> {
        let row = sqlx::query(r"SELECT COUNT(*) AS count FROM download_record WHERE status = 0")
            .fetch_one(self.db.pool())
            .await?;
        let count: i64 = row.get("count");
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Flips `dl_status` to 1 for a collection whose metadata is stored.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::NotInLedger`] if no fetched row matches,
    /// or [`super::StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(collection_id = %id))]
    pub async fn mark_download_complete(&self, id: &CollectionId) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE download_record
              SET dl_status = 1, updated_at = datetime('now')
              WHERE collection_num = ? AND status = 1",
        )
        .bind(id.as_str())
        .execute(self.db.pool())
        .await?;

        check_affected(id.as_str(), result.rows_affected())
    }

    /// Reads one ledger row.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(collection_id = %id))]
    pub async fn ledger_entry(&self, id: &str) -> Result<Option<LedgerEntry>> {
        let entry = sqlx::query_as::<_, LedgerEntry>(
            r"SELECT collection_num, status, dl_status FROM download_record
              WHERE collection_num = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(entry)
    }
}
