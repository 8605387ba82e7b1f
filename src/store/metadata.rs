//! Collection metadata, tags, and materialised image URLs.

use sqlx::{FromRow, Row};
use tracing::{debug, instrument, warn};

use super::{Result, Store, check_affected};
use crate::collection::{CollectionId, ImageDate, UrlTemplate, assign_dir_names};

/// Parsed metadata ready to be persisted for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMetadata {
    /// Catalog identifier.
    pub id: CollectionId,
    /// Display name as shown on the collection page.
    pub name: String,
    /// Total number of images.
    pub image_count: u32,
    /// Prefix/suffix around each image's sequence index.
    pub template: UrlTemplate,
    /// Date components taken from the sample image URL.
    pub date: ImageDate,
    /// Tag names; duplicates are collapsed on save.
    pub tags: Vec<String>,
}

/// Stored collection row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CollectionRecord {
    #[sqlx(rename = "collection_num")]
    pub collection_id: String,
    pub name: String,
    #[sqlx(rename = "image_num")]
    pub image_count: i64,
    pub year: Option<String>,
    pub month: Option<String>,
    pub day: Option<String>,
    pub url_prefix: String,
    pub url_suffix: String,
}

impl CollectionRecord {
    /// URL template stored for this collection.
    #[must_use]
    pub fn template(&self) -> UrlTemplate {
        UrlTemplate::new(self.url_prefix.clone(), self.url_suffix.clone())
    }
}

/// What [`Store::save_collection`] did with the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// New rows were written.
    Inserted,
    /// A collection row already existed and was kept as is.
    AlreadyStored,
}

/// Everything a download worker needs for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    /// Ledger identifier of the collection.
    pub collection_id: CollectionId,
    /// Display name as stored.
    pub name: String,
    /// Directory under the base path, unique across stored collections.
    pub dir_name: String,
    /// Image URLs in sequence order.
    pub urls: Vec<String>,
}

impl Store {
    /// Persists a collection's metadata and flips its `status` flag.
    ///
    /// Tags are looked up or inserted by name, then linked. Image rows are
    /// derived from the template. Everything commits in one transaction
    /// together with the flag, so a stored collection always has its flag
    /// set and vice versa.
    ///
    /// Metadata already stored for this id is never overwritten; the flag is
    /// still set so the id leaves the pending set.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::NotInLedger`] if the id has no ledger row,
    /// or [`super::StoreError::Database`] if any statement fails. Nothing is
    /// committed on error.
    #[instrument(skip(self, metadata), fields(collection_id = %metadata.id, images = metadata.image_count))]
    pub async fn save_collection(&self, metadata: &CollectionMetadata) -> Result<SaveOutcome> {
        let mut tx = self.db.pool().begin().await?;
        let id = metadata.id.as_str();

        let inserted = sqlx::query(
            r"INSERT INTO collection (
                collection_num, name, image_num, year, month, day, url_prefix, url_suffix
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT (collection_num) DO NOTHING
              RETURNING collection_id",
        )
        .bind(id)
        .bind(&metadata.name)
        .bind(i64::from(metadata.image_count))
        .bind(metadata.date.year.as_deref())
        .bind(metadata.date.month.as_deref())
        .bind(metadata.date.day.as_deref())
        .bind(&metadata.template.prefix)
        .bind(&metadata.template.suffix)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = if let Some(row) = inserted {
            let collection_row_id: i64 = row.get("collection_id");

            let mut seen: Vec<&str> = Vec::with_capacity(metadata.tags.len());
            for tag in &metadata.tags {
                let tag = tag.trim();
                if tag.is_empty() || seen.contains(&tag) {
                    continue;
                }
                seen.push(tag);

                sqlx::query(r"INSERT INTO tag (tag_name) VALUES (?) ON CONFLICT (tag_name) DO NOTHING")
                    .bind(tag)
                    .execute(&mut *tx)
                    .await?;
                let tag_row = sqlx::query(r"SELECT tag_id FROM tag WHERE tag_name = ?")
                    .bind(tag)
                    .fetch_one(&mut *tx)
                    .await?;
                let tag_id: i64 = tag_row.get("tag_id");

                sqlx::query(
                    r"INSERT INTO collection_tag (collection_id, tag_id) VALUES (?, ?)
                      ON CONFLICT DO NOTHING",
                )
                .bind(collection_row_id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await?;
            }

            for (seq, url) in (1_i64..).zip(metadata.template.image_urls(metadata.image_count)) {
                sqlx::query(
                    r"INSERT INTO image (collection_num, seq, url) VALUES (?, ?, ?)
                      ON CONFLICT (collection_num, seq) DO NOTHING",
                )
                .bind(id)
                .bind(seq)
                .bind(&url)
                .execute(&mut *tx)
                .await?;
            }
            SaveOutcome::Inserted
        } else {
            debug!("collection already stored, keeping existing metadata");
            SaveOutcome::AlreadyStored
        };

        let flipped = sqlx::query(
            r"UPDATE download_record
              SET status = 1, updated_at = datetime('now')
              WHERE collection_num = ?",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        check_affected(id, flipped.rows_affected())?;

        tx.commit().await?;
        Ok(outcome)
    }

    /// Download jobs for collections with metadata but no completed download.
    ///
    /// Image URLs come from the materialised rows; if those are missing or
    /// short they are derived again from the stored template.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if a query fails.
    #[instrument(skip(self))]
    pub async fn pending_download_jobs(&self) -> Result<Vec<DownloadJob>> {
        let records = sqlx::query_as::<_, CollectionRecord>(
            r"SELECT c.collection_num, c.name, c.image_num, c.year, c.month, c.day,
                     c.url_prefix, c.url_suffix
              FROM download_record d
              JOIN collection c ON c.collection_num = d.collection_num
              WHERE d.status = 1 AND d.dl_status = 0
              ORDER BY d.rowid ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        // Directory names depend on every stored collection, not only the
        // pending ones, so a collection keeps its directory across runs.
        let stored: Vec<(String, String)> =
            sqlx::query_as("SELECT collection_num, name FROM collection")
                .fetch_all(self.db.pool())
                .await?;
        let stored: Vec<(CollectionId, String)> = stored
            .into_iter()
            .filter_map(|(id, name)| CollectionId::parse(&id).map(|id| (id, name)))
            .collect();
        let mut dir_names =
            assign_dir_names(stored.iter().map(|(id, name)| (id, name.as_str())));

        let mut jobs = Vec::with_capacity(records.len());
        for record in records {
            let Some(collection_id) = CollectionId::parse(&record.collection_id) else {
                warn!(collection_id = %record.collection_id, "skipping malformed stored id");
                continue;
            };

            let mut urls = self.image_urls(&record.collection_id).await?;
            let expected = u32::try_from(record.image_count).unwrap_or(0);
            if urls.len() != expected as usize {
                debug!(
                    collection_id = %record.collection_id,
                    stored = urls.len(),
                    expected,
                    "image rows incomplete, deriving from template"
                );
                urls = record.template().image_urls(expected);
            }

            let dir_name = dir_names
                .remove(&collection_id)
                .unwrap_or_else(|| collection_id.to_string());
            jobs.push(DownloadJob {
                collection_id,
                name: record.name,
                dir_name,
                urls,
            });
        }

        Ok(jobs)
    }

    /// Reads a stored collection row.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(collection_id = %id))]
    pub async fn collection(&self, id: &str) -> Result<Option<CollectionRecord>> {
        let record = sqlx::query_as::<_, CollectionRecord>(
            r"SELECT collection_num, name, image_num, year, month, day, url_prefix, url_suffix
              FROM collection WHERE collection_num = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(record)
    }

    /// Materialised image URLs of a collection, in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(collection_id = %id))]
    pub async fn image_urls(&self, id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(r"SELECT url FROM image WHERE collection_num = ? ORDER BY seq ASC")
            .bind(id)
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows.iter().map(|row| row.get::<String, _>("url")).collect())
    }

    /// Tag names linked to a collection, alphabetically.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(collection_id = %id))]
    pub async fn tags_for(&self, id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r"SELECT t.tag_name
              FROM tag t
              JOIN collection_tag ct ON ct.tag_id = t.tag_id
              JOIN collection c ON c.collection_id = ct.collection_id
              WHERE c.collection_num = ?
              ORDER BY t.tag_name ASC",
        )
        .bind(id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("tag_name"))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::store::StoreError;

    async fn seeded_store(raw_ids: &[&str]) -> Store {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let ids: Vec<CollectionId> = raw_ids.iter().filter_map(|s| CollectionId::parse(s)).collect();
        store.insert_new_ids(&ids).await.unwrap();
        store
    }

    fn metadata(id: &str, count: u32, tags: &[&str]) -> CollectionMetadata {
        let sample = "https://img.example.com/2020/05/10a01.jpg";
        CollectionMetadata {
            id: CollectionId::parse(id).unwrap(),
            name: format!("Collection {id}"),
            image_count: count,
            template: UrlTemplate::from_sample(sample).unwrap(),
            date: ImageDate::from_sample(sample),
            tags: tags.iter().map(ToString::to_string).collect(),
        }
    }

    #[tokio::test]
    async fn test_save_collection_writes_rows_and_flips_flag() {
        let store = seeded_store(&["500"]).await;

        let outcome = store
            .save_collection(&metadata("500", 12, &["beach", "summer"]))
            .await
            .unwrap();

        assert_eq!(outcome, SaveOutcome::Inserted);
        let record = store.collection("500").await.unwrap().unwrap();
        assert_eq!(record.image_count, 12);
        assert_eq!(record.year.as_deref(), Some("2020"));
        assert_eq!(record.month.as_deref(), Some("05"));
        assert_eq!(record.day.as_deref(), Some("10"));

        let urls = store.image_urls("500").await.unwrap();
        assert_eq!(urls.len(), 12);
        assert_eq!(urls[0], "https://img.example.com/2020/05/10a01.jpg");
        assert_eq!(urls[11], "https://img.example.com/2020/05/10a12.jpg");

        assert_eq!(store.tags_for("500").await.unwrap(), vec!["beach", "summer"]);
        assert!(store.ledger_entry("500").await.unwrap().unwrap().metadata_fetched);
    }

    #[tokio::test]
    async fn test_save_collection_shares_tags_between_collections() {
        let store = seeded_store(&["500", "501"]).await;

        store
            .save_collection(&metadata("500", 2, &["beach", "beach", " sun "]))
            .await
            .unwrap();
        store
            .save_collection(&metadata("501", 2, &["beach"]))
            .await
            .unwrap();

        let (tag_rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tag")
            .fetch_one(store.database().pool())
            .await
            .unwrap();
        assert_eq!(tag_rows, 2, "tags are deduplicated by name");
        assert_eq!(store.tags_for("500").await.unwrap(), vec!["beach", "sun"]);
        assert_eq!(store.tags_for("501").await.unwrap(), vec!["beach"]);
    }

    #[tokio::test]
    async fn test_save_collection_twice_keeps_first_metadata() {
        let store = seeded_store(&["500"]).await;
        store.save_collection(&metadata("500", 3, &[])).await.unwrap();

        let mut changed = metadata("500", 9, &[]);
        changed.name = "renamed".to_string();
        let outcome = store.save_collection(&changed).await.unwrap();

        assert_eq!(outcome, SaveOutcome::AlreadyStored);
        let record = store.collection("500").await.unwrap().unwrap();
        assert_eq!(record.name, "Collection 500");
        assert_eq!(store.image_urls("500").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_save_collection_without_ledger_row_rolls_back() {
        let store = seeded_store(&[]).await;

        let err = store
            .save_collection(&metadata("600", 3, &["beach"]))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::NotInLedger(_)));
        assert!(store.collection("600").await.unwrap().is_none());
        let (tag_rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tag")
            .fetch_one(store.database().pool())
            .await
            .unwrap();
        assert_eq!(tag_rows, 0);
    }

    #[tokio::test]
    async fn test_pending_download_jobs_only_fetched_and_incomplete() {
        let store = seeded_store(&["500", "501", "502"]).await;
        store.save_collection(&metadata("500", 2, &[])).await.unwrap();
        store.save_collection(&metadata("501", 3, &[])).await.unwrap();
        store
            .mark_download_complete(&CollectionId::parse("501").unwrap())
            .await
            .unwrap();

        let jobs = store.pending_download_jobs().await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].collection_id.as_str(), "500");
        assert_eq!(jobs[0].name, "Collection 500");
        assert_eq!(jobs[0].dir_name, "Collection 500");
        assert_eq!(
            jobs[0].urls,
            vec![
                "https://img.example.com/2020/05/10a01.jpg",
                "https://img.example.com/2020/05/10a02.jpg",
            ]
        );
    }

    #[tokio::test]
    async fn test_pending_download_jobs_rederives_missing_images() {
        let store = seeded_store(&["500"]).await;
        store.save_collection(&metadata("500", 4, &[])).await.unwrap();
        sqlx::query("DELETE FROM image WHERE collection_num = '500'")
            .execute(store.database().pool())
            .await
            .unwrap();

        let jobs = store.pending_download_jobs().await.unwrap();

        assert_eq!(jobs[0].urls.len(), 4);
        assert_eq!(jobs[0].urls[3], "https://img.example.com/2020/05/10a04.jpg");
    }

    #[tokio::test]
    async fn test_pending_download_jobs_dir_name_avoids_completed_namesake() {
        let store = seeded_store(&["500", "501"]).await;
        for id in ["500", "501"] {
            let mut same_name = metadata(id, 1, &[]);
            same_name.name = "Beach".to_string();
            store.save_collection(&same_name).await.unwrap();
        }
        store
            .mark_download_complete(&CollectionId::parse("500").unwrap())
            .await
            .unwrap();

        let jobs = store.pending_download_jobs().await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "Beach");
        assert_eq!(jobs[0].dir_name, "Beach (501)");
    }
}
