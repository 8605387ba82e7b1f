//! Repository seam between the pipeline and persistence.
//!
//! The reconciliation step and both worker pools depend on this trait rather
//! than on [`Store`] directly, so tests can substitute their own ledger.

use std::collections::HashSet;

use async_trait::async_trait;

use super::{CollectionMetadata, DownloadJob, Result, SaveOutcome, Store};
use crate::collection::CollectionId;

/// Data-access contract for the crawl pipeline.
#[async_trait]
pub trait CrawlRepository: Send + Sync {
    /// Total number of ledger rows.
    async fn ledger_count(&self) -> Result<u64>;

    /// Every identifier in the ledger.
    async fn ledger_ids(&self) -> Result<HashSet<String>>;

    /// Inserts rows for ids not yet present; returns how many were added.
    async fn insert_new_ids(&self, ids: &[CollectionId]) -> Result<u64>;

    /// Clears all state and reseeds the ledger with `ids`.
    async fn reset_ledger(&self, ids: &[CollectionId]) -> Result<u64>;

    /// Ids still waiting for metadata, in ledger order.
    async fn pending_metadata(&self) -> Result<Vec<CollectionId>>;

    /// Persists metadata and sets the metadata-fetched flag.
    async fn save_collection(&self, metadata: &CollectionMetadata) -> Result<SaveOutcome>;

    /// Jobs for fetched collections not yet fully downloaded.
    async fn pending_download_jobs(&self) -> Result<Vec<DownloadJob>>;

    /// Sets the download-complete flag.
    async fn mark_download_complete(&self, id: &CollectionId) -> Result<()>;
}

#[async_trait]
impl CrawlRepository for Store {
    async fn ledger_count(&self) -> Result<u64> {
        Store::ledger_count(self).await
    }

    async fn ledger_ids(&self) -> Result<HashSet<String>> {
        Store::ledger_ids(self).await
    }

    async fn insert_new_ids(&self, ids: &[CollectionId]) -> Result<u64> {
        Store::insert_new_ids(self, ids).await
    }

    async fn reset_ledger(&self, ids: &[CollectionId]) -> Result<u64> {
        Store::reset_ledger(self, ids).await
    }

    async fn pending_metadata(&self) -> Result<Vec<CollectionId>> {
        Store::pending_metadata(self).await
    }

    async fn save_collection(&self, metadata: &CollectionMetadata) -> Result<SaveOutcome> {
        Store::save_collection(self, metadata).await
    }

    async fn pending_download_jobs(&self) -> Result<Vec<DownloadJob>> {
        Store::pending_download_jobs(self).await
    }

    async fn mark_download_complete(&self, id: &CollectionId) -> Result<()> {
        Store::mark_download_complete(self, id).await
    }
}
