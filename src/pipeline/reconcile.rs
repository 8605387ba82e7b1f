//! Reconciliation of the status ledger against the remote catalog.

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use crate::collection::CollectionId;
use crate::store::{CrawlRepository, StoreError};

/// What reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The ledger was below the bootstrap threshold: everything was cleared
    /// and `seeded` fresh rows inserted.
    Bootstrapped {
        /// Rows inserted.
        seeded: u64,
    },
    /// Only ids missing from the ledger were inserted.
    Incremental {
        /// Rows inserted.
        added: u64,
    },
    /// The catalog could not be read or was empty; the ledger is untouched.
    CatalogUnavailable,
}

impl ReconcileOutcome {
    /// Ledger rows created.
    #[must_use]
    pub fn added(&self) -> u64 {
        match self {
            Self::Bootstrapped { seeded } => *seeded,
            Self::Incremental { added } => *added,
            Self::CatalogUnavailable => 0,
        }
    }
}

/// Keeps only well-formed ids, dropping duplicates, preserving order.
#[must_use]
pub fn valid_ids(raw_ids: &[String]) -> Vec<CollectionId> {
    let mut seen = HashSet::new();
    let mut rejected = 0_usize;
    let mut ids = Vec::with_capacity(raw_ids.len());

    for raw in raw_ids {
        match CollectionId::parse(raw) {
            Some(id) => {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
            None => {
                rejected += 1;
                debug!(raw_id = %raw, "discarding malformed catalog id");
            }
        }
    }

    if rejected > 0 {
        info!(rejected, "malformed catalog ids discarded");
    }
    ids
}

/// Seeds the ledger from a catalog listing.
///
/// `catalog` is the enumerator's result: on error or an empty listing the
/// ledger is left as is and the run continues from existing state. When the
/// ledger holds fewer than `bootstrap_threshold` rows, the whole store is
/// reset and reseeded from the catalog; otherwise only new ids are inserted.
///
/// # Errors
///
/// Returns [`StoreError`] if the ledger cannot be read or written.
#[instrument(skip(repo, catalog))]
pub async fn reconcile<E: std::fmt::Display>(
    repo: &dyn CrawlRepository,
    catalog: Result<Vec<String>, E>,
    bootstrap_threshold: u64,
) -> Result<ReconcileOutcome, StoreError> {
    let raw_ids = match catalog {
        Ok(ids) => ids,
        Err(error) => {
            warn!(error = %error, "catalog unavailable, continuing with existing ledger");
            return Ok(ReconcileOutcome::CatalogUnavailable);
        }
    };

    let catalog_ids = valid_ids(&raw_ids);
    if catalog_ids.is_empty() {
        warn!(
            listed = raw_ids.len(),
            "catalog yielded no valid ids, continuing with existing ledger"
        );
        return Ok(ReconcileOutcome::CatalogUnavailable);
    }

    let ledger_rows = repo.ledger_count().await?;
    if ledger_rows < bootstrap_threshold {
        warn!(
            ledger_rows,
            bootstrap_threshold,
            catalog = catalog_ids.len(),
            "ledger below bootstrap threshold, resetting all state"
        );
        let seeded = repo.reset_ledger(&catalog_ids).await?;
        return Ok(ReconcileOutcome::Bootstrapped { seeded });
    }

    let existing = repo.ledger_ids().await?;
    let new_ids: Vec<CollectionId> = catalog_ids
        .into_iter()
        .filter(|id| !existing.contains(id.as_str()))
        .collect();

    let added = if new_ids.is_empty() {
        0
    } else {
        repo.insert_new_ids(&new_ids).await?
    };
    info!(ledger_rows, added, "ledger reconciled");
    Ok(ReconcileOutcome::Incremental { added })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{Database, Store};

    async fn store_with(rows: u64) -> Store {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let ids: Vec<CollectionId> = (0..rows)
            .filter_map(|n| CollectionId::parse(&format!("{}", 10_000 + n)))
            .collect();
        store.insert_new_ids(&ids).await.unwrap();
        store
    }

    fn catalog(range: std::ops::Range<u64>) -> Vec<String> {
        range.map(|n| format!("{}", 10_000 + n)).collect()
    }

    #[test]
    fn test_valid_ids_filters_and_dedupes() {
        let raw: Vec<String> = ["12", "7", "ab12", "12", "", "345"]
            .iter()
            .map(ToString::to_string)
            .collect();

        let ids: Vec<String> = valid_ids(&raw).iter().map(ToString::to_string).collect();

        assert_eq!(ids, vec!["12", "345"]);
    }

    #[tokio::test]
    async fn test_reconcile_incremental_adds_only_new() {
        let store = store_with(30).await;
        sqlx::query("UPDATE download_record SET status = 1")
            .execute(store.database().pool())
            .await
            .unwrap();

        let outcome = reconcile(&store, Ok::<_, String>(catalog(0..35)), 10)
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Incremental { added: 5 });
        assert_eq!(store.ledger_count().await.unwrap(), 35);
        assert_eq!(store.pending_metadata_count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_reconcile_bootstrap_resets() {
        let store = store_with(3).await;
        sqlx::query("UPDATE download_record SET status = 1")
            .execute(store.database().pool())
            .await
            .unwrap();

        let outcome = reconcile(&store, Ok::<_, String>(catalog(100..120)), 10)
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Bootstrapped { seeded: 20 });
        assert_eq!(store.ledger_count().await.unwrap(), 20);
        assert_eq!(store.pending_metadata_count().await.unwrap(), 20);
        assert!(store.ledger_entry("10000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reconcile_catalog_failure_keeps_ledger() {
        let store = store_with(3).await;

        let outcome = reconcile(&store, Err::<Vec<String>, _>("HTTP 503"), 10)
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::CatalogUnavailable);
        assert_eq!(store.ledger_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reconcile_empty_catalog_never_wipes() {
        let store = store_with(3).await;
        let junk = vec!["x".to_string(), "1".to_string()];

        let outcome = reconcile(&store, Ok::<_, String>(junk), 10).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::CatalogUnavailable);
        assert_eq!(store.ledger_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reconcile_malformed_ids_never_inserted() {
        let store = store_with(0).await;
        let raw = vec!["5".to_string(), "12x".to_string(), "4567".to_string()];

        reconcile(&store, Ok::<_, String>(raw), 0).await.unwrap();

        let ids = store.ledger_ids().await.unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains("4567"));
    }
}
