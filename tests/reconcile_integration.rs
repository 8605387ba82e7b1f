//! Integration tests for catalog reconciliation against a file-backed ledger.

use gallery_sync::collection::{CollectionId, ImageDate, UrlTemplate};
use gallery_sync::pipeline::{Pipeline, ReconcileOutcome, reconcile};
use gallery_sync::store::CollectionMetadata;
use gallery_sync::Store;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;
use support::{catalog_html, file_store, ids, numeric_ids, test_config};

fn metadata(id: &str) -> CollectionMetadata {
    CollectionMetadata {
        id: CollectionId::parse(id).unwrap(),
        name: format!("Collection {id}"),
        image_count: 2,
        template: UrlTemplate::new("https://img.example.net/2020/05/10a", ".jpg"),
        date: ImageDate::default(),
        tags: vec!["beach".to_string()],
    }
}

async fn seed(store: &Store, raw: &[String]) {
    let parsed: Vec<CollectionId> = raw.iter().filter_map(|s| CollectionId::parse(s)).collect();
    store.insert_new_ids(&parsed).await.unwrap();
}

#[tokio::test]
async fn test_small_ledger_is_reset_from_catalog() {
    let temp_dir = TempDir::new().unwrap();
    let store = file_store(temp_dir.path()).await;
    seed(&store, &numeric_ids(10, 5)).await;
    store.save_collection(&metadata("10")).await.unwrap();

    let mut catalog = numeric_ids(100_000, 3000);
    catalog.push("abc".to_string());
    catalog.push("7".to_string());
    catalog.push("12x4".to_string());

    let outcome = reconcile(store.as_ref(), Ok::<_, String>(catalog), 2000)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Bootstrapped { seeded: 3000 });
    assert_eq!(store.ledger_count().await.unwrap(), 3000);
    assert!(store.ledger_entry("10").await.unwrap().is_none());
    assert!(store.collection("10").await.unwrap().is_none());
    assert!(store.tags_for("10").await.unwrap().is_empty());
    assert_eq!(store.pending_metadata_count().await.unwrap(), 3000);
}

#[tokio::test]
async fn test_large_ledger_only_gains_new_ids() {
    let temp_dir = TempDir::new().unwrap();
    let store = file_store(temp_dir.path()).await;
    let existing = numeric_ids(10_000, 2500);
    seed(&store, &existing).await;
    store.save_collection(&metadata("10000")).await.unwrap();

    let mut catalog = existing.clone();
    catalog.extend(numeric_ids(50_000, 10));

    let outcome = reconcile(store.as_ref(), Ok::<_, String>(catalog), 2000)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Incremental { added: 10 });
    assert_eq!(store.ledger_count().await.unwrap(), 2510);

    let untouched = store.ledger_entry("10000").await.unwrap().unwrap();
    assert!(untouched.metadata_fetched);
    assert!(store.collection("10000").await.unwrap().is_some());

    let added = store.ledger_entry("50009").await.unwrap().unwrap();
    assert!(!added.metadata_fetched);
    assert!(!added.download_complete);
}

#[tokio::test]
async fn test_unreachable_catalog_keeps_ledger() {
    let temp_dir = TempDir::new().unwrap();
    let store = file_store(temp_dir.path()).await;
    seed(&store, &numeric_ids(10, 5)).await;

    let outcome = reconcile(store.as_ref(), Err::<Vec<String>, _>("connection refused"), 2000)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::CatalogUnavailable);
    assert_eq!(store.ledger_count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_catalog_of_only_malformed_ids_keeps_ledger() {
    let temp_dir = TempDir::new().unwrap();
    let store = file_store(temp_dir.path()).await;
    seed(&store, &numeric_ids(10, 5)).await;

    let catalog = vec!["tag".to_string(), "5".to_string(), String::new()];
    let outcome = reconcile(store.as_ref(), Ok::<_, String>(catalog), 2000)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::CatalogUnavailable);
    assert_eq!(store.ledger_count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_sync_catalog_reads_remote_listing() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    let base = mock_server.uri();
    Mock::given(method("GET"))
        .and(path("/all/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(catalog_html(
            &base,
            &["2001", "2002", "old", "2003", "2001"],
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let store = file_store(temp_dir.path()).await;
    let config = test_config(&temp_dir.path().join("images"), &base);
    let pipeline = Pipeline::new(config, store.clone()).unwrap();

    let outcome = pipeline.sync_catalog().await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Bootstrapped { seeded: 3 });
    assert_eq!(
        store.pending_metadata().await.unwrap(),
        ids(&["2001", "2002", "2003"])
    );
    assert_eq!(pipeline.stats().snapshot().ids_added, 3);
}

#[tokio::test]
async fn test_sync_catalog_server_error_leaves_state() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/all/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let store = file_store(temp_dir.path()).await;
    seed(&store, &numeric_ids(10, 5)).await;
    let config = test_config(&temp_dir.path().join("images"), &mock_server.uri());
    let pipeline = Pipeline::new(config, store.clone()).unwrap();

    let outcome = pipeline.sync_catalog().await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::CatalogUnavailable);
    assert_eq!(store.ledger_count().await.unwrap(), 5);
}
