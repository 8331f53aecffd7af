use bytes::Bytes;
use object_browser::{
    models::{
        entry::{EntryKind, SortKey, SortOrder},
        outcome::OutcomeStatus,
    },
    services::{BrowserService, metadata::BucketMetadataStore},
    store::{InMemoryStore, ObjectStore},
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

const BUCKET: &str = "photos";

async fn browser(page_size: usize) -> (Arc<InMemoryStore>, BrowserService) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let metadata = BucketMetadataStore::new(Arc::new(pool));
    metadata.migrate().await.unwrap();

    let store = Arc::new(InMemoryStore::new().with_page_size(page_size));
    store.ensure_bucket(BUCKET).await.unwrap();
    (store.clone(), BrowserService::new(store, metadata))
}

async fn seed(store: &InMemoryStore, keys: &[&str]) {
    for key in keys {
        let body = if key.ends_with('/') {
            Bytes::new()
        } else {
            Bytes::from(key.as_bytes().to_vec())
        };
        store.put(BUCKET, key, body, None).await.unwrap();
    }
}

async fn settle(service: &BrowserService) {
    while service.sizes().is_pending(BUCKET) {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn listing_is_identical_for_any_page_size() {
    let keys = [
        "2023/",
        "2023/jan/a.jpg",
        "2023/jan/b.jpg",
        "2023/feb/c.jpg",
        "2024/x.png",
        "cover.jpg",
        "README",
    ];

    let mut listings = Vec::new();
    for page_size in [1, 3, 1000] {
        let (store, service) = browser(page_size).await;
        seed(&store, &keys).await;
        let entries = service
            .list_folder(BUCKET, "", SortKey::Name, SortOrder::Asc)
            .await
            .unwrap();
        // Timestamps differ between separately seeded stores.
        let shape: Vec<_> = entries
            .into_iter()
            .map(|e| (e.key, e.name, e.kind, e.size))
            .collect();
        listings.push(shape);
    }

    assert!(listings.windows(2).all(|pair| pair[0] == pair[1]));
    let names: Vec<_> = listings[0].iter().map(|e| e.1.as_str()).collect();
    assert_eq!(names, vec!["2023", "2024", "cover.jpg", "README"]);
    assert_eq!(listings[0][0].2, EntryKind::Folder);
}

#[tokio::test]
async fn deleting_an_absent_folder_is_a_noop() {
    let (_store, service) = browser(2).await;
    let outcome = service
        .delete(BUCKET, &["nothing/here/".to_string()])
        .await
        .unwrap();
    assert_eq!(outcome.status(), OutcomeStatus::Noop);
    assert!(outcome.failed_keys.is_empty());
    assert!(!service.sizes().is_pending(BUCKET));
}

#[tokio::test]
async fn folder_rename_moves_marker_and_descendants() {
    let (store, service) = browser(1).await;
    seed(&store, &["a/", "a/x", "a/y/z", "keep.txt"]).await;

    let outcome = service.rename(BUCKET, "a/", "b/").await.unwrap();
    assert_eq!(outcome.status(), OutcomeStatus::Succeeded);
    assert_eq!(outcome.succeeded_keys.len(), 3);
    assert_eq!(store.keys(BUCKET), vec!["b/", "b/x", "b/y/z", "keep.txt"]);
}

#[tokio::test]
async fn partial_copy_is_reported_key_by_key() {
    let (store, service) = browser(2).await;
    seed(&store, &["src/1", "src/2", "src/3"]).await;
    store.fail_copy("src/2");

    let outcome = service.copy(BUCKET, "src/", "dst/").await.unwrap();
    assert_eq!(outcome.status(), OutcomeStatus::Partial);
    assert_eq!(outcome.failed_keys, vec!["src/2"]);
    assert!(outcome.error.is_some());
    assert!(store.keys(BUCKET).contains(&"dst/3".to_string()));
}

#[tokio::test]
async fn size_follows_uploads_and_deletes() {
    let (_store, service) = browser(2).await;
    service
        .upload(BUCKET, "a/big.bin", Bytes::from(vec![1u8; 2048]), None)
        .await
        .unwrap();
    service
        .upload(BUCKET, "a/small.bin", Bytes::from(vec![1u8; 10]), None)
        .await
        .unwrap();
    settle(&service).await;
    let after_upload = service.bucket_size(BUCKET).await.unwrap().unwrap();
    assert_eq!(after_upload, 2058);

    service.delete(BUCKET, &["a/".to_string()]).await.unwrap();
    settle(&service).await;
    let after_delete = service.bucket_size(BUCKET).await.unwrap().unwrap();
    assert!(after_delete <= after_upload);
    assert_eq!(after_delete, 0);
}

#[tokio::test]
async fn zip_download_streams_folder_contents() {
    let (store, service) = browser(2).await;
    seed(&store, &["albums/summer/", "albums/summer/beach.jpg", "albums/summer/sea.jpg"]).await;

    let mut archive = service.zip_folder(BUCKET, "albums/summer").await.unwrap();
    assert_eq!(archive.filename, "summer.zip");

    let mut bytes = Vec::new();
    archive.read_to_end(&mut bytes).await.unwrap();
    assert!(bytes.starts_with(b"PK\x03\x04"));
    let local_headers = bytes.windows(4).filter(|w| *w == b"PK\x03\x04").count();
    assert_eq!(local_headers, 2);
}
