use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use object_browser::{
    routes::routes::routes,
    services::{BrowserService, metadata::BucketMetadataStore},
    store::{InMemoryStore, ObjectStore},
};
use serde_json::{Value, json};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tower::ServiceExt;

async fn app() -> (Arc<InMemoryStore>, Router) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let metadata = BucketMetadataStore::new(Arc::new(pool));
    metadata.migrate().await.unwrap();

    let store = Arc::new(InMemoryStore::new().with_page_size(2));
    store.ensure_bucket("media").await.unwrap();
    for key in ["docs/", "docs/a.txt", "docs/sub/b.txt", "top.bin"] {
        let body = if key.ends_with('/') {
            Bytes::new()
        } else {
            Bytes::from_static(b"hello")
        };
        store.put("media", key, body, None).await.unwrap();
    }
    let service = BrowserService::new(store.clone(), metadata);
    (store, routes().with_state(service))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn healthz_is_ok() {
    let (_store, app) = app().await;
    let (status, body) = send(&app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn readyz_checks_both_backends() {
    let (_store, app) = app().await;
    let (status, body) = send(&app, get("/readyz")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["checks"]["sqlite"]["ok"], true);
    assert_eq!(json["checks"]["object_store"]["ok"], true);
}

#[tokio::test]
async fn lists_one_folder_level() {
    let (_store, app) = app().await;
    let (status, body) = send(&app, get("/buckets/media/objects?prefix=docs/")).await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["name"], "sub");
    assert_eq!(entries[0]["kind"], "folder");
    assert_eq!(entries[1]["key"], "docs/a.txt");
    assert_eq!(entries[1]["sizeLabel"], "5 B");
}

#[tokio::test]
async fn unknown_bucket_is_404() {
    let (_store, app) = app().await;
    let (status, body) = send(&app, get("/buckets/missing/objects")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn rename_reports_the_outcome() {
    let (store, app) = app().await;
    let (status, body) = send(
        &app,
        post_json(
            "/buckets/media/rename",
            json!({ "source": "docs/", "destination": "papers/" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "succeeded");
    assert_eq!(json["succeededKeys"].as_array().unwrap().len(), 3);
    assert!(store.keys("media").iter().all(|key| !key.starts_with("docs/")));
}

#[tokio::test]
async fn invalid_rename_is_rejected() {
    let (_store, app) = app().await;
    let (status, _) = send(
        &app,
        post_json(
            "/buckets/media/rename",
            json!({ "source": "docs/", "destination": "docs/inner/" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn folder_download_is_a_zip_attachment() {
    let (_store, app) = app().await;
    let response = app
        .clone()
        .oneshot(get("/buckets/media/download?key=docs/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"docs.zip\""
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(bytes.starts_with(b"PK\x03\x04"));
}

#[tokio::test]
async fn empty_key_downloads_the_whole_bucket() {
    let (_store, app) = app().await;
    let response = app
        .clone()
        .oneshot(get("/buckets/media/download?key="))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"download.zip\""
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(bytes.starts_with(b"PK\x03\x04"));
    assert!(bytes.windows(7).any(|w| w == b"top.bin"));
}

#[tokio::test]
async fn file_download_streams_the_body() {
    let (_store, app) = app().await;
    let (status, body) = send(&app, get("/buckets/media/download?key=top.bin")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"hello");
}

#[tokio::test]
async fn presign_rejects_unknown_methods() {
    let (_store, app) = app().await;
    let (status, _) = send(
        &app,
        post_json(
            "/buckets/media/presign",
            json!({ "key": "top.bin", "method": "delete" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        post_json(
            "/buckets/media/presign",
            json!({ "key": "top.bin", "method": "put", "contentType": "text/plain" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["method"], "PUT");
    assert!(json["expires"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn multipart_upload_joins_prefix_and_file_name() {
    let (store, app) = app().await;
    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"prefix\"\r\n\r\n\
         docs/new\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"note.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         written\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::post("/buckets/media/objects")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["key"], "docs/new/note.txt");
    assert_eq!(json["size"], 7);
    assert!(store.keys("media").contains(&"docs/new/note.txt".to_string()));
}

#[tokio::test]
async fn size_can_be_recalculated_on_demand() {
    let (_store, app) = app().await;
    let (status, body) = send(&app, get("/buckets/media/size")).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json["sizeBytes"].is_null());

    let (status, body) = send(
        &app,
        Request::post("/buckets/media/size/recalculate")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["sizeBytes"], 15);
    assert_eq!(json["size"], "15 B");
}
