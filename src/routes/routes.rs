//! Routes of the folder browsing API.
//!
//! ## Structure
//! - **Bucket-level endpoints**
//!   - `GET    /buckets` — list buckets
//!   - `PUT    /buckets/{bucket}` — create bucket unless it exists
//!   - `DELETE /buckets/{bucket}` — empty and delete bucket
//!   - `GET    /buckets/{bucket}/size` — last recorded size
//!   - `POST   /buckets/{bucket}/size/recalculate` — walk and record size
//!
//! - **Folder and object endpoints** (under `/buckets/{bucket}`)
//!   - `GET  /objects?prefix=&sort=&order=` — one folder level
//!   - `POST /objects` — multipart upload
//!   - `GET  /search?q=` — substring search over keys
//!   - `GET  /download?key=` — object body, or a zip for folder keys
//!   - `GET  /metadata?key=` — head an object
//!   - `POST /presign` — signed GET/PUT URL
//!   - `POST /folders` — create a folder marker
//!   - `POST /delete`, `/rename`, `/copy` — folder-aware mutations
//!
//! Keys travel in query strings and JSON bodies rather than the path so
//! that folder keys keep their trailing `/`.

use crate::{
    handlers::{
        bucket_handlers::{
            bucket_size, create_bucket, delete_bucket, list_buckets, recalculate_size,
        },
        health_handlers::{healthz, readyz},
        object_handlers::{
            copy_object, create_folder, delete_objects, download_object, list_objects,
            object_metadata, presign_object, rename_object, search_objects, upload_object,
        },
    },
    services::BrowserService,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the router. State is attached by the caller.
pub fn routes() -> Router<BrowserService> {
    let bucket_routes = Router::new()
        .route("/objects", get(list_objects).post(upload_object))
        .route("/search", get(search_objects))
        .route("/download", get(download_object))
        .route("/metadata", get(object_metadata))
        .route("/presign", post(presign_object))
        .route("/folders", post(create_folder))
        .route("/delete", post(delete_objects))
        .route("/rename", post(rename_object))
        .route("/copy", post(copy_object))
        .route("/size", get(bucket_size))
        .route("/size/recalculate", post(recalculate_size));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/buckets", get(list_buckets))
        .route("/buckets/{bucket}", put(create_bucket).delete(delete_bucket))
        .nest("/buckets/{bucket}", bucket_routes)
}
