//! Bucket lifecycle and size handlers.

use crate::{
    errors::AppError, handlers::object_handlers::OutcomeResponse,
    models::entry::format_byte_size, services::BrowserService,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct BucketList {
    pub buckets: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeResponse {
    pub bucket: String,

    /// `None` until the first recalculation.
    pub size_bytes: Option<u64>,
    pub size: Option<String>,
}

impl SizeResponse {
    fn new(bucket: String, size_bytes: Option<u64>) -> Self {
        Self {
            bucket,
            size_bytes,
            size: size_bytes.map(format_byte_size),
        }
    }
}

/// GET `/buckets`
pub async fn list_buckets(
    State(service): State<BrowserService>,
) -> Result<Json<BucketList>, AppError> {
    let buckets = service.list_buckets().await?;
    Ok(Json(BucketList { buckets }))
}

/// PUT `/buckets/{bucket}`, a no-op when the bucket exists.
pub async fn create_bucket(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.ensure_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE `/buckets/{bucket}` empties and removes the bucket. When some
/// keys could not be deleted the bucket is kept and the outcome returned
/// with 409.
pub async fn delete_bucket(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = service.remove_bucket(&bucket).await?;
    let status = if outcome.has_failures() {
        StatusCode::CONFLICT
    } else {
        StatusCode::OK
    };
    Ok((status, Json(OutcomeResponse::from(outcome))))
}

/// GET `/buckets/{bucket}/size`, the last recorded value.
pub async fn bucket_size(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
) -> Result<Json<SizeResponse>, AppError> {
    let size = service.bucket_size(&bucket).await?;
    Ok(Json(SizeResponse::new(bucket, size)))
}

/// POST `/buckets/{bucket}/size/recalculate`
pub async fn recalculate_size(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
) -> Result<Json<SizeResponse>, AppError> {
    let size = service.recalculate_size(&bucket).await?;
    Ok(Json(SizeResponse::new(bucket, Some(size))))
}
