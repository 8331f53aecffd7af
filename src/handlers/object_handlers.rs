//! HTTP handlers for folder browsing and object operations.
//! Bodies are streamed in both directions where the store allows it and
//! every storage concern is delegated to `BrowserService`.

use crate::{
    errors::AppError,
    models::{
        entry::{EntryKind, ObjectEntry, SortKey, SortOrder, format_byte_size},
        object::{ObjectMeta, PresignMethod, PresignedUrl},
        outcome::{OperationOutcome, OutcomeStatus},
    },
    services::BrowserService,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::io::ReaderStream;

/// Query params accepted by the folder listing.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub prefix: Option<String>,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub bucket: String,
    pub prefix: String,
    pub entries: Vec<ObjectEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignReq {
    pub key: String,
    pub method: String,
    pub ttl_secs: Option<u64>,
    pub content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderReq {
    pub name: String,
    pub parent: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedFolder {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteReq {
    pub keys: Vec<String>,
}

/// Body of both rename and copy.
#[derive(Debug, Deserialize)]
pub struct TransferReq {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Serialize)]
pub struct OutcomeResponse {
    pub status: OutcomeStatus,
    #[serde(flatten)]
    pub outcome: OperationOutcome,
}

impl From<OperationOutcome> for OutcomeResponse {
    fn from(outcome: OperationOutcome) -> Self {
        Self {
            status: outcome.status(),
            outcome,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataResponse {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    pub size_label: String,
}

/// GET `/buckets/{bucket}/objects?prefix=&sort=&order=`
pub async fn list_objects(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let prefix = q.prefix.unwrap_or_default();
    let entries = service
        .list_folder(&bucket, &prefix, q.sort, q.order)
        .await?;
    Ok(Json(ListResponse {
        bucket,
        prefix,
        entries,
    }))
}

/// GET `/buckets/{bucket}/search?q=`
pub async fn search_objects(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<ObjectEntry>>, AppError> {
    Ok(Json(service.search(&bucket, &q.q).await?))
}

/// POST `/buckets/{bucket}/objects` with multipart fields `file` and
/// either `key`, or an optional `prefix` joined with the file name.
pub async fn upload_object(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut key = None;
    let mut prefix = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("key") => key = Some(field.text().await?),
            Some("prefix") => prefix = Some(field.text().await?),
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                file = Some((file_name, content_type, bytes));
            }
            _ => {}
        }
    }

    let (file_name, content_type, body) =
        file.ok_or_else(|| AppError::bad_request("multipart field `file` is required"))?;
    let key = match (key, file_name) {
        (Some(key), _) => key,
        (None, Some(name)) => format!("{}{name}", normalize_prefix(prefix.as_deref())),
        (None, None) => return Err(AppError::bad_request("object key is required")),
    };
    let size = body.len() as u64;

    service.upload(&bucket, &key, body, content_type).await?;
    let name = key.rsplit('/').next().unwrap_or_default().to_string();
    Ok((
        StatusCode::CREATED,
        Json(ObjectEntry::file(key, name, size, None)),
    ))
}

/// GET `/buckets/{bucket}/download?key=`
///
/// A folder key streams a zip archive of everything below it; an empty
/// key or `/` archives the whole bucket.
pub async fn download_object(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
    Query(q): Query<KeyQuery>,
) -> Result<Response, AppError> {
    if let Some(prefix) = archive_prefix(&q.key) {
        let archive = service.zip_folder(&bucket, prefix).await?;
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
        set_attachment(&mut headers, &archive.filename);
        let body = Body::from_stream(ReaderStream::new(archive));
        return Ok((headers, body).into_response());
    }

    let object = service.download(&bucket, &q.key).await?;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&object.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(object.content_length));
    let file_name = q.key.rsplit('/').next().unwrap_or(&q.key);
    set_attachment(&mut headers, file_name);

    let body = Body::from_stream(ReaderStream::new(object.reader));
    Ok((headers, body).into_response())
}

/// GET `/buckets/{bucket}/metadata?key=`
pub async fn object_metadata(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
    Query(q): Query<KeyQuery>,
) -> Result<Json<MetadataResponse>, AppError> {
    let meta = service.object_metadata(&bucket, &q.key).await?;
    Ok(Json(MetadataResponse {
        size_label: format_byte_size(meta.size),
        meta,
    }))
}

/// POST `/buckets/{bucket}/presign`
pub async fn presign_object(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
    Json(req): Json<PresignReq>,
) -> Result<Json<PresignedUrl>, AppError> {
    let method = PresignMethod::parse(&req.method).ok_or_else(|| {
        AppError::bad_request(format!("unsupported presign method `{}`", req.method))
    })?;
    let signed = service
        .presign(
            &bucket,
            &req.key,
            method,
            req.ttl_secs.map(Duration::from_secs),
            req.content_type,
        )
        .await?;
    Ok(Json(signed))
}

/// POST `/buckets/{bucket}/folders`
pub async fn create_folder(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
    Json(req): Json<CreateFolderReq>,
) -> Result<impl IntoResponse, AppError> {
    let key = service
        .create_folder(&bucket, &req.name, req.parent.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(CreatedFolder { key })))
}

/// POST `/buckets/{bucket}/delete`
pub async fn delete_objects(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
    Json(req): Json<DeleteReq>,
) -> Result<Json<OutcomeResponse>, AppError> {
    if req.keys.is_empty() {
        return Err(AppError::bad_request("no keys to delete"));
    }
    Ok(Json(service.delete(&bucket, &req.keys).await?.into()))
}

/// POST `/buckets/{bucket}/rename`
pub async fn rename_object(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
    Json(req): Json<TransferReq>,
) -> Result<Json<OutcomeResponse>, AppError> {
    let outcome = service
        .rename(&bucket, &req.source, &req.destination)
        .await?;
    Ok(Json(outcome.into()))
}

/// POST `/buckets/{bucket}/copy`
pub async fn copy_object(
    State(service): State<BrowserService>,
    Path(bucket): Path<String>,
    Json(req): Json<TransferReq>,
) -> Result<Json<OutcomeResponse>, AppError> {
    let outcome = service.copy(&bucket, &req.source, &req.destination).await?;
    Ok(Json(outcome.into()))
}

/// The prefix to archive when `key` names a folder or the bucket root.
fn archive_prefix(key: &str) -> Option<&str> {
    match key {
        "" | "/" => Some(""),
        key if EntryKind::of_key(key).is_folder() => Some(key),
        _ => None,
    }
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    match prefix.map(|p| p.trim_matches('/')) {
        Some(p) if !p.is_empty() => format!("{p}/"),
        _ => String::new(),
    }
}

/// `Content-Disposition: attachment` with the name quoted. Names that
/// cannot be carried in a header are left out.
fn set_attachment(headers: &mut HeaderMap, file_name: &str) {
    let escaped = file_name.replace('\\', "\\\\").replace('"', "\\\"");
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{escaped}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    } else {
        headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("attachment"));
    }
}
