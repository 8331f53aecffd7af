//! Object store client: primitive operations against a flat key space.
//!
//! Backends know nothing about folders. Each call takes a bucket name and
//! returns either a result or a [`StorageError`]; nothing retries
//! internally.

pub mod memory;
pub mod s3;

use crate::models::object::{ListPage, ObjectBody, ObjectMeta, PresignMethod};
use async_trait::async_trait;
use bytes::Bytes;
use std::{io, time::Duration};
use thiserror::Error;

pub use memory::InMemoryStore;
pub use s3::{S3Backend, S3Config};

/// Largest batch a single delete call accepts.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Content type stored on folder marker objects.
pub const FOLDER_CONTENT_TYPE: &str = "application/x-directory";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unsafe archive path for key `{0}`")]
    UnsafeArchivePath(String),
    #[error("object store request failed: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("archive error: {0}")]
    Archive(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Wrap any backend error as a transport failure.
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::BucketNotFound(_) | Self::ObjectNotFound { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Primitive operations on an S3-compatible store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Names of every bucket visible with the configured credentials.
    async fn list_buckets(&self) -> StorageResult<Vec<String>>;

    /// Create `bucket` unless it already exists.
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Delete an empty bucket.
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Fetch one page of objects under `prefix`, starting at `token`.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> StorageResult<ListPage>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> StorageResult<()>;

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody>;

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta>;

    /// Delete up to [`MAX_DELETE_BATCH`] keys in one quiet call.
    ///
    /// Returns the keys the store refused, paired with its reason. An
    /// empty vector means every key is gone.
    async fn delete_many(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<Vec<(String, String)>>;

    /// Server-side copy of `source` to `destination` within a bucket.
    async fn copy(&self, bucket: &str, source: &str, destination: &str) -> StorageResult<()>;

    /// Signed URL for `method` on one key, valid for `ttl`.
    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
        content_type: Option<String>,
    ) -> StorageResult<String>;
}
