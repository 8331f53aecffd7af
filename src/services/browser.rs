//! Folder-aware facade over one object store.
//!
//! `BrowserService` is what the HTTP layer talks to. It composes the
//! enumeration, projection, orchestration, archive and size components
//! and schedules a size recalculation after every mutation.

use super::{
    ServiceError,
    archive::{self, ZipDownload},
    enumeration::enumerate_all,
    hierarchy,
    metadata::BucketMetadataStore,
    orchestrator,
    size::SizeAggregator,
};
use crate::{
    models::{
        entry::{EntryKind, ObjectEntry, Prefix, SortKey, SortOrder},
        object::{ObjectBody, ObjectMeta, PresignMethod, PresignedUrl},
        outcome::OperationOutcome,
    },
    store::{ObjectStore, StorageError, StorageResult},
};
use bytes::Bytes;
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::{info, instrument, warn};

/// Presigned URL lifetime when the caller gives none.
pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Clone)]
pub struct BrowserService {
    store: Arc<dyn ObjectStore>,
    metadata: BucketMetadataStore,
    sizes: SizeAggregator,
    presign_ttl: Duration,
}

impl BrowserService {
    pub fn new(store: Arc<dyn ObjectStore>, metadata: BucketMetadataStore) -> Self {
        let sizes = SizeAggregator::new(store.clone(), Arc::new(metadata.clone()));
        Self {
            store,
            metadata,
            sizes,
            presign_ttl: DEFAULT_PRESIGN_TTL,
        }
    }

    /// Override the lifetime used when a presign request has no TTL.
    pub fn with_presign_ttl(mut self, ttl: Duration) -> Self {
        if !ttl.is_zero() {
            self.presign_ttl = ttl;
        }
        self
    }

    pub fn metadata(&self) -> &BucketMetadataStore {
        &self.metadata
    }

    pub fn sizes(&self) -> &SizeAggregator {
        &self.sizes
    }

    /// Immediate children of `prefix`, sorted.
    #[instrument(skip(self))]
    pub async fn list_folder(
        &self,
        bucket: &str,
        prefix: &str,
        sort: SortKey,
        order: SortOrder,
    ) -> StorageResult<Vec<ObjectEntry>> {
        let prefix = Prefix::normalize(prefix);
        let objects = enumerate_all(self.store.as_ref(), bucket, prefix.as_str()).await?;
        let mut entries = hierarchy::project(&objects, &prefix);
        hierarchy::sort_entries(&mut entries, sort, order);
        Ok(entries)
    }

    /// Keys anywhere in the bucket containing `query`, ignoring case.
    pub async fn search(&self, bucket: &str, query: &str) -> StorageResult<Vec<ObjectEntry>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let objects = enumerate_all(self.store.as_ref(), bucket, "").await?;
        Ok(hierarchy::search(&objects, query))
    }

    #[instrument(skip(self, body), fields(size = body.len()))]
    pub async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> StorageResult<()> {
        orchestrator::ensure_key_valid(key)?;
        if EntryKind::of_key(key).is_folder() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        self.store.put(bucket, key, body, content_type).await?;
        info!(bucket, key, "object uploaded");
        self.sizes.schedule(bucket);
        Ok(())
    }

    /// Create a folder marker and return its key.
    pub async fn create_folder(
        &self,
        bucket: &str,
        name: &str,
        parent: Option<&str>,
    ) -> StorageResult<String> {
        orchestrator::create_folder(self.store.as_ref(), bucket, name, parent).await
    }

    pub async fn object_metadata(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        self.store.head(bucket, key).await
    }

    pub async fn download(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody> {
        self.store.get(bucket, key).await
    }

    /// Signed URL for one key. A missing or zero `ttl` uses the
    /// configured default.
    pub async fn presign(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        ttl: Option<Duration>,
        content_type: Option<String>,
    ) -> StorageResult<PresignedUrl> {
        orchestrator::ensure_key_valid(key)?;
        let ttl = ttl.filter(|ttl| !ttl.is_zero()).unwrap_or(self.presign_ttl);
        let content_type = match method {
            PresignMethod::Put => content_type,
            PresignMethod::Get => None,
        };
        let url = self
            .store
            .presign(bucket, key, method, ttl, content_type)
            .await?;
        let expires = Utc::now()
            .timestamp()
            .saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        Ok(PresignedUrl {
            url,
            method,
            expires,
        })
    }

    pub async fn delete(&self, bucket: &str, keys: &[String]) -> StorageResult<OperationOutcome> {
        let outcome = orchestrator::delete_keys(self.store.as_ref(), bucket, keys).await?;
        self.after_mutation(bucket, &outcome);
        Ok(outcome)
    }

    pub async fn rename(
        &self,
        bucket: &str,
        source: &str,
        destination: &str,
    ) -> StorageResult<OperationOutcome> {
        let outcome =
            orchestrator::rename(self.store.as_ref(), bucket, source, destination).await?;
        self.after_mutation(bucket, &outcome);
        Ok(outcome)
    }

    pub async fn copy(
        &self,
        bucket: &str,
        source: &str,
        destination: &str,
    ) -> StorageResult<OperationOutcome> {
        let outcome = orchestrator::copy(self.store.as_ref(), bucket, source, destination).await?;
        self.after_mutation(bucket, &outcome);
        Ok(outcome)
    }

    /// Stream everything under `prefix` as a zip archive.
    pub async fn zip_folder(&self, bucket: &str, prefix: &str) -> StorageResult<ZipDownload> {
        let prefix = Prefix::normalize(prefix);
        archive::stream_zip(self.store.clone(), bucket, &prefix).await
    }

    /// Last persisted size, without walking the bucket.
    pub async fn bucket_size(&self, bucket: &str) -> Result<Option<u64>, ServiceError> {
        Ok(self.metadata.get_size(bucket).await?)
    }

    /// Walk the bucket now and persist the result.
    pub async fn recalculate_size(&self, bucket: &str) -> Result<u64, ServiceError> {
        self.sizes.recalculate(bucket).await
    }

    pub async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        self.store.list_buckets().await
    }

    pub async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.store.ensure_bucket(bucket).await
    }

    /// Empty `bucket`, delete it and drop its size record.
    #[instrument(skip(self))]
    pub async fn remove_bucket(&self, bucket: &str) -> Result<OperationOutcome, ServiceError> {
        let keys: Vec<String> = enumerate_all(self.store.as_ref(), bucket, "")
            .await?
            .into_iter()
            .map(|object| object.key)
            .collect();
        let outcome = orchestrator::delete_listed(self.store.as_ref(), bucket, &keys).await;
        if outcome.has_failures() {
            warn!(
                bucket,
                failed = outcome.failed_keys.len(),
                "bucket not empty after delete, keeping it"
            );
            return Ok(outcome);
        }

        self.store.delete_bucket(bucket).await?;
        self.metadata.forget(bucket).await?;
        info!(bucket, removed = outcome.succeeded_keys.len(), "bucket removed");
        Ok(outcome)
    }

    fn after_mutation(&self, bucket: &str, outcome: &OperationOutcome) {
        if !outcome.succeeded_keys.is_empty() {
            self.sizes.schedule(bucket);
        }
    }
}
