//! In-process backend used for local development and tests.
//!
//! Keys are kept in a `BTreeMap` per bucket and paginated the way S3 does
//! it: lexicographic order, an opaque continuation token, a truncation
//! flag. Page size is configurable and faults can be injected per key so
//! that partial failures are reproducible.

use super::{DEFAULT_CONTENT_TYPE, ObjectStore, StorageError, StorageResult};
use crate::models::object::{ListPage, ObjectBody, ObjectMeta, PresignMethod, StoreObject};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io::{self, Cursor},
    sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};
use tracing::debug;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// Token marker: resume after the encoded key.
const TOKEN_RESUME: char = 'k';
/// Token marker: the interleaved empty page was served, resume after key.
const TOKEN_AFTER_EMPTY: char = 'e';

#[derive(Clone, Debug)]
struct StoredObject {
    body: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Faults {
    copy: HashSet<String>,
    get: HashSet<String>,
    delete: HashSet<String>,
    list_after_pages: Option<usize>,
    list_calls: usize,
}

type Buckets = BTreeMap<String, BTreeMap<String, StoredObject>>;

#[derive(Debug)]
pub struct InMemoryStore {
    buckets: RwLock<Buckets>,
    page_size: usize,
    empty_pages: bool,
    faults: Mutex<Faults>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            empty_pages: false,
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Limit every list call to `page_size` objects (minimum 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Serve an empty, truncated page before every real page.
    pub fn with_empty_pages(mut self) -> Self {
        self.empty_pages = true;
        self
    }

    /// Make every copy whose source is `key` fail with a transport error.
    pub fn fail_copy(&self, key: impl Into<String>) {
        self.faults().copy.insert(key.into());
    }

    pub fn fail_get(&self, key: impl Into<String>) {
        self.faults().get.insert(key.into());
    }

    /// Make delete calls report `key` as refused.
    pub fn fail_delete(&self, key: impl Into<String>) {
        self.faults().delete.insert(key.into());
    }

    /// Let `pages` list calls succeed, then fail every later one.
    pub fn fail_list_after(&self, pages: usize) {
        let mut faults = self.faults();
        faults.list_after_pages = Some(pages);
        faults.list_calls = 0;
    }

    /// All keys currently stored in `bucket`, in order.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.read()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Buckets> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Buckets> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn injected(what: &str, key: &str) -> StorageError {
        StorageError::transport(io::Error::other(format!("injected {what} failure for `{key}`")))
    }
}

fn encode_token(marker: char, after: Option<&str>) -> String {
    let raw = format!("{marker}{}", after.unwrap_or_default());
    URL_SAFE_NO_PAD.encode(raw)
}

/// Decode a continuation token into `(resume_after, empty_page_served)`.
fn decode_token(token: Option<&str>) -> StorageResult<(Option<String>, bool)> {
    let Some(token) = token else {
        return Ok((None, false));
    };
    let invalid = || StorageError::InvalidRequest(format!("malformed continuation token `{token}`"));
    let raw = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
    let raw = String::from_utf8(raw).map_err(|_| invalid())?;
    let mut chars = raw.chars();
    let marker = chars.next().ok_or_else(invalid)?;
    let rest = chars.as_str();
    let after = (!rest.is_empty()).then(|| rest.to_string());
    match marker {
        TOKEN_RESUME => Ok((after, false)),
        TOKEN_AFTER_EMPTY => Ok((after, true)),
        _ => Err(invalid()),
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        Ok(self.read().keys().cloned().collect())
    }

    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.write().entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut buckets = self.write();
        match buckets.get(bucket) {
            None => Err(StorageError::BucketNotFound(bucket.to_string())),
            Some(objects) if !objects.is_empty() => Err(StorageError::InvalidRequest(format!(
                "bucket `{bucket}` is not empty"
            ))),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> StorageResult<ListPage> {
        {
            let mut faults = self.faults();
            faults.list_calls += 1;
            if let Some(limit) = faults.list_after_pages {
                if faults.list_calls > limit {
                    return Err(Self::injected("list", prefix));
                }
            }
        }

        let (after, empty_served) = decode_token(token.as_deref())?;
        let buckets = self.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;

        if self.empty_pages && !empty_served {
            return Ok(ListPage {
                objects: Vec::new(),
                is_truncated: true,
                next_token: Some(encode_token(TOKEN_AFTER_EMPTY, after.as_deref())),
            });
        }

        let mut page: Vec<StoreObject> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| after.as_deref().is_none_or(|after| key.as_str() > after))
            .take(self.page_size + 1)
            .map(|(key, object)| StoreObject {
                key: key.clone(),
                size: object.body.len() as u64,
                last_modified: Some(object.last_modified),
            })
            .collect();

        let is_truncated = page.len() > self.page_size;
        if is_truncated {
            page.pop();
        }
        let next_token = is_truncated
            .then(|| page.last().map(|last| encode_token(TOKEN_RESUME, Some(&last.key))))
            .flatten();

        debug!(bucket, prefix, count = page.len(), is_truncated, "listed page");
        Ok(ListPage {
            objects: page,
            is_truncated,
            next_token,
        })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> StorageResult<()> {
        let mut buckets = self.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody> {
        if self.faults().get.contains(key) {
            return Err(Self::injected("get", key));
        }
        let object = self.lookup(bucket, key)?;
        Ok(ObjectBody {
            content_length: object.body.len() as u64,
            content_type: object.content_type,
            reader: Box::pin(Cursor::new(object.body)),
        })
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        let object = self.lookup(bucket, key)?;
        Ok(ObjectMeta {
            key: key.to_string(),
            size: object.body.len() as u64,
            last_modified: Some(object.last_modified),
            content_type: object.content_type,
            etag: format!("{:x}", md5::compute(&object.body)),
            metadata: HashMap::new(),
        })
    }

    async fn delete_many(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<Vec<(String, String)>> {
        let refused_keys = self.faults().delete.clone();
        let mut buckets = self.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;

        let mut refused = Vec::new();
        for key in keys {
            if refused_keys.contains(key) {
                refused.push((key.clone(), "AccessDenied".to_string()));
            } else {
                objects.remove(key);
            }
        }
        Ok(refused)
    }

    async fn copy(&self, bucket: &str, source: &str, destination: &str) -> StorageResult<()> {
        if self.faults().copy.contains(source) {
            return Err(Self::injected("copy", source));
        }
        let mut buckets = self.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        let mut object = objects
            .get(source)
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: source.to_string(),
            })?;
        object.last_modified = Utc::now();
        objects.insert(destination.to_string(), object);
        Ok(())
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
        content_type: Option<String>,
    ) -> StorageResult<String> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|err| StorageError::InvalidRequest(err.to_string()))?;
        let expires = (Utc::now() + ttl).timestamp();
        let signature = md5::compute(format!("{}:{bucket}/{key}:{expires}", method.as_str()));
        let mut url = format!(
            "memory://{bucket}/{key}?method={}&expires={expires}&signature={signature:x}",
            method.as_str()
        );
        if let Some(content_type) = content_type {
            url.push_str(&format!("&content-type={content_type}"));
        }
        Ok(url)
    }
}

impl InMemoryStore {
    fn lookup(&self, bucket: &str, key: &str) -> StorageResult<StoredObject> {
        let buckets = self.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn seeded(page_size: usize, keys: &[&str]) -> InMemoryStore {
        let store = InMemoryStore::new().with_page_size(page_size);
        store.ensure_bucket("media").await.unwrap();
        for key in keys {
            store
                .put("media", key, Bytes::from_static(b"data"), None)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn pages_follow_continuation_tokens() {
        let store = seeded(2, &["a", "b", "c", "d", "e"]).await;

        let first = store.list_page("media", "", None).await.unwrap();
        assert!(first.is_truncated);
        assert_eq!(first.objects.len(), 2);

        let second = store
            .list_page("media", "", first.next_token)
            .await
            .unwrap();
        assert_eq!(second.objects[0].key, "c");

        let third = store
            .list_page("media", "", second.next_token)
            .await
            .unwrap();
        assert!(!third.is_truncated);
        assert!(third.next_token.is_none());
        assert_eq!(third.objects.len(), 1);
    }

    #[tokio::test]
    async fn listing_respects_prefix() {
        let store = seeded(10, &["docs/a", "docs/b/c", "img/x"]).await;
        let page = store.list_page("media", "docs/", None).await.unwrap();
        let keys: Vec<_> = page.objects.into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["docs/a", "docs/b/c"]);
    }

    #[tokio::test]
    async fn malformed_token_is_rejected() {
        let store = seeded(10, &["a"]).await;
        let err = store
            .list_page("media", "", Some("!!not-base64".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn missing_bucket_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.list_page("nope", "", None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn copy_and_get_round_trip_body() {
        let store = seeded(10, &["src"]).await;
        store.copy("media", "src", "dst").await.unwrap();

        let mut body = store.get("media", "dst").await.unwrap();
        let mut buf = Vec::new();
        body.reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"data");

        let err = store.copy("media", "missing", "x").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_reports_refused_keys() {
        let store = seeded(10, &["a", "b"]).await;
        store.fail_delete("b");
        let refused = store
            .delete_many("media", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(refused.len(), 1);
        assert_eq!(refused[0].0, "b");
        assert_eq!(store.keys("media"), vec!["b"]);
    }

    #[tokio::test]
    async fn non_empty_bucket_cannot_be_deleted() {
        let store = seeded(10, &["a"]).await;
        assert!(store.delete_bucket("media").await.is_err());
        store.delete_many("media", &["a".to_string()]).await.unwrap();
        store.delete_bucket("media").await.unwrap();
        assert!(store.list_buckets().await.unwrap().is_empty());
    }
}
