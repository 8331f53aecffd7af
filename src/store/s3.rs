//! S3-compatible backend built on the AWS SDK.

use super::{DEFAULT_CONTENT_TYPE, ObjectStore, StorageError, StorageResult};
use crate::models::object::{ListPage, ObjectBody, ObjectMeta, PresignMethod, StoreObject};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region},
    error::SdkError,
    presigning::PresigningConfig,
    primitives::{ByteStream, DateTime as AwsDateTime},
    types::{Delete, ObjectIdentifier},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::{fmt, time::Duration};
use tracing::{debug, instrument};

/// Characters left untouched when building a copy source descriptor.
/// `/` stays literal so the descriptor keeps the key's path shape.
const COPY_SOURCE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub use_ssl: bool,

    /// Max keys per list call. `None` leaves the store default (1000).
    pub page_size: Option<i32>,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("use_ssl", &self.use_ssl)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

/// Object store client talking to S3, MinIO, R2 and friends.
pub struct S3Backend {
    client: Client,
    endpoint: String,
    page_size: Option<i32>,
}

impl fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Backend")
            .field("endpoint", &self.endpoint)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Build a client with static credentials and path-style addressing.
    pub fn new(config: S3Config) -> StorageResult<Self> {
        if config.access_key.is_empty() || config.secret_key.is_empty() {
            return Err(StorageError::InvalidRequest(
                "s3 credentials are required".into(),
            ));
        }
        let endpoint = normalize_endpoint(&config.endpoint, config.use_ssl)?;

        let credentials = Credentials::new(
            config.access_key,
            config.secret_key,
            None,
            None,
            "object-browser-config",
        );
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .endpoint_url(&endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            endpoint,
            page_size: config.page_size,
        })
    }
}

/// Give the endpoint a scheme and force it to match `use_ssl`.
pub fn normalize_endpoint(endpoint: &str, use_ssl: bool) -> StorageResult<String> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(StorageError::InvalidRequest("s3 endpoint is required".into()));
    }
    let host = match trimmed.split_once("://") {
        Some((_, rest)) => rest,
        None => trimmed,
    }
    .trim_end_matches('/');
    if host.is_empty() {
        return Err(StorageError::InvalidRequest(format!(
            "s3 endpoint `{endpoint}` has no host"
        )));
    }
    let scheme = if use_ssl { "https" } else { "http" };
    Ok(format!("{scheme}://{host}"))
}

/// Convert an SDK error, turning HTTP 404 into the matching NotFound.
fn map_sdk_error<E>(err: SdkError<E>, bucket: &str, key: Option<&str>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if let SdkError::ServiceError(ref service_err) = err {
        if service_err.raw().status().as_u16() == 404 {
            return match key {
                Some(key) => StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                },
                None => StorageError::BucketNotFound(bucket.to_string()),
            };
        }
    }
    StorageError::transport(err)
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(service_err) if service_err.raw().status().as_u16() == 404)
}

fn to_chrono(dt: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn non_negative(value: Option<i64>) -> u64 {
    value.unwrap_or(0).max(0) as u64
}

#[async_trait]
impl ObjectStore for S3Backend {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list_buckets(&self) -> StorageResult<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(StorageError::transport)?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_string))
            .collect())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => return Ok(()),
            Err(err) if is_not_found(&err) => {
                debug!(bucket, "bucket missing, creating it");
            }
            Err(err) => return Err(StorageError::transport(err)),
        }
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(StorageError::transport)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, None))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> StorageResult<ListPage> {
        let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
        if let Some(token) = token {
            request = request.continuation_token(token);
        }
        if let Some(page_size) = self.page_size {
            request = request.max_keys(page_size);
        }

        let output = request
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, None))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?;
                Some(StoreObject {
                    key: key.to_string(),
                    size: non_negative(obj.size()),
                    last_modified: obj.last_modified().and_then(to_chrono),
                })
            })
            .collect();

        Ok(ListPage {
            objects,
            is_truncated: output.is_truncated().unwrap_or(false),
            next_token: output.next_continuation_token().map(str::to_string),
        })
    }

    #[instrument(skip(self, body), fields(backend = "s3", len = body.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(body.len() as i64)
            .set_content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, None))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectBody> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, Some(key)))?;

        let content_type = output
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let content_length = non_negative(output.content_length());

        Ok(ObjectBody {
            reader: Box::pin(output.body.into_async_read()),
            content_type,
            content_length,
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, Some(key)))?;

        Ok(ObjectMeta {
            key: key.to_string(),
            size: non_negative(output.content_length()),
            last_modified: output.last_modified().and_then(to_chrono),
            content_type: output
                .content_type()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
            etag: output.e_tag().unwrap_or_default().trim_matches('"').to_string(),
            metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }

    #[instrument(skip(self, keys), fields(backend = "s3", count = keys.len()))]
    async fn delete_many(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<Vec<(String, String)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let objects = keys
            .iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|err| StorageError::InvalidRequest(err.to_string()))
            })
            .collect::<StorageResult<Vec<_>>>()?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|err| StorageError::InvalidRequest(err.to_string()))?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, None))?;

        // Quiet mode only reports the keys that could not be removed.
        Ok(output
            .errors()
            .iter()
            .map(|err| {
                (
                    err.key().unwrap_or_default().to_string(),
                    err.message().unwrap_or("delete refused").to_string(),
                )
            })
            .collect())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn copy(&self, bucket: &str, source: &str, destination: &str) -> StorageResult<()> {
        let encoded = utf8_percent_encode(source, COPY_SOURCE_ENCODE_SET).to_string();
        self.client
            .copy_object()
            .bucket(bucket)
            .copy_source(format!("{bucket}/{encoded}"))
            .key(destination)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, Some(source)))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
        content_type: Option<String>,
    ) -> StorageResult<String> {
        let config = PresigningConfig::expires_in(ttl)
            .map_err(|err| StorageError::InvalidRequest(err.to_string()))?;

        let request = match method {
            PresignMethod::Get => self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(StorageError::transport)?,
            PresignMethod::Put => self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .set_content_type(content_type)
                .presigned(config)
                .await
                .map_err(StorageError::transport)?,
        };
        Ok(request.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_gets_scheme_matching_ssl_flag() {
        assert_eq!(
            normalize_endpoint("minio:9000", false).unwrap(),
            "http://minio:9000"
        );
        assert_eq!(
            normalize_endpoint("http://minio:9000/", true).unwrap(),
            "https://minio:9000"
        );
        assert!(normalize_endpoint("  ", false).is_err());
        assert!(normalize_endpoint("https://", false).is_err());
        assert!(normalize_endpoint("http:///", true).is_err());
        assert_eq!(
            normalize_endpoint("https://s3.local//", true).unwrap(),
            "https://s3.local"
        );
    }

    #[test]
    fn copy_source_keeps_slashes() {
        let encoded = utf8_percent_encode("a dir/ü.txt", COPY_SOURCE_ENCODE_SET).to_string();
        assert_eq!(encoded, "a%20dir/%C3%BC.txt");
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let config = S3Config {
            endpoint: "localhost:9000".into(),
            region: "us-east-1".into(),
            access_key: String::new(),
            secret_key: "secret".into(),
            use_ssl: false,
            page_size: None,
        };
        assert!(matches!(
            S3Backend::new(config),
            Err(StorageError::InvalidRequest(_))
        ));
    }
}
