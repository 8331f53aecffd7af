//! Raw store-level records, exactly as the object store reports them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, fmt, pin::Pin};
use tokio::io::AsyncRead;

/// One object as returned by a prefix-scoped listing.
///
/// Nothing here knows about folders: a folder marker is just an object
/// whose key ends in `/` and whose size is zero.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreObject {
    /// Full object key within the bucket.
    pub key: String,

    /// Size in bytes.
    pub size: u64,

    /// Last modification time, when the store reports one.
    pub last_modified: Option<DateTime<Utc>>,
}

impl StoreObject {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: None,
        }
    }
}

/// A single page of a paginated listing.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub objects: Vec<StoreObject>,

    /// Set when the store reports more pages after this one.
    pub is_truncated: bool,

    /// Opaque cursor for the next page.
    pub next_token: Option<String>,
}

/// Metadata returned by a head request.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: String,
    pub etag: String,
    pub metadata: HashMap<String, String>,
}

/// Streaming body of a fetched object.
///
/// The reader owns the underlying connection; dropping it releases the
/// handle.
pub struct ObjectBody {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    pub content_type: String,
    pub content_length: u64,
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// HTTP method a presigned URL is valid for.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PresignMethod {
    Get,
    Put,
}

impl PresignMethod {
    /// Case-insensitive parse of `GET` / `PUT`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("get") {
            Some(Self::Get)
        } else if raw.eq_ignore_ascii_case("put") {
            Some(Self::Put)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

/// A signed, time-limited URL for one object.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrl {
    pub url: String,
    pub method: PresignMethod,

    /// Absolute expiry as a unix timestamp (seconds).
    pub expires: i64,
}
