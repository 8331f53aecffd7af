//! Durable bucket record holding the aggregated size.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A bucket known to the metadata database.
///
/// The only value this crate writes is `size_bytes`; everything else is
/// created on first use.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BucketRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Bucket name as known to the object store.
    pub name: String,

    /// Total bytes stored, as of the last recalculation.
    pub size_bytes: i64,

    /// When `size_bytes` was last written.
    pub updated_at: DateTime<Utc>,
}
