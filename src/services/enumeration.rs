//! Exhaustive listing of every object under a prefix.

use crate::{
    models::object::StoreObject,
    store::{ObjectStore, StorageResult},
};
use tracing::{debug, instrument};

/// Walk every page under `prefix` and return the concatenated entries.
///
/// The walk continues while the store reports a truncated page and hands
/// back a token, including pages that carry no objects. Order is whatever
/// the store returned. Any error discards the partial result.
#[instrument(skip(store), fields(backend = store.backend_name()))]
pub async fn enumerate_all(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> StorageResult<Vec<StoreObject>> {
    let mut objects = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = store.list_page(bucket, prefix, token.take()).await?;
        pages += 1;
        objects.extend(page.objects);

        match page.next_token {
            Some(next) if page.is_truncated => token = Some(next),
            _ => break,
        }
    }

    debug!(bucket, prefix, pages, count = objects.len(), "enumeration complete");
    Ok(objects)
}
