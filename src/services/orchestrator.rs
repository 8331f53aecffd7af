//! Folder-aware delete, rename and copy over a flat key space.
//!
//! A folder target (key ending in `/`) is expanded into every key under it
//! plus its marker, using a single enumeration taken at the start of the
//! call. Each key is then handled individually and its result recorded in
//! an [`OperationOutcome`]. Nothing here is transactional: completed
//! copies are never rolled back.

use super::enumeration::enumerate_all;
use crate::{
    models::{
        entry::{EntryKind, Prefix},
        outcome::OperationOutcome,
    },
    store::{FOLDER_CONTENT_TYPE, MAX_DELETE_BATCH, ObjectStore, StorageError, StorageResult},
};
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Parallel copy requests in flight during a folder copy.
const COPY_CONCURRENCY: usize = 8;

/// One key to move or copy.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CopyStep {
    source: String,
    destination: String,

    /// False for the marker of a folder that only exists implicitly.
    exists: bool,
}

/// Reject keys the store would refuse or that cannot be addressed.
pub fn ensure_key_valid(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    if key.bytes().any(|b| b.is_ascii_control()) {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Delete every key in `keys`, expanding folders.
///
/// A folder that has no objects at all contributes nothing, and neither
/// does a file key that does not exist, so deleting only absent targets
/// is an empty outcome. Keys are sent in batches of at
/// most [`MAX_DELETE_BATCH`]; a failed batch marks only its own keys as
/// failed.
#[instrument(skip(store, keys), fields(targets = keys.len()))]
pub async fn delete_keys(
    store: &dyn ObjectStore,
    bucket: &str,
    keys: &[String],
) -> StorageResult<OperationOutcome> {
    let mut expanded = Vec::new();
    let mut seen = HashSet::new();
    let mut outcome = OperationOutcome::new();

    for key in keys {
        if EntryKind::of_key(key).is_folder() {
            let objects = enumerate_all(store, bucket, key).await?;
            if objects.is_empty() {
                debug!(bucket, key = %key, "folder has no objects, nothing to delete");
                continue;
            }
            for object in objects {
                if seen.insert(object.key.clone()) {
                    expanded.push(object.key);
                }
            }
            if seen.insert(key.clone()) {
                expanded.push(key.clone());
            }
        } else if seen.insert(key.clone()) {
            match store.head(bucket, key).await {
                Ok(_) => expanded.push(key.clone()),
                Err(StorageError::ObjectNotFound { .. }) => {
                    debug!(bucket, key = %key, "file does not exist, nothing to delete");
                }
                Err(err @ StorageError::BucketNotFound(_)) => return Err(err),
                Err(err) => {
                    warn!(bucket, key = %key, error = %err, "could not check file before delete");
                    outcome.fail(key.clone(), err);
                }
            }
        }
    }

    delete_chunked(store, bucket, &expanded, &mut outcome).await;
    info!(
        bucket,
        deleted = outcome.succeeded_keys.len(),
        failed = outcome.failed_keys.len(),
        "delete finished"
    );
    Ok(outcome)
}

/// Delete keys that were just enumerated, skipping the existence checks
/// [`delete_keys`] performs on file targets.
pub async fn delete_listed(
    store: &dyn ObjectStore,
    bucket: &str,
    keys: &[String],
) -> OperationOutcome {
    let mut outcome = OperationOutcome::new();
    delete_chunked(store, bucket, keys, &mut outcome).await;
    outcome
}

/// Rename `source` to `destination` by copying every key and then
/// deleting the originals.
///
/// The first failed copy stops the operation: keys copied so far are
/// reported as succeeded, the rest as failed, and no source is deleted.
#[instrument(skip(store))]
pub async fn rename(
    store: &dyn ObjectStore,
    bucket: &str,
    source: &str,
    destination: &str,
) -> StorageResult<OperationOutcome> {
    let Some(plan) = plan_transfer(store, bucket, source, destination).await? else {
        return Ok(OperationOutcome::new());
    };

    let mut outcome = OperationOutcome::new();
    let mut copied = Vec::new();
    for (index, step) in plan.iter().enumerate() {
        if !step.exists {
            continue;
        }
        match store.copy(bucket, &step.source, &step.destination).await {
            Ok(()) => copied.push(step.source.clone()),
            Err(err @ StorageError::ObjectNotFound { .. }) if plan.len() == 1 => {
                debug!(bucket, source, error = %err, "rename source absent, nothing to do");
                return Ok(outcome);
            }
            Err(err) => {
                warn!(bucket, key = %step.source, error = %err, "copy failed, aborting rename");
                for key in &copied {
                    outcome.succeed(key.clone());
                }
                outcome.fail_all(plan[index..].iter().map(|s| s.source.clone()), &err);
                return Ok(outcome);
            }
        }
    }

    delete_chunked(store, bucket, &copied, &mut outcome).await;
    for step in plan.iter().filter(|step| !step.exists) {
        outcome.succeed(step.source.clone());
    }
    info!(
        bucket,
        source,
        destination,
        moved = outcome.succeeded_keys.len(),
        failed = outcome.failed_keys.len(),
        "rename finished"
    );
    Ok(outcome)
}

/// Copy `source` to `destination`; folders are copied key by key.
///
/// Copies run with bounded concurrency and every key is attempted, so a
/// failure affects only that key.
#[instrument(skip(store))]
pub async fn copy(
    store: &dyn ObjectStore,
    bucket: &str,
    source: &str,
    destination: &str,
) -> StorageResult<OperationOutcome> {
    let Some(plan) = plan_transfer(store, bucket, source, destination).await? else {
        return Ok(OperationOutcome::new());
    };

    let results: Vec<(CopyStep, StorageResult<()>)> = stream::iter(plan)
        .map(|step| async move {
            let result = if step.exists {
                store.copy(bucket, &step.source, &step.destination).await
            } else {
                Ok(())
            };
            (step, result)
        })
        .buffered(COPY_CONCURRENCY)
        .collect()
        .await;

    let single = results.len() == 1;
    let mut outcome = OperationOutcome::new();
    for (step, result) in results {
        match result {
            Ok(()) => outcome.succeed(step.source),
            Err(StorageError::ObjectNotFound { .. }) if single => {
                debug!(bucket, source, "copy source absent, nothing to do");
            }
            Err(err) => {
                warn!(bucket, key = %step.source, error = %err, "copy failed");
                outcome.fail(step.source, err);
            }
        }
    }
    Ok(outcome)
}

/// Create the zero-byte marker for folder `name` under `parent`.
pub async fn create_folder(
    store: &dyn ObjectStore,
    bucket: &str,
    name: &str,
    parent: Option<&str>,
) -> StorageResult<String> {
    let name = name.trim().trim_matches('/');
    if name.is_empty() {
        return Err(StorageError::InvalidKey(name.to_string()));
    }
    let parent = Prefix::normalize(parent.unwrap_or_default());
    let key = format!("{}{name}/", parent.as_str());
    ensure_key_valid(&key)?;

    store
        .put(bucket, &key, Bytes::new(), Some(FOLDER_CONTENT_TYPE.to_string()))
        .await?;
    info!(bucket, key = %key, "folder created");
    Ok(key)
}

/// Build the list of keys a rename or copy touches.
///
/// Returns `None` when a folder source has no objects.
async fn plan_transfer(
    store: &dyn ObjectStore,
    bucket: &str,
    source: &str,
    destination: &str,
) -> StorageResult<Option<Vec<CopyStep>>> {
    ensure_key_valid(source)?;
    ensure_key_valid(destination)?;
    if source == destination {
        return Err(StorageError::InvalidRequest(
            "source and destination are the same key".into(),
        ));
    }

    if !EntryKind::of_key(source).is_folder() {
        if EntryKind::of_key(destination).is_folder() {
            return Err(StorageError::InvalidRequest(format!(
                "file `{source}` cannot be written to folder key `{destination}`"
            )));
        }
        return Ok(Some(vec![CopyStep {
            source: source.to_string(),
            destination: destination.to_string(),
            exists: true,
        }]));
    }

    let destination = Prefix::normalize(destination);
    if destination.as_str().starts_with(source) {
        return Err(StorageError::InvalidRequest(format!(
            "cannot move `{source}` into itself"
        )));
    }

    let objects = enumerate_all(store, bucket, source).await?;
    if objects.is_empty() {
        return Ok(None);
    }

    let mut marker_exists = false;
    let mut steps: HashMap<String, CopyStep> = HashMap::with_capacity(objects.len());
    let mut order = Vec::with_capacity(objects.len() + 1);
    for object in objects {
        if object.key == source {
            marker_exists = true;
            continue;
        }
        let Some(relative) = object.key.strip_prefix(source) else {
            continue;
        };
        let step = CopyStep {
            destination: format!("{}{relative}", destination.as_str()),
            source: object.key.clone(),
            exists: true,
        };
        if steps.insert(object.key.clone(), step).is_none() {
            order.push(object.key);
        }
    }

    let mut plan: Vec<CopyStep> = order
        .into_iter()
        .filter_map(|key| steps.remove(&key))
        .collect();
    plan.push(CopyStep {
        source: source.to_string(),
        destination: destination.as_str().to_string(),
        exists: marker_exists,
    });
    Ok(Some(plan))
}

/// Delete `keys` in store-sized batches, recording each key's result.
async fn delete_chunked(
    store: &dyn ObjectStore,
    bucket: &str,
    keys: &[String],
    outcome: &mut OperationOutcome,
) {
    for chunk in keys.chunks(MAX_DELETE_BATCH) {
        match store.delete_many(bucket, chunk).await {
            Ok(refused) => {
                let refused: HashMap<_, _> = refused.into_iter().collect();
                for key in chunk {
                    match refused.get(key) {
                        Some(reason) => {
                            warn!(bucket, key = %key, reason = %reason, "delete refused");
                            outcome.fail(key.clone(), reason);
                        }
                        None => outcome.succeed(key.clone()),
                    }
                }
            }
            Err(err) => {
                warn!(bucket, count = chunk.len(), error = %err, "delete batch failed");
                outcome.fail_all(chunk.iter().cloned(), &err);
            }
        }
    }
}
