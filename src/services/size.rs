//! Bucket size aggregation.
//!
//! A recalculation is a full walk of the bucket summing every object
//! size, folder markers included. Background recalculations are
//! single-flight per bucket: a trigger that arrives while a walk is
//! running marks the bucket dirty and the running worker walks once more,
//! so the last value written always comes from a walk that started after
//! the last trigger.

use super::{ServiceError, enumeration::enumerate_all, metadata::MetadataResult};
use crate::store::{ObjectStore, StorageResult};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, error, instrument};

/// Destination of recalculated totals.
#[async_trait]
pub trait SizeSink: Send + Sync {
    async fn record_size(&self, bucket: &str, size_bytes: u64) -> MetadataResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Running,
    /// Another trigger arrived after the running walk started.
    Dirty,
}

/// Sum of every object size under the bucket root.
#[instrument(skip(store))]
pub async fn total_size(store: &dyn ObjectStore, bucket: &str) -> StorageResult<u64> {
    let objects = enumerate_all(store, bucket, "").await?;
    Ok(objects.iter().map(|object| object.size).sum())
}

#[derive(Clone)]
pub struct SizeAggregator {
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn SizeSink>,
    slots: Arc<Mutex<HashMap<String, SlotState>>>,
}

impl SizeAggregator {
    pub fn new(store: Arc<dyn ObjectStore>, sink: Arc<dyn SizeSink>) -> Self {
        Self {
            store,
            sink,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Recompute the total of `bucket` and persist it.
    pub async fn recalculate(&self, bucket: &str) -> Result<u64, ServiceError> {
        let total = total_size(self.store.as_ref(), bucket).await?;
        self.sink.record_size(bucket, total).await?;
        debug!(bucket, total, "bucket size recorded");
        Ok(total)
    }

    /// Request a background recalculation of `bucket` without waiting.
    pub fn schedule(&self, bucket: &str) {
        {
            let mut slots = self.slots();
            if let Some(state) = slots.get_mut(bucket) {
                *state = SlotState::Dirty;
                debug!(bucket, "size recalculation already running, coalesced");
                return;
            }
            slots.insert(bucket.to_string(), SlotState::Running);
        }

        let worker = self.clone();
        let bucket = bucket.to_string();
        tokio::spawn(async move { worker.run(bucket).await });
    }

    /// Whether a background recalculation is running or queued.
    pub fn is_pending(&self, bucket: &str) -> bool {
        self.slots().contains_key(bucket)
    }

    async fn run(self, bucket: String) {
        loop {
            if let Err(err) = self.recalculate(&bucket).await {
                error!(bucket = %bucket, error = %err, "background size recalculation failed");
            }

            let again = {
                let mut slots = self.slots();
                if slots.get(&bucket) == Some(&SlotState::Dirty) {
                    slots.insert(bucket.clone(), SlotState::Running);
                    true
                } else {
                    slots.remove(&bucket);
                    false
                }
            };
            if !again {
                break;
            }
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, SlotState>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use bytes::Bytes;
    use std::time::Duration;

    /// Sink that remembers every value written.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) records: Mutex<Vec<(String, u64)>>,
    }

    impl RecordingSink {
        pub(crate) fn last(&self, bucket: &str) -> Option<u64> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(name, _)| name == bucket)
                .map(|(_, size)| *size)
        }

        fn writes(&self, bucket: &str) -> usize {
            self.records
                .lock()
                .unwrap()
                .iter()
                .filter(|(name, _)| name == bucket)
                .count()
        }
    }

    #[async_trait]
    impl SizeSink for RecordingSink {
        async fn record_size(&self, bucket: &str, size_bytes: u64) -> MetadataResult<()> {
            self.records
                .lock()
                .unwrap()
                .push((bucket.to_string(), size_bytes));
            Ok(())
        }
    }

    async fn put(store: &InMemoryStore, bucket: &str, key: &str, len: usize) {
        store
            .put(bucket, key, Bytes::from(vec![b'x'; len]), None)
            .await
            .unwrap();
    }

    async fn setup() -> (Arc<InMemoryStore>, Arc<RecordingSink>, SizeAggregator) {
        let store = Arc::new(InMemoryStore::new().with_page_size(3));
        for bucket in ["left", "right"] {
            store.ensure_bucket(bucket).await.unwrap();
        }
        let sink = Arc::new(RecordingSink::default());
        let aggregator = SizeAggregator::new(store.clone(), sink.clone());
        (store, sink, aggregator)
    }

    async fn wait_idle(aggregator: &SizeAggregator, bucket: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while aggregator.is_pending(bucket) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn totals_include_markers_and_nested_keys() {
        let (store, sink, aggregator) = setup().await;
        put(&store, "left", "a/", 0).await;
        put(&store, "left", "a/b.bin", 100).await;
        put(&store, "left", "a/c/d.bin", 23).await;
        put(&store, "left", "top.txt", 1).await;

        assert_eq!(aggregator.recalculate("left").await.unwrap(), 124);
        assert_eq!(sink.last("left"), Some(124));
    }

    #[tokio::test]
    async fn disjoint_buckets_do_not_interfere() {
        let (store, sink, aggregator) = setup().await;
        for i in 0..10 {
            put(&store, "left", &format!("l/{i}"), 10).await;
            put(&store, "right", &format!("r/{i}"), 3).await;
        }

        let (left, right) = tokio::join!(
            aggregator.recalculate("left"),
            aggregator.recalculate("right")
        );
        assert_eq!(left.unwrap(), 100);
        assert_eq!(right.unwrap(), 30);
        assert_eq!(sink.last("left"), Some(100));
        assert_eq!(sink.last("right"), Some(30));
    }

    #[tokio::test]
    async fn upload_grows_and_delete_shrinks_the_total() {
        let (store, _sink, aggregator) = setup().await;
        put(&store, "left", "base", 50).await;
        let before = aggregator.recalculate("left").await.unwrap();

        put(&store, "left", "more", 20).await;
        let after_upload = aggregator.recalculate("left").await.unwrap();
        assert!(after_upload >= before);

        store.delete_many("left", &["base".to_string()]).await.unwrap();
        let after_delete = aggregator.recalculate("left").await.unwrap();
        assert!(after_delete <= after_upload);
        assert_eq!(after_delete, 20);
    }

    #[tokio::test]
    async fn bursts_of_triggers_coalesce() {
        let (store, sink, aggregator) = setup().await;
        put(&store, "left", "one", 5).await;

        for _ in 0..5 {
            aggregator.schedule("left");
        }
        assert!(aggregator.is_pending("left"));
        put(&store, "left", "two", 6).await;

        wait_idle(&aggregator, "left").await;
        assert_eq!(sink.writes("left"), 2);
        assert_eq!(sink.last("left"), Some(11));
    }

    #[tokio::test]
    async fn failed_walk_releases_the_slot() {
        let (store, sink, aggregator) = setup().await;
        store.fail_list_after(0);

        aggregator.schedule("left");
        wait_idle(&aggregator, "left").await;

        assert_eq!(sink.last("left"), None);
        assert!(!aggregator.is_pending("left"));
    }
}
