//! In-memory object store for tests and local dry runs.
//!
//! Buckets are flat key → bytes maps, like S3 itself. Keys can be marked as
//! failing to exercise the pipeline's partial-failure paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::ObjectStore;

#[derive(Debug, Default)]
struct Bucket {
    objects: BTreeMap<String, Vec<u8>>,
    notification_arn: Option<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    buckets: RwLock<HashMap<String, Bucket>>,
    failing_keys: RwLock<HashSet<String>>,
    failing_removes: RwLock<HashSet<String>>,
}

fn poisoned<T>(_: PoisonError<T>) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `bucket`.
    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::new();
        if let Ok(mut buckets) = store.buckets.write() {
            buckets.insert(bucket.to_string(), Bucket::default());
        }
        store
    }

    /// Every later operation that reads or writes `key` fails.
    pub fn fail_key(&self, key: &str) {
        if let Ok(mut failing) = self.failing_keys.write() {
            failing.insert(key.to_string());
        }
    }

    /// Only deletes of `key` fail, so a move copies but leaves the source.
    pub fn fail_remove(&self, key: &str) {
        if let Ok(mut failing) = self.failing_removes.write() {
            failing.insert(key.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing_keys.write() {
            failing.clear();
        }
        if let Ok(mut failing) = self.failing_removes.write() {
            failing.clear();
        }
    }

    /// Snapshot of all keys in a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .ok()
            .and_then(|buckets| buckets.get(bucket).map(|b| b.objects.keys().cloned().collect()))
            .unwrap_or_default()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .read()
            .map(|buckets| {
                buckets
                    .get(bucket)
                    .is_some_and(|b| b.objects.contains_key(key))
            })
            .unwrap_or(false)
    }

    pub fn notification_arn(&self, bucket: &str) -> Option<String> {
        self.buckets
            .read()
            .ok()
            .and_then(|buckets| buckets.get(bucket).and_then(|b| b.notification_arn.clone()))
    }

    fn check_key(&self, key: &str) -> Result<()> {
        if self.failing_keys.read().map_err(poisoned)?.contains(key) {
            bail!("injected failure for key {key}");
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.check_key(key)?;
        let buckets = self.buckets.read().map_err(poisoned)?;
        let bucket_state = buckets
            .get(bucket)
            .ok_or_else(|| anyhow!("NoSuchBucket: {bucket}"))?;
        bucket_state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchKey: {bucket}/{key}"))
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<()> {
        self.check_key(key)?;
        let mut buckets = self.buckets.write().map_err(poisoned)?;
        let bucket_state = buckets
            .get_mut(bucket)
            .ok_or_else(|| anyhow!("NoSuchBucket: {bucket}"))?;
        bucket_state.objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn copy(
        &self,
        bucket: &str,
        dest_key: &str,
        src_bucket: &str,
        src_key: &str,
    ) -> Result<()> {
        self.check_key(src_key)?;
        self.check_key(dest_key)?;
        let mut buckets = self.buckets.write().map_err(poisoned)?;
        let data = buckets
            .get(src_bucket)
            .and_then(|b| b.objects.get(src_key))
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchKey: {src_bucket}/{src_key}"))?;
        buckets
            .get_mut(bucket)
            .ok_or_else(|| anyhow!("NoSuchBucket: {bucket}"))?
            .objects
            .insert(dest_key.to_string(), data);
        Ok(())
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<()> {
        self.check_key(key)?;
        if self.failing_removes.read().map_err(poisoned)?.contains(key) {
            bail!("injected delete failure for key {key}");
        }
        let mut buckets = self.buckets.write().map_err(poisoned)?;
        buckets
            .get_mut(bucket)
            .ok_or_else(|| anyhow!("NoSuchBucket: {bucket}"))?
            .objects
            .remove(key);
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str, recursive: bool) -> Result<Vec<String>> {
        let buckets = self.buckets.read().map_err(poisoned)?;
        let bucket_state = buckets
            .get(bucket)
            .ok_or_else(|| anyhow!("NoSuchBucket: {bucket}"))?;

        Ok(bucket_state
            .objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| recursive || !key[prefix.len()..].contains('/'))
            .cloned()
            .collect())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.read().map_err(poisoned)?.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> Result<()> {
        let mut buckets = self.buckets.write().map_err(poisoned)?;
        if buckets.contains_key(bucket) {
            bail!("BucketAlreadyOwnedByYou: {bucket}");
        }
        buckets.insert(bucket.to_string(), Bucket::default());
        Ok(())
    }

    async fn set_notification_config(&self, bucket: &str, queue_arn: &str) -> Result<()> {
        let mut buckets = self.buckets.write().map_err(poisoned)?;
        buckets
            .get_mut(bucket)
            .ok_or_else(|| anyhow!("NoSuchBucket: {bucket}"))?
            .notification_arn = Some(queue_arn.to_string());
        Ok(())
    }
}
