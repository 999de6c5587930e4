//! In-memory store backend
//!
//! Used by tests and by single-process runs without MongoDB. Writes can be
//! made to fail per key to exercise store error paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{ContentBuckets, Record, RecordStore, Stores, WriteMode};
use crate::db::schemas::{
    BenefactorDoc, BlacklistDoc, FailedLinkDoc, GuildConfig, LinkTrackerDoc,
};
use crate::types::{Result, SyncError};

/// Simple in-memory record collection
pub struct MemoryRecordStore<T> {
    records: RwLock<BTreeMap<String, T>>,
    failing_keys: RwLock<HashSet<String>>,
    fail_all: AtomicBool,
}

impl<T: Record> MemoryRecordStore<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            failing_keys: RwLock::new(HashSet::new()),
            fail_all: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write for `key` fail
    pub async fn fail_writes_for(&self, key: &str) {
        self.failing_keys.write().await.insert(key.to_string());
    }

    /// Make every subsequent write fail, or stop doing so
    pub fn fail_all_writes(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::Relaxed);
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Direct read for assertions
    pub async fn get(&self, key: &str) -> Option<T> {
        self.records.read().await.get(key).cloned()
    }

    async fn check_write(&self, key: &str) -> Result<()> {
        if self.fail_all.load(Ordering::Relaxed) || self.failing_keys.read().await.contains(key) {
            return Err(SyncError::Database(format!("Write rejected for {}", key)));
        }
        Ok(())
    }
}

impl<T: Record> Default for MemoryRecordStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> RecordStore<T> for MemoryRecordStore<T> {
    async fn upsert(&self, record: &T, mode: WriteMode) -> Result<()> {
        let key = record.key();
        self.check_write(&key).await?;
        let mut records = self.records.write().await;
        let merged = match (mode, records.get(&key)) {
            (WriteMode::Merge, Some(existing)) => overlay(existing, record)?,
            _ => record.clone(),
        };
        records.insert(key, merged);
        Ok(())
    }

    async fn find(&self, key: &str) -> Result<Option<T>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn find_all(&self) -> Result<Vec<T>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        self.check_write(key).await?;
        Ok(self.records.write().await.remove(key).is_some())
    }

    async fn drop_all(&self) -> Result<()> {
        if self.fail_all.load(Ordering::Relaxed) {
            return Err(SyncError::Database("Drop rejected".into()));
        }
        self.records.write().await.clear();
        Ok(())
    }

    async fn insert_all(&self, records: &[T]) -> Result<()> {
        for record in records {
            self.check_write(&record.key()).await?;
        }
        let mut stored = self.records.write().await;
        for record in records {
            stored.insert(record.key(), record.clone());
        }
        Ok(())
    }
}

/// Set the fields `update` serializes over `existing`, like a `$set`
fn overlay<T: Record>(existing: &T, update: &T) -> Result<T> {
    let mut base = serde_json::to_value(existing)?;
    if let (Some(fields), serde_json::Value::Object(set)) =
        (base.as_object_mut(), serde_json::to_value(update)?)
    {
        fields.extend(set);
    }
    Ok(serde_json::from_value(base)?)
}

/// Records which content buckets were dropped
#[derive(Default)]
pub struct MemoryBuckets {
    dropped: RwLock<Vec<String>>,
}

impl MemoryBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket ids dropped so far, in order
    pub async fn dropped(&self) -> Vec<String> {
        self.dropped.read().await.clone()
    }
}

#[async_trait]
impl ContentBuckets for MemoryBuckets {
    async fn drop_bucket(&self, collection_id: &str) -> Result<()> {
        self.dropped.write().await.push(collection_id.to_string());
        Ok(())
    }
}

/// Concrete in-memory collections, kept so tests can inspect them
#[derive(Clone, Default)]
pub struct MemoryStores {
    pub guilds: Arc<MemoryRecordStore<GuildConfig>>,
    pub backups: Arc<MemoryRecordStore<GuildConfig>>,
    pub links: Arc<MemoryRecordStore<LinkTrackerDoc>>,
    pub failures: Arc<MemoryRecordStore<FailedLinkDoc>>,
    pub vips: Arc<MemoryRecordStore<BenefactorDoc>>,
    pub blacklists: Arc<MemoryRecordStore<BlacklistDoc>>,
    pub buckets: Arc<MemoryBuckets>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type-erased handles sharing these collections
    pub fn stores(&self) -> Stores {
        Stores {
            guilds: self.guilds.clone(),
            backups: self.backups.clone(),
            links: self.links.clone(),
            failures: self.failures.clone(),
            vips: self.vips.clone(),
            blacklists: self.blacklists.clone(),
            buckets: self.buckets.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_replaces_by_key() {
        let store = MemoryRecordStore::<GuildConfig>::new();
        let mut config = GuildConfig::new("42");
        store.upsert(&config, WriteMode::Replace).await.unwrap();

        config.timezone = Some("UTC".to_string());
        store.upsert(&config, WriteMode::Replace).await.unwrap();

        assert_eq!(store.len().await, 1);
        let found = store.find("42").await.unwrap().unwrap();
        assert_eq!(found.timezone.as_deref(), Some("UTC"));
    }

    #[tokio::test]
    async fn test_merge_keeps_fields_the_update_omits() {
        let store = MemoryRecordStore::<BenefactorDoc>::new();
        let mut first = BenefactorDoc::new("U1").with_max_feeds(25);
        first.name = Some("alice".to_string());
        store.upsert(&first, WriteMode::Merge).await.unwrap();

        store
            .upsert(&BenefactorDoc::new("U1").with_servers(["T"]), WriteMode::Merge)
            .await
            .unwrap();

        let stored = store.get("U1").await.unwrap();
        assert_eq!(stored.max_feeds, Some(25));
        assert_eq!(stored.name.as_deref(), Some("alice"));
        assert_eq!(stored.servers, vec!["T".to_string()]);

        store
            .upsert(&BenefactorDoc::new("U1"), WriteMode::Replace)
            .await
            .unwrap();
        assert_eq!(store.get("U1").await.unwrap().max_feeds, None);
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_an_error() {
        let store = MemoryRecordStore::<GuildConfig>::new();
        assert!(!store.remove("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_failing_key_rejects_only_that_key() {
        let store = MemoryRecordStore::<BenefactorDoc>::new();
        store.fail_writes_for("U2").await;

        assert!(store.upsert(&BenefactorDoc::new("U1"), WriteMode::Merge).await.is_ok());
        let err = store
            .upsert(&BenefactorDoc::new("U2"), WriteMode::Merge)
            .await
            .unwrap_err();
        assert!(err.is_store_error());
        assert!(store.get("U2").await.is_none());
    }

    #[tokio::test]
    async fn test_buckets_record_drops() {
        let buckets = MemoryBuckets::new();
        buckets.drop_bucket("feed.g.abc").await.unwrap();
        assert_eq!(buckets.dropped().await, vec!["feed.g.abc".to_string()]);
    }
}
