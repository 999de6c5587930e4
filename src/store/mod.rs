//! Canonical store adapter
//!
//! Key-addressed record collections with upsert, find and remove, plus the
//! per-link content buckets dropped when a link is released. Backed by
//! MongoDB in production (`crate::db`) and by `memory` in tests and
//! single-process development.

pub mod memory;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::db::schemas::{
    BenefactorDoc, BlacklistDoc, FailedLinkDoc, GuildConfig, LinkTrackerDoc,
};
use crate::types::Result;

pub use memory::{MemoryBuckets, MemoryRecordStore, MemoryStores};

/// A durable record addressed by a single string key
pub trait Record: Serialize + DeserializeOwned + Clone + Unpin + Send + Sync + 'static {
    /// Document field holding the key
    const KEY_FIELD: &'static str;

    fn key(&self) -> String;
}

/// How an upsert treats an existing record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the whole record, inserting if absent
    Replace,
    /// Set the record's fields over the existing document, inserting if absent
    Merge,
}

/// Typed record collection
#[async_trait]
pub trait RecordStore<T: Record>: Send + Sync {
    /// Insert or update the record under its key
    async fn upsert(&self, record: &T, mode: WriteMode) -> Result<()>;

    async fn find(&self, key: &str) -> Result<Option<T>>;

    async fn find_all(&self) -> Result<Vec<T>>;

    /// Remove by key. Returns whether a record was removed; a missing record
    /// is not an error.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Drop every record in the collection
    async fn drop_all(&self) -> Result<()>;

    async fn insert_all(&self, records: &[T]) -> Result<()>;
}

/// Cached feed content, one bucket per (link, partition)
#[async_trait]
pub trait ContentBuckets: Send + Sync {
    /// Drop a bucket. Dropping a bucket that does not exist succeeds.
    async fn drop_bucket(&self, collection_id: &str) -> Result<()>;
}

/// Deterministic content bucket name for a link in a partition
pub fn collection_id(link: &str, partition: Option<u32>) -> String {
    let digest = hex::encode(Sha256::digest(link.as_bytes()));
    let partition = partition.map_or_else(|| "g".to_string(), |p| p.to_string());
    format!("feed.{}.{}", partition, &digest[..24])
}

/// One handle per durable collection
#[derive(Clone)]
pub struct Stores {
    pub guilds: Arc<dyn RecordStore<GuildConfig>>,
    pub backups: Arc<dyn RecordStore<GuildConfig>>,
    pub links: Arc<dyn RecordStore<LinkTrackerDoc>>,
    pub failures: Arc<dyn RecordStore<FailedLinkDoc>>,
    pub vips: Arc<dyn RecordStore<BenefactorDoc>>,
    pub blacklists: Arc<dyn RecordStore<BlacklistDoc>>,
    pub buckets: Arc<dyn ContentBuckets>,
}
