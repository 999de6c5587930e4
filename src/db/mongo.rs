//! MongoDB client and collection wrapper
//!
//! Pattern adapted from holo-host/rust/util_libs/db/src/mongodb

use async_trait::async_trait;
use bson::{doc, Document};
use futures_util::TryStreamExt;
use mongodb::{error::ErrorKind, options::IndexOptions, Client, Collection, IndexModel};
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::schemas::{
    BenefactorDoc, BlacklistDoc, FailedLinkDoc, GuildConfig, LinkTrackerDoc,
    BLACKLIST_COLLECTION, FAILED_LINK_COLLECTION, GUILD_BACKUP_COLLECTION, GUILD_COLLECTION,
    LINK_TRACKER_COLLECTION, VIP_COLLECTION,
};
use crate::store::{ContentBuckets, Record, RecordStore, Stores, WriteMode};
use crate::types::{Result, SyncError};

/// MongoDB "ns not found", returned when dropping or removing from a
/// collection that does not exist yet
const NAMESPACE_NOT_FOUND: i32 = 26;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Whether a driver error only reports a missing collection
pub fn is_namespace_missing(err: &mongodb::error::Error) -> bool {
    matches!(err.kind.as_ref(), ErrorKind::Command(command) if command.code == NAMESPACE_NOT_FOUND)
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| SyncError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| SyncError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>>
    where
        T: Record + IntoIndexes,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    /// Open every collection the synchronization layer uses
    pub async fn stores(&self) -> Result<Stores> {
        Ok(Stores {
            guilds: Arc::new(self.collection::<GuildConfig>(GUILD_COLLECTION).await?),
            backups: Arc::new(self.collection::<GuildConfig>(GUILD_BACKUP_COLLECTION).await?),
            links: Arc::new(self.collection::<LinkTrackerDoc>(LINK_TRACKER_COLLECTION).await?),
            failures: Arc::new(self.collection::<FailedLinkDoc>(FAILED_LINK_COLLECTION).await?),
            vips: Arc::new(self.collection::<BenefactorDoc>(VIP_COLLECTION).await?),
            blacklists: Arc::new(self.collection::<BlacklistDoc>(BLACKLIST_COLLECTION).await?),
            buckets: Arc::new(MongoBuckets::new(self.clone())),
        })
    }

    /// Get the raw MongoDB client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Record,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Record + IntoIndexes,
{
    /// Create a new collection and apply indexes
    pub async fn new(client: &Client, db_name: &str, collection_name: &str) -> Result<Self> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<()> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| SyncError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    fn key_filter(key: &str) -> Document {
        let mut filter = Document::new();
        filter.insert(T::KEY_FIELD, key);
        filter
    }

    /// Get the underlying collection for advanced operations
    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }
}

#[async_trait]
impl<T> RecordStore<T> for MongoCollection<T>
where
    T: Record + IntoIndexes,
{
    async fn upsert(&self, record: &T, mode: WriteMode) -> Result<()> {
        let filter = Self::key_filter(&record.key());

        match mode {
            WriteMode::Replace => {
                self.inner
                    .replace_one(filter, record)
                    .upsert(true)
                    .await
                    .map_err(|e| SyncError::Database(format!("Upsert failed: {}", e)))?;
            }
            WriteMode::Merge => {
                let fields = bson::to_document(record)?;
                self.inner
                    .update_one(filter, doc! { "$set": fields })
                    .upsert(true)
                    .await
                    .map_err(|e| SyncError::Database(format!("Update failed: {}", e)))?;
            }
        }

        Ok(())
    }

    async fn find(&self, key: &str) -> Result<Option<T>> {
        self.inner
            .find_one(Self::key_filter(key))
            .await
            .map_err(|e| SyncError::Database(format!("Find failed: {}", e)))
    }

    async fn find_all(&self) -> Result<Vec<T>> {
        let cursor = self
            .inner
            .find(doc! {})
            .await
            .map_err(|e| SyncError::Database(format!("Find failed: {}", e)))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| SyncError::Database(format!("Cursor read failed: {}", e)))
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        match self.inner.delete_one(Self::key_filter(key)).await {
            Ok(result) => Ok(result.deleted_count > 0),
            Err(e) if is_namespace_missing(&e) => Ok(false),
            Err(e) => Err(SyncError::Database(format!("Remove failed: {}", e))),
        }
    }

    async fn drop_all(&self) -> Result<()> {
        match self.inner.drop().await {
            Ok(()) => Ok(()),
            Err(e) if is_namespace_missing(&e) => Ok(()),
            Err(e) => Err(SyncError::Database(format!("Drop failed: {}", e))),
        }
    }

    async fn insert_all(&self, records: &[T]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        self.inner
            .insert_many(records.iter())
            .await
            .map_err(|e| SyncError::Database(format!("Insert failed: {}", e)))?;

        Ok(())
    }
}

/// Content buckets stored as one MongoDB collection each
#[derive(Clone)]
pub struct MongoBuckets {
    client: MongoClient,
}

impl MongoBuckets {
    pub fn new(client: MongoClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentBuckets for MongoBuckets {
    async fn drop_bucket(&self, collection_id: &str) -> Result<()> {
        let collection = self
            .client
            .inner()
            .database(self.client.db_name())
            .collection::<Document>(collection_id);

        match collection.drop().await {
            Ok(()) => {
                debug!("Dropped content bucket {}", collection_id);
                Ok(())
            }
            Err(e) if is_namespace_missing(&e) => Ok(()),
            Err(e) => Err(SyncError::Database(format!(
                "Failed to drop bucket {}: {}",
                collection_id, e
            ))),
        }
    }
}
