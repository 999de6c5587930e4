//! Link reference registry
//!
//! Counts how many feed sources point at each link, per shard partition. A
//! count reaching zero releases the link: its content bucket is dropped and
//! its failure record reset. Replicas forward changes to the primary, which
//! mutates the origin's partition.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{FailureTracker, SyncContext};
use crate::db::schemas::LinkTrackerDoc;
use crate::fabric::Command;
use crate::store::{collection_id, WriteMode};
use crate::types::{LinkList, Outcome, Partition, Result, SyncError};

pub struct LinkRegistry {
    ctx: Arc<SyncContext>,
    failures: Arc<FailureTracker>,
    /// Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl LinkRegistry {
    pub fn new(ctx: Arc<SyncContext>, failures: Arc<FailureTracker>) -> Self {
        Self {
            ctx,
            failures,
            lock: Mutex::new(()),
        }
    }

    /// Count for `link` in this process's partition; zero when absent
    pub async fn get(&self, link: &str) -> Result<u32> {
        let partition = self.ctx.identity.partition();
        Ok(self.load(link, partition).await?.get(link).unwrap_or(0))
    }

    /// Count for `link` summed across every partition
    pub async fn global_count(&self, link: &str) -> Result<u32> {
        Ok(self.snapshot().await?.global_count(link))
    }

    /// Add one reference
    pub async fn increment(&self, link: &str) -> Result<Outcome<u32>> {
        if !self.ctx.identity.is_authoritative() {
            return Ok(self
                .ctx
                .forward(Command::LinkIncrement {
                    link: link.to_string(),
                })
                .await);
        }
        let partition = self.ctx.identity.partition();
        self.apply_increment(link, partition).await.map(Outcome::Applied)
    }

    /// Remove one reference. Decrementing an untracked link is a no-op.
    pub async fn decrement(&self, link: &str) -> Result<Outcome<u32>> {
        if !self.ctx.identity.is_authoritative() {
            return Ok(self
                .ctx
                .forward(Command::LinkDecrement {
                    link: link.to_string(),
                })
                .await);
        }
        let partition = self.ctx.identity.partition();
        self.apply_decrement(link, partition).await.map(Outcome::Applied)
    }

    pub async fn apply_increment(&self, link: &str, partition: Partition) -> Result<u32> {
        let _guard = self.lock.lock().await;
        let mut list = self.load(link, partition).await?;
        let count = list.increment(link);
        self.ctx
            .stores
            .links
            .upsert(&LinkTrackerDoc::new(link, count, partition), WriteMode::Replace)
            .await?;
        debug!("Link {} now has {} reference(s) in {:?}", link, count, partition);
        Ok(count)
    }

    pub async fn apply_decrement(&self, link: &str, partition: Partition) -> Result<u32> {
        let guard = self.lock.lock().await;
        let mut list = self.load(link, partition).await?;
        match list.decrement(link) {
            None => {
                debug!("Decrement of untracked link {} ignored", link);
                Ok(0)
            }
            Some(0) => {
                self.ctx
                    .stores
                    .links
                    .remove(&LinkTrackerDoc::key_for(link, partition))
                    .await?;
                drop(guard);
                self.release(link, partition).await;
                Ok(0)
            }
            Some(count) => {
                self.ctx
                    .stores
                    .links
                    .upsert(&LinkTrackerDoc::new(link, count, partition), WriteMode::Replace)
                    .await?;
                Ok(count)
            }
        }
    }

    /// Every count in the store, across partitions
    pub async fn snapshot(&self) -> Result<LinkList> {
        let docs = self.ctx.stores.links.find_all().await?;
        Ok(LinkList::from_docs(self.ctx.identity.partition(), &docs))
    }

    /// Replace the durable registry with `list`
    pub async fn write(&self, list: &LinkList) -> Result<()> {
        if !self.ctx.identity.is_authoritative() {
            return Err(SyncError::Validation(
                "Only the primary may rewrite the link registry".into(),
            ));
        }
        let _guard = self.lock.lock().await;
        self.ctx.stores.links.drop_all().await?;
        self.ctx.stores.links.insert_all(&list.to_docs()).await?;
        info!("Rewrote link registry with {} entries", list.len());
        Ok(())
    }

    /// Alias of `write` for restoring a snapshot taken earlier
    pub async fn load_from_snapshot(&self, list: &LinkList) -> Result<()> {
        self.write(list).await
    }

    async fn load(&self, link: &str, partition: Partition) -> Result<LinkList> {
        let docs: Vec<LinkTrackerDoc> = self
            .ctx
            .stores
            .links
            .find(&LinkTrackerDoc::key_for(link, partition))
            .await?
            .into_iter()
            .collect();
        Ok(LinkList::from_docs(partition, &docs))
    }

    /// Free everything held for a link nobody references any more
    async fn release(&self, link: &str, partition: Partition) {
        let bucket = collection_id(link, partition);
        if let Err(e) = self.ctx.stores.buckets.drop_bucket(&bucket).await {
            warn!("Unable to drop content bucket {} for {}: {}", bucket, link, e);
        }
        if let Err(e) = self.failures.apply_reset(link).await {
            warn!("Unable to reset failure status for released link {}: {}", link, e);
        }
        info!("Released link {}", link);
    }
}
