//! Guild and user blacklists, uniformized like the failure book

use std::sync::Arc;
use tracing::info;

use super::SyncContext;
use crate::db::schemas::BlacklistDoc;
use crate::fabric::{Command, Event};
use crate::store::WriteMode;
use crate::types::{Outcome, Result};

pub struct BlacklistRegistry {
    ctx: Arc<SyncContext>,
}

impl BlacklistRegistry {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Reload both lists from the store
    pub async fn refresh(&self) -> Result<()> {
        let docs = self.ctx.stores.blacklists.find_all().await?;
        let (guilds, users): (Vec<BlacklistDoc>, Vec<BlacklistDoc>) =
            docs.into_iter().partition(|doc| doc.is_guild);
        info!(
            "Loaded {} blacklisted guild(s) and {} user(s)",
            guilds.len(),
            users.len()
        );
        self.ctx.cache.replace_blacklists(
            guilds.into_iter().map(|doc| doc.id).collect(),
            users.into_iter().map(|doc| doc.id).collect(),
        );
        if self.ctx.identity.is_authoritative() {
            self.uniformize().await;
        }
        Ok(())
    }

    pub async fn add(&self, id: &str, is_guild: bool, name: Option<String>) -> Result<Outcome<()>> {
        let entry = BlacklistDoc {
            id: id.to_string(),
            is_guild,
            name,
        };
        if !self.ctx.identity.is_authoritative() {
            return Ok(self.ctx.forward(Command::BlacklistAdd { entry }).await);
        }
        self.apply_add(entry).await.map(Outcome::Applied)
    }

    pub async fn apply_add(&self, entry: BlacklistDoc) -> Result<()> {
        self.ctx.stores.blacklists.upsert(&entry, WriteMode::Replace).await?;
        self.ctx.cache.add_blacklisted(&entry.id, entry.is_guild);
        info!("Blacklisted {} ({:?})", entry.id, entry.name);
        self.uniformize().await;
        Ok(())
    }

    /// Lift a blacklist entry. Returns whether the id was listed.
    pub async fn remove(&self, id: &str) -> Result<Outcome<bool>> {
        if !self.ctx.identity.is_authoritative() {
            return Ok(self
                .ctx
                .forward(Command::BlacklistRemove { id: id.to_string() })
                .await);
        }
        self.apply_remove(id).await.map(Outcome::Applied)
    }

    pub async fn apply_remove(&self, id: &str) -> Result<bool> {
        let stored = self.ctx.stores.blacklists.remove(id).await?;
        let cached = self.ctx.cache.remove_blacklisted(id);
        self.uniformize().await;
        Ok(stored || cached)
    }

    pub fn is_blacklisted_guild(&self, guild_id: &str) -> bool {
        self.ctx.cache.is_blacklisted_guild(guild_id)
    }

    pub fn is_blacklisted_user(&self, user_id: &str) -> bool {
        self.ctx.cache.is_blacklisted_user(user_id)
    }

    pub fn apply_uniformized(&self, guilds: Vec<String>, users: Vec<String>) {
        self.ctx.cache.replace_blacklists(guilds, users);
    }

    async fn uniformize(&self) {
        let (guilds, users) = self.ctx.cache.blacklists();
        self.ctx
            .broadcast(Event::BlacklistsUniformized { guilds, users })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordStore;
    use crate::sync::testing::Harness;
    use crate::sync::SyncSettings;

    #[tokio::test]
    async fn test_add_and_remove() {
        let harness = Harness::unsharded(SyncSettings::default());
        let blacklists = BlacklistRegistry::new(harness.ctx.clone());

        blacklists.add("g1", true, Some("Spam".into())).await.unwrap();
        blacklists.add("u1", false, None).await.unwrap();
        assert!(blacklists.is_blacklisted_guild("g1"));
        assert!(blacklists.is_blacklisted_user("u1"));
        assert_eq!(harness.stores.blacklists.len().await, 2);

        assert_eq!(blacklists.remove("g1").await.unwrap(), Outcome::Applied(true));
        assert!(!blacklists.is_blacklisted_guild("g1"));
        assert_eq!(blacklists.remove("g1").await.unwrap(), Outcome::Applied(false));
    }

    #[tokio::test]
    async fn test_refresh_splits_guilds_and_users() {
        let harness = Harness::primary(SyncSettings::default());
        for (id, is_guild) in [("g1", true), ("u1", false)] {
            let doc = BlacklistDoc {
                id: id.into(),
                is_guild,
                name: None,
            };
            harness
                .stores
                .blacklists
                .upsert(&doc, WriteMode::Replace)
                .await
                .unwrap();
        }
        let blacklists = BlacklistRegistry::new(harness.ctx.clone());

        blacklists.refresh().await.unwrap();
        assert!(blacklists.is_blacklisted_guild("g1"));
        assert!(blacklists.is_blacklisted_user("u1"));

        let events = harness.transport.take_events().await;
        assert_eq!(
            events[0].body,
            Event::BlacklistsUniformized {
                guilds: vec!["g1".into()],
                users: vec!["u1".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_replica_forwards() {
        let harness = Harness::replica(SyncSettings::default());
        let blacklists = BlacklistRegistry::new(harness.ctx.clone());

        assert!(blacklists.add("g1", true, None).await.unwrap().is_forwarded());
        assert!(!blacklists.is_blacklisted_guild("g1"));
        assert_eq!(harness.transport.take_commands().await.len(), 1);
    }
}
