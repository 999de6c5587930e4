//! Guild config synchronizer
//!
//! The only write path for guild configs. Mutations on a replica are
//! forwarded to the primary with the full config; the primary persists,
//! updates its cache when it serves the guild, and broadcasts the result.
//! Registry references follow the sources: removing a guild or a feed
//! decrements, restoring a backup increments.

use std::sync::Arc;
use tracing::{info, warn};

use super::{LinkRegistry, SyncContext};
use crate::db::schemas::{FeedSource, GuildConfig};
use crate::fabric::{Command, Event};
use crate::store::WriteMode;
use crate::types::{Outcome, Partition, Result, SyncError};

/// Result of restoring a guild from its backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreResult {
    /// No backup, or the backup held nothing worth restoring
    NothingToRestore,
    Restored {
        config: GuildConfig,
        /// Feeds restored with their registry references
        restored: Vec<String>,
        /// Feeds dropped because their channel no longer exists
        missing_channel: Vec<String>,
    },
}

pub struct GuildSync {
    ctx: Arc<SyncContext>,
    links: Arc<LinkRegistry>,
}

impl GuildSync {
    pub fn new(ctx: Arc<SyncContext>, links: Arc<LinkRegistry>) -> Self {
        Self { ctx, links }
    }

    /// Cache every stored config this process serves. Returns how many.
    pub async fn load(&self) -> Result<usize> {
        let mut loaded = 0;
        for config in self.ctx.stores.guilds.find_all().await? {
            if self.ctx.owns_guild(&config.id) {
                self.ctx.cache.insert_guild(config);
                loaded += 1;
            }
        }
        info!("Loaded {} guild config(s)", loaded);
        Ok(loaded)
    }

    pub fn get(&self, guild_id: &str) -> Option<GuildConfig> {
        self.ctx.cache.guild(guild_id)
    }

    /// Persist a config and propagate it
    pub async fn update(&self, config: GuildConfig) -> Result<Outcome<()>> {
        if !self.ctx.identity.is_authoritative() {
            return Ok(self.ctx.forward(Command::GuildUpdate { guild: config }).await);
        }
        let partition = self.ctx.identity.partition();
        self.apply_update(config, partition).await.map(Outcome::Applied)
    }

    pub async fn apply_update(&self, config: GuildConfig, partition: Partition) -> Result<()> {
        if config.is_empty() {
            info!("(G: {}) 0 sources found with no custom settings, deleting", config.id);
            return self.apply_remove(&config, partition).await;
        }

        self.ctx.stores.guilds.upsert(&config, WriteMode::Replace).await?;
        if self.ctx.owns_guild(&config.id) {
            self.ctx.cache.insert_guild(config.clone());
        }
        self.ctx.broadcast(Event::GuildUpdated { guild: config }).await;
        Ok(())
    }

    /// Remove a config, keeping a backup when it still has sources
    pub async fn remove(&self, config: &GuildConfig) -> Result<Outcome<()>> {
        if !self.ctx.identity.is_authoritative() {
            return Ok(self
                .ctx
                .forward(Command::GuildRemove {
                    guild: config.clone(),
                })
                .await);
        }
        let partition = self.ctx.identity.partition();
        self.apply_remove(config, partition).await.map(Outcome::Applied)
    }

    pub async fn apply_remove(&self, config: &GuildConfig, partition: Partition) -> Result<()> {
        let guild_id = &config.id;
        if config.has_sources() {
            if let Err(e) = self.apply_backup(config).await {
                warn!("(G: {}) Unable to back up guild before removal: {}", guild_id, e);
            }
        }

        // References are released once, by whichever removal deletes the record
        if self.ctx.stores.guilds.remove(guild_id).await? {
            for source in config.sources.values() {
                if let Err(e) = self.links.apply_decrement(&source.link, partition).await {
                    warn!("(G: {}) Unable to decrement link {}: {}", guild_id, source.link, e);
                }
            }
        } else {
            info!("(G: {}) Guild config already removed", guild_id);
        }

        self.ctx.cache.remove_guild(guild_id);
        self.ctx
            .broadcast(Event::GuildRemoved {
                guild_id: guild_id.clone(),
            })
            .await;
        info!("(G: {}) Removed guild config", guild_id);
        Ok(())
    }

    /// Disable a feed. Disabling a disabled feed succeeds without a write.
    /// Returns the feed's link, known even when the change is forwarded.
    pub async fn disable_feed(&self, guild_id: &str, rss_name: &str) -> Result<(String, Outcome<()>)> {
        self.set_disabled(guild_id, rss_name, true).await
    }

    /// Enable a feed. Enabling an enabled feed succeeds without a write.
    /// Returns the feed's link, known even when the change is forwarded.
    pub async fn enable_feed(&self, guild_id: &str, rss_name: &str) -> Result<(String, Outcome<()>)> {
        self.set_disabled(guild_id, rss_name, false).await
    }

    async fn set_disabled(
        &self,
        guild_id: &str,
        rss_name: &str,
        disabled: bool,
    ) -> Result<(String, Outcome<()>)> {
        let guild = self.cached(guild_id)?;
        let source = source_of(&guild, rss_name)?;
        let link = source.link.clone();
        if source.is_disabled() == disabled {
            return Ok((link, Outcome::Applied(())));
        }

        if !self.ctx.identity.is_authoritative() {
            let rss_name = rss_name.to_string();
            let command = if disabled {
                Command::FeedDisable { guild, rss_name }
            } else {
                Command::FeedEnable { guild, rss_name }
            };
            return Ok((link, self.ctx.forward(command).await));
        }
        let partition = self.ctx.identity.partition();
        self.apply_set_disabled(guild, rss_name, disabled, partition).await?;
        Ok((link, Outcome::Applied(())))
    }

    pub async fn apply_set_disabled(
        &self,
        mut guild: GuildConfig,
        rss_name: &str,
        disabled: bool,
        partition: Partition,
    ) -> Result<String> {
        let source = guild
            .sources
            .get_mut(rss_name)
            .ok_or_else(|| unknown_feed(&guild.id, rss_name))?;
        let link = source.link.clone();
        if source.is_disabled() == disabled {
            return Ok(link);
        }
        source.disabled = disabled.then_some(true);

        let guild_id = guild.id.clone();
        self.apply_update(guild, partition).await?;
        if disabled {
            info!("(G: {}) Feed named {} has been disabled", guild_id, rss_name);
        } else {
            info!("(G: {}) Feed named {} has been enabled", guild_id, rss_name);
        }
        Ok(link)
    }

    /// Delete a feed, release its link reference and record the name in the
    /// recently-deleted ledger. Returns the feed's link.
    pub async fn remove_feed(&self, guild_id: &str, rss_name: &str) -> Result<Outcome<String>> {
        let guild = self.cached(guild_id)?;
        source_of(&guild, rss_name)?;

        if !self.ctx.identity.is_authoritative() {
            return Ok(self
                .ctx
                .forward(Command::FeedRemove {
                    guild,
                    rss_name: rss_name.to_string(),
                })
                .await);
        }
        let partition = self.ctx.identity.partition();
        self.apply_remove_feed(guild, rss_name, partition)
            .await
            .map(Outcome::Applied)
    }

    pub async fn apply_remove_feed(
        &self,
        mut guild: GuildConfig,
        rss_name: &str,
        partition: Partition,
    ) -> Result<String> {
        let source = guild
            .sources
            .remove(rss_name)
            .ok_or_else(|| unknown_feed(&guild.id, rss_name))?;
        let guild_id = guild.id.clone();

        // The forwarded config may be stale; the stored one decides
        let stored_link = self
            .ctx
            .stores
            .guilds
            .find(&guild_id)
            .await?
            .and_then(|stored| stored.sources.get(rss_name).map(|s| s.link.clone()));
        let Some(link) = stored_link else {
            info!("(G: {}) Feed {} already removed", guild_id, rss_name);
            return Ok(source.link);
        };

        self.apply_update(guild, partition).await?;
        if self.ctx.owns_guild(&guild_id) {
            self.ctx.cache.mark_deleted(rss_name).await;
        }
        if let Err(e) = self.links.apply_decrement(&link, partition).await {
            warn!("(G: {}) Unable to decrement link {}: {}", guild_id, link, e);
        }
        self.ctx
            .broadcast(Event::FeedRemoved {
                guild_id: guild_id.clone(),
                rss_name: rss_name.to_string(),
            })
            .await;

        info!("(G: {}) Feed {} has been removed", guild_id, link);
        Ok(link)
    }

    /// Keep a copy of a config. Returns false when the config is empty and
    /// nothing was written.
    pub async fn backup(&self, config: &GuildConfig) -> Result<Outcome<bool>> {
        if config.is_empty() {
            return Ok(Outcome::Applied(false));
        }
        if !self.ctx.identity.is_authoritative() {
            return Ok(self
                .ctx
                .forward(Command::GuildBackup {
                    guild: config.clone(),
                })
                .await);
        }
        self.apply_backup(config).await.map(Outcome::Applied)
    }

    pub async fn apply_backup(&self, config: &GuildConfig) -> Result<bool> {
        if config.is_empty() {
            return Ok(false);
        }
        self.ctx.stores.backups.upsert(config, WriteMode::Replace).await?;
        info!("(G: {}) Backed up guild", config.id);
        Ok(true)
    }

    /// Restore a guild from its backup. Feeds whose channel this process no
    /// longer sees are dropped; the rest get their references back.
    pub async fn restore(&self, guild_id: &str) -> Result<Outcome<RestoreResult>> {
        let backup = match self.ctx.stores.backups.find(guild_id).await {
            Ok(Some(backup)) if !backup.is_empty() => backup,
            Ok(_) => return Ok(Outcome::Applied(RestoreResult::NothingToRestore)),
            Err(e) => {
                warn!("(G: {}) Unable to read backup: {}", guild_id, e);
                return Ok(Outcome::Applied(RestoreResult::NothingToRestore));
            }
        };

        let dropped: Vec<String> = backup
            .sources
            .iter()
            .filter(|(_, source)| !self.ctx.directory.channel_exists(&source.channel))
            .map(|(name, _)| name.clone())
            .collect();

        if !self.ctx.identity.is_authoritative() {
            return Ok(self
                .ctx
                .forward(Command::GuildRestore { backup, dropped })
                .await);
        }
        let partition = self.ctx.identity.partition();
        self.apply_restore(backup, dropped, partition)
            .await
            .map(Outcome::Applied)
    }

    pub async fn apply_restore(
        &self,
        mut config: GuildConfig,
        dropped: Vec<String>,
        partition: Partition,
    ) -> Result<RestoreResult> {
        let guild_id = config.id.clone();
        let mut missing_channel = Vec::new();
        for name in dropped {
            if let Some(source) = config.sources.remove(&name) {
                info!(
                    "(G: {}) Removed feed {} due to missing channel {}",
                    guild_id, source.link, source.channel
                );
                missing_channel.push(name);
            }
        }
        let restored: Vec<String> = config.sources.keys().cloned().collect();

        self.apply_update(config.clone(), partition).await?;
        for source in config.sources.values() {
            if let Err(e) = self.links.apply_increment(&source.link, partition).await {
                warn!("(G: {}) Unable to increment link {}: {}", guild_id, source.link, e);
            }
        }

        if let Err(e) = self.ctx.stores.backups.remove(&guild_id).await {
            warn!("(G: {}) Unable to remove backup for guild after restore: {}", guild_id, e);
        }
        info!("(G: {}) Restored {} feed(s) from backup", guild_id, restored.len());

        Ok(RestoreResult::Restored {
            config,
            restored,
            missing_channel,
        })
    }

    /// Whether a config has no sources. Unless `skip_removal`, a config with
    /// no sources and no overrides is removed as well.
    pub async fn empty(&self, config: &GuildConfig, skip_removal: bool) -> Result<bool> {
        if config.has_sources() {
            return Ok(false);
        }
        if config.has_overrides() {
            info!("(G: {}) 0 sources found, skipping", config.id);
        } else if !skip_removal {
            self.remove(config).await?;
            info!("(G: {}) 0 sources found with no custom settings deleted", config.id);
        }
        Ok(true)
    }

    // Events from the primary

    pub fn apply_guild_updated(&self, guild: GuildConfig) {
        if self.ctx.owns_guild(&guild.id) {
            self.ctx.cache.insert_guild(guild);
        }
    }

    pub fn apply_guild_removed(&self, guild_id: &str) {
        self.ctx.cache.remove_guild(guild_id);
    }

    pub async fn apply_feed_removed(&self, guild_id: &str, rss_name: &str) {
        if !self.ctx.owns_guild(guild_id) {
            return;
        }
        if let Some(mut guild) = self.ctx.cache.guild(guild_id) {
            if guild.sources.remove(rss_name).is_some() {
                self.ctx.cache.insert_guild(guild);
            }
        }
        self.ctx.cache.mark_deleted(rss_name).await;
    }

    fn cached(&self, guild_id: &str) -> Result<GuildConfig> {
        self.ctx
            .cache
            .guild(guild_id)
            .ok_or_else(|| SyncError::Validation(format!("Unknown guild {}", guild_id)))
    }
}

fn source_of<'a>(guild: &'a GuildConfig, rss_name: &str) -> Result<&'a FeedSource> {
    guild
        .sources
        .get(rss_name)
        .ok_or_else(|| unknown_feed(&guild.id, rss_name))
}

fn unknown_feed(guild_id: &str, rss_name: &str) -> SyncError {
    SyncError::Validation(format!("(G: {}) Unknown feed {}", guild_id, rss_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{collection_id, RecordStore};
    use crate::sync::testing::{breaker, Harness};
    use crate::sync::{AlertDispatcher, FailureTracker};
    use crate::types::FailureState;

    struct Fixture {
        harness: Harness,
        guilds: GuildSync,
        links: Arc<LinkRegistry>,
        failures: Arc<FailureTracker>,
    }

    fn fixture(harness: Harness) -> Fixture {
        let alerts = Arc::new(AlertDispatcher::new(harness.ctx.clone()));
        let failures = Arc::new(FailureTracker::new(harness.ctx.clone(), alerts));
        let links = Arc::new(LinkRegistry::new(harness.ctx.clone(), failures.clone()));
        let guilds = GuildSync::new(harness.ctx.clone(), links.clone());
        Fixture {
            harness,
            guilds,
            links,
            failures,
        }
    }

    fn guild_42() -> GuildConfig {
        GuildConfig::new("42").with_source("a", FeedSource::new("X", "c1", "A"))
    }

    /// Stores and caches `config` with one reference per source
    async fn subscribe(f: &Fixture, config: GuildConfig) {
        for source in config.sources.values() {
            f.links.increment(&source.link).await.unwrap();
        }
        f.guilds.update(config).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_persists_and_caches() {
        let f = fixture(Harness::unsharded(breaker(5)));
        assert_eq!(f.guilds.update(guild_42()).await.unwrap(), Outcome::Applied(()));

        assert_eq!(f.harness.stores.guilds.get("42").await, Some(guild_42()));
        assert_eq!(f.guilds.get("42"), Some(guild_42()));
    }

    #[tokio::test]
    async fn test_remove_backs_up_and_releases_links() {
        let f = fixture(Harness::unsharded(breaker(5)));
        subscribe(&f, guild_42()).await;

        f.guilds.remove(&guild_42()).await.unwrap();

        assert!(f.guilds.get("42").is_none());
        assert!(f.harness.stores.guilds.is_empty().await);
        assert_eq!(f.harness.stores.backups.get("42").await, Some(guild_42()));
        assert_eq!(f.links.get("X").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_repeated_remove_releases_links_once() {
        let f = fixture(Harness::unsharded(breaker(5)));
        subscribe(&f, guild_42()).await;
        subscribe(
            &f,
            GuildConfig::new("7").with_source("b", FeedSource::new("X", "c2", "B")),
        )
        .await;
        assert_eq!(f.links.get("X").await.unwrap(), 2);

        f.guilds.remove(&guild_42()).await.unwrap();
        f.guilds.remove(&guild_42()).await.unwrap();

        assert_eq!(f.links.get("X").await.unwrap(), 1);
        assert!(f.harness.stores.buckets.dropped().await.is_empty());
        assert!(f.guilds.get("7").is_some());
    }

    #[tokio::test]
    async fn test_replayed_feed_removal_with_stale_config() {
        let f = fixture(Harness::unsharded(breaker(5)));
        let two_feeds = guild_42().with_source("b", FeedSource::new("Y", "c1", "B"));
        subscribe(&f, two_feeds.clone()).await;
        subscribe(
            &f,
            GuildConfig::new("7").with_source("c", FeedSource::new("X", "c2", "C")),
        )
        .await;

        for _ in 0..2 {
            let link = f
                .guilds
                .apply_remove_feed(two_feeds.clone(), "a", None)
                .await
                .unwrap();
            assert_eq!(link, "X");
        }

        assert_eq!(f.links.get("X").await.unwrap(), 1);
        assert_eq!(f.links.get("Y").await.unwrap(), 1);
        let stored = f.harness.stores.guilds.get("42").await.unwrap();
        assert!(!stored.sources.contains_key("a"));
        assert!(stored.sources.contains_key("b"));
    }

    #[tokio::test]
    async fn test_disable_and_enable_are_idempotent() {
        let f = fixture(Harness::unsharded(breaker(5)));
        subscribe(&f, guild_42()).await;

        for _ in 0..2 {
            let (link, outcome) = f.guilds.disable_feed("42", "a").await.unwrap();
            assert_eq!(link, "X");
            assert_eq!(outcome, Outcome::Applied(()));
        }
        let stored = f.harness.stores.guilds.get("42").await.unwrap();
        assert!(stored.sources["a"].is_disabled());

        for _ in 0..2 {
            let (link, outcome) = f.guilds.enable_feed("42", "a").await.unwrap();
            assert_eq!(link, "X");
            assert_eq!(outcome, Outcome::Applied(()));
        }
        let cached = f.guilds.get("42").unwrap();
        assert_eq!(cached.sources["a"].disabled, None);
    }

    #[tokio::test]
    async fn test_unknown_guild_or_feed_is_validation_error() {
        let f = fixture(Harness::unsharded(breaker(5)));
        subscribe(&f, guild_42()).await;

        assert!(matches!(
            f.guilds.disable_feed("missing", "a").await,
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            f.guilds.remove_feed("42", "nope").await,
            Err(SyncError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_feed_releases_last_reference() {
        let f = fixture(Harness::unsharded(breaker(5)));
        subscribe(&f, guild_42()).await;
        f.failures.increment("X").await.unwrap();

        let link = f.guilds.remove_feed("42", "a").await.unwrap();
        assert_eq!(link, Outcome::Applied("X".to_string()));

        assert_eq!(f.links.get("X").await.unwrap(), 0);
        assert_eq!(
            f.harness.stores.buckets.dropped().await,
            vec![collection_id("X", None)]
        );
        assert!(f.harness.ctx.cache.failure("X").await.is_none());
        assert!(f.harness.ctx.cache.recently_deleted("a").await);
        // The last feed is gone and there are no overrides
        assert!(f.guilds.get("42").is_none());
    }

    #[tokio::test]
    async fn test_remove_feed_keeps_shared_link() {
        let f = fixture(Harness::unsharded(breaker(5)));
        subscribe(&f, guild_42()).await;
        subscribe(
            &f,
            GuildConfig::new("7").with_source("b", FeedSource::new("X", "c2", "B")),
        )
        .await;
        f.failures.increment("X").await.unwrap();

        f.guilds.remove_feed("42", "a").await.unwrap();

        assert_eq!(f.links.get("X").await.unwrap(), 1);
        assert!(f.harness.stores.buckets.dropped().await.is_empty());
        assert_eq!(
            f.harness.ctx.cache.failure("X").await,
            Some(FailureState::Counting { count: 1 })
        );
    }

    #[tokio::test]
    async fn test_restore_without_backup() {
        let f = fixture(Harness::unsharded(breaker(5)));

        let result = f.guilds.restore("42").await.unwrap();
        assert_eq!(result, Outcome::Applied(RestoreResult::NothingToRestore));
        assert_eq!(f.harness.ctx.cache.guild_count(), 0);
    }

    #[tokio::test]
    async fn test_restore_drops_feeds_with_missing_channels() {
        let f = fixture(Harness::unsharded(breaker(5)));
        f.harness.directory.add_channel("c1", true);
        let backup = guild_42().with_source("gone", FeedSource::new("Y", "deleted", "G"));
        f.harness
            .stores
            .backups
            .upsert(&backup, WriteMode::Replace)
            .await
            .unwrap();

        let result = f.guilds.restore("42").await.unwrap().applied().unwrap();
        let RestoreResult::Restored {
            config,
            restored,
            missing_channel,
        } = result
        else {
            panic!("expected a restore");
        };

        assert_eq!(restored, vec!["a".to_string()]);
        assert_eq!(missing_channel, vec!["gone".to_string()]);
        assert_eq!(config, guild_42());
        assert_eq!(f.guilds.get("42"), Some(guild_42()));
        assert_eq!(f.links.get("X").await.unwrap(), 1);
        assert_eq!(f.links.get("Y").await.unwrap(), 0);
        assert!(f.harness.stores.backups.is_empty().await);
    }

    #[tokio::test]
    async fn test_backup_skips_empty_config() {
        let f = fixture(Harness::unsharded(breaker(5)));
        let outcome = f.guilds.backup(&GuildConfig::new("42")).await.unwrap();
        assert_eq!(outcome, Outcome::Applied(false));
        assert!(f.harness.stores.backups.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_prunes_only_without_overrides() {
        let f = fixture(Harness::unsharded(breaker(5)));

        let bare = GuildConfig::new("1");
        f.harness.ctx.cache.insert_guild(bare.clone());
        assert!(f.guilds.empty(&bare, false).await.unwrap());
        assert!(f.guilds.get("1").is_none());

        let mut tuned = GuildConfig::new("2");
        tuned.timezone = Some("Europe/Paris".to_string());
        f.guilds.update(tuned.clone()).await.unwrap();
        assert!(f.guilds.empty(&tuned, false).await.unwrap());
        assert_eq!(f.guilds.get("2"), Some(tuned));

        assert!(!f.guilds.empty(&guild_42(), false).await.unwrap());
    }

    #[tokio::test]
    async fn test_replica_forwards_with_full_config() {
        let f = fixture(Harness::replica(breaker(5)));
        f.harness.directory.add_guild("42", "Answers");
        f.harness.ctx.cache.insert_guild(guild_42());

        let (link, outcome) = f.guilds.disable_feed("42", "a").await.unwrap();
        assert!(outcome.is_forwarded());
        assert_eq!(link, "X");
        assert!(f.harness.stores.guilds.is_empty().await);

        let commands = f.harness.transport.take_commands().await;
        assert_eq!(
            commands[0].body,
            Command::FeedDisable {
                guild: guild_42(),
                rss_name: "a".to_string()
            }
        );
        // The cache waits for the primary's echo
        assert!(!f.guilds.get("42").unwrap().sources["a"].is_disabled());
    }

    #[tokio::test]
    async fn test_events_apply_only_to_owned_guilds() {
        let f = fixture(Harness::replica(breaker(5)));
        f.harness.directory.add_guild("42", "Answers");

        f.guilds.apply_guild_updated(guild_42());
        f.guilds
            .apply_guild_updated(GuildConfig::new("7").with_source("b", FeedSource::new("Y", "c", "B")));
        assert!(f.guilds.get("42").is_some());
        assert!(f.guilds.get("7").is_none());

        f.guilds.apply_feed_removed("42", "a").await;
        assert!(f.guilds.get("42").unwrap().sources.is_empty());
        assert!(f.harness.ctx.cache.recently_deleted("a").await);

        f.guilds.apply_guild_removed("42");
        assert!(f.guilds.get("42").is_none());
    }
}
