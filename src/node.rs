//! One shard process
//!
//! Composes the synchronization components over a shared context and
//! dispatches what arrives from the fabric: forwarded commands (primary
//! only), uniformizing events, and fleet queries.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::fabric::{answer_query, Command, Envelope, Event, Query, QueryReply};
use crate::sync::{
    AlertDispatcher, BlacklistRegistry, EntitlementPropagator, FailureTracker, GuildSync,
    LinkRegistry, SyncContext,
};
use crate::types::{Result, ShardIdentity};

pub struct ShardNode {
    ctx: Arc<SyncContext>,
    pub guilds: GuildSync,
    pub links: Arc<LinkRegistry>,
    pub failures: Arc<FailureTracker>,
    pub alerts: Arc<AlertDispatcher>,
    pub entitlements: EntitlementPropagator,
    pub blacklists: BlacklistRegistry,
}

impl ShardNode {
    pub fn new(ctx: SyncContext) -> Self {
        let ctx = Arc::new(ctx);
        let alerts = Arc::new(AlertDispatcher::new(ctx.clone()));
        let failures = Arc::new(FailureTracker::new(ctx.clone(), alerts.clone()));
        let links = Arc::new(LinkRegistry::new(ctx.clone(), failures.clone()));

        Self {
            guilds: GuildSync::new(ctx.clone(), links.clone()),
            entitlements: EntitlementPropagator::new(ctx.clone()),
            blacklists: BlacklistRegistry::new(ctx.clone()),
            links,
            failures,
            alerts,
            ctx,
        }
    }

    pub fn identity(&self) -> &ShardIdentity {
        &self.ctx.identity
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Load process state from the store
    pub async fn bootstrap(&self) -> Result<()> {
        self.guilds.load().await?;
        self.failures.initialize().await?;
        self.entitlements.refresh().await?;
        self.blacklists.refresh().await?;
        info!("Bootstrapped {}", self.ctx.identity);
        Ok(())
    }

    /// Apply a command forwarded by a replica
    pub async fn handle_command(&self, envelope: Envelope<Command>) -> Result<()> {
        if !self.ctx.identity.is_authoritative() {
            warn!(
                "Replica received command {}, ignoring",
                envelope.message_id
            );
            return Ok(());
        }

        let origin = envelope.origin;
        match envelope.body {
            Command::GuildUpdate { guild } => self.guilds.apply_update(guild, origin).await,
            Command::GuildRemove { guild } => self.guilds.apply_remove(&guild, origin).await,
            Command::FeedDisable { guild, rss_name } => self
                .guilds
                .apply_set_disabled(guild, &rss_name, true, origin)
                .await
                .map(drop),
            Command::FeedEnable { guild, rss_name } => self
                .guilds
                .apply_set_disabled(guild, &rss_name, false, origin)
                .await
                .map(drop),
            Command::FeedRemove { guild, rss_name } => self
                .guilds
                .apply_remove_feed(guild, &rss_name, origin)
                .await
                .map(drop),
            Command::GuildBackup { guild } => self.guilds.apply_backup(&guild).await.map(drop),
            Command::GuildRestore { backup, dropped } => self
                .guilds
                .apply_restore(backup, dropped, origin)
                .await
                .map(drop),
            Command::LinkIncrement { link } => {
                self.links.apply_increment(&link, origin).await.map(drop)
            }
            Command::LinkDecrement { link } => {
                self.links.apply_decrement(&link, origin).await.map(drop)
            }
            Command::FailureIncrement { link } => {
                self.failures.apply_increment(&link).await.map(drop)
            }
            Command::FailureFail { link } => self.failures.apply_fail(&link).await,
            Command::FailureReset { link } => self.failures.apply_reset(&link).await.map(drop),
            Command::VipUpdate { benefactor } => self.entitlements.apply_update(benefactor).await,
            Command::VipUpdateBulk { benefactors } => self
                .entitlements
                .apply_update_bulk(benefactors)
                .await
                .map(drop),
            Command::VipRemove { benefactor_id } => self
                .entitlements
                .apply_remove(&benefactor_id)
                .await
                .map(drop),
            Command::VipAddServers {
                benefactor_id,
                server_ids,
            } => self
                .entitlements
                .apply_add_servers(&benefactor_id, &server_ids)
                .await
                .map(drop),
            Command::VipRemoveServers {
                benefactor_id,
                server_ids,
            } => self
                .entitlements
                .apply_remove_servers(&benefactor_id, &server_ids)
                .await
                .map(drop),
            Command::BlacklistAdd { entry } => self.blacklists.apply_add(entry).await,
            Command::BlacklistRemove { id } => self.blacklists.apply_remove(&id).await.map(drop),
        }
    }

    /// Apply an event broadcast by another process. Events this process
    /// sent itself are skipped.
    pub async fn apply_event(&self, envelope: Envelope<Event>) {
        if envelope.origin == self.ctx.identity.partition() {
            debug!("Skipping own event {}", envelope.message_id);
            return;
        }

        match envelope.body {
            Event::GuildUpdated { guild } => self.guilds.apply_guild_updated(guild),
            Event::GuildRemoved { guild_id } => self.guilds.apply_guild_removed(&guild_id),
            Event::FeedRemoved { guild_id, rss_name } => {
                self.guilds.apply_feed_removed(&guild_id, &rss_name).await
            }
            Event::FailuresUniformized { book } => self.failures.apply_uniformized(book).await,
            Event::LinkAlert { link, message } => {
                self.alerts.dispatch(&link, &message).await;
            }
            Event::EntitlementsUniformized { entitlements } => {
                self.entitlements.apply_uniformized(entitlements).await
            }
            Event::BlacklistsUniformized { guilds, users } => {
                self.blacklists.apply_uniformized(guilds, users)
            }
        }
    }

    /// Answer a fleet query from this process's directory
    pub fn answer_query(&self, query: &Query) -> QueryReply {
        answer_query(query, self.ctx.identity.partition(), self.ctx.directory.as_ref())
    }
}
