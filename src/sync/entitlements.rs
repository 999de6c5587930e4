//! Benefactor entitlement propagation
//!
//! A benefactor sponsors guilds, raising their feed limit. Sponsorship is
//! exclusive: adding a guild to one benefactor takes it from any other.
//! Guild ids are validated against the whole fleet before they are
//! sponsored, and the maps are uniformized to every shard after each change.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::SyncContext;
use crate::db::schemas::BenefactorDoc;
use crate::fabric::{Command, Event, Query};
use crate::store::WriteMode;
use crate::types::{Entitlements, Outcome, Result, SponsorChange, SyncError};

/// Result of `add_servers`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddServersReport {
    /// Guild id -> display name, now sponsored
    pub added: BTreeMap<String, String>,
    /// Ids no shard reported as a live guild
    pub invalid: Vec<String>,
}

/// Result of `remove_servers`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveServersReport {
    /// Guild id -> display name, no longer sponsored
    pub removed: BTreeMap<String, String>,
    /// Ids not sponsored by the benefactor
    pub failed: Vec<String>,
}

pub struct EntitlementPropagator {
    ctx: Arc<SyncContext>,
}

impl EntitlementPropagator {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Rebuild the maps from durable benefactor records
    pub async fn refresh(&self) -> Result<()> {
        let docs = self.ctx.stores.vips.find_all().await?;
        let directory = self.ctx.directory.clone();
        let entitlements = Entitlements::from_benefactors(docs, |id| directory.guild_name(id));
        info!(
            "Loaded {} benefactor(s) sponsoring {} guild(s)",
            entitlements.benefactors.len(),
            entitlements.sponsored.len()
        );
        self.ctx.cache.replace_entitlements(entitlements).await;
        if self.ctx.identity.is_authoritative() {
            self.uniformize().await;
        }
        Ok(())
    }

    /// Feed limit for a guild: its benefactor's, else the default
    pub async fn feed_limit(&self, guild_id: &str) -> u32 {
        self.ctx
            .cache
            .read_entitlements(|e| e.feed_limit(guild_id))
            .await
            .unwrap_or(self.ctx.settings.max_feeds)
    }

    pub async fn benefactor_of(&self, guild_id: &str) -> Option<String> {
        self.ctx
            .cache
            .read_entitlements(|e| e.benefactor_of(guild_id).map(str::to_string))
            .await
    }

    /// Insert or update a benefactor. Servers listed on the record are
    /// validated and sponsored.
    pub async fn update(&self, benefactor: BenefactorDoc) -> Result<Outcome<()>> {
        if !self.ctx.identity.is_authoritative() {
            return Ok(self.ctx.forward(Command::VipUpdate { benefactor }).await);
        }
        self.apply_update(benefactor).await.map(Outcome::Applied)
    }

    pub async fn apply_update(&self, benefactor: BenefactorDoc) -> Result<()> {
        let settings = self.with_name(benefactor);
        self.commit_settings(&settings).await?;
        self.uniformize().await;

        if !settings.servers.is_empty() {
            self.apply_add_servers(&settings.id, &settings.servers).await?;
        }
        info!("Updated benefactor {} ({:?})", settings.id, settings.name);
        Ok(())
    }

    /// Update many benefactors. Every record is attempted; if any write
    /// fails the call reports `PartialBulk`, and the records that were
    /// written stay written.
    pub async fn update_bulk(&self, benefactors: Vec<BenefactorDoc>) -> Result<Outcome<Vec<String>>> {
        if !self.ctx.identity.is_authoritative() {
            return Ok(self.ctx.forward(Command::VipUpdateBulk { benefactors }).await);
        }
        self.apply_update_bulk(benefactors).await.map(Outcome::Applied)
    }

    pub async fn apply_update_bulk(&self, benefactors: Vec<BenefactorDoc>) -> Result<Vec<String>> {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut with_servers = Vec::new();

        for benefactor in benefactors {
            let settings = self.with_name(benefactor);
            match self.commit_settings(&settings).await {
                Ok(()) => {
                    info!("Bulk updated benefactor {} ({:?})", settings.id, settings.name);
                    succeeded.push(settings.id.clone());
                    if !settings.servers.is_empty() {
                        with_servers.push(settings);
                    }
                }
                Err(e) => {
                    error!("Unable to update benefactor {}: {}", settings.id, e);
                    failed.push(settings.id);
                }
            }
        }
        self.uniformize().await;

        for settings in with_servers {
            if let Err(e) = self.apply_add_servers(&settings.id, &settings.servers).await {
                error!("Unable to sponsor servers for benefactor {}: {}", settings.id, e);
                succeeded.retain(|id| id != &settings.id);
                failed.push(settings.id);
            }
        }

        if failed.is_empty() {
            Ok(succeeded)
        } else {
            Err(SyncError::PartialBulk { succeeded, failed })
        }
    }

    /// Delete a benefactor and every sponsorship it holds
    pub async fn remove(&self, benefactor_id: &str) -> Result<Outcome<bool>> {
        if !self.ctx.identity.is_authoritative() {
            return Ok(self
                .ctx
                .forward(Command::VipRemove {
                    benefactor_id: benefactor_id.to_string(),
                })
                .await);
        }
        self.apply_remove(benefactor_id).await.map(Outcome::Applied)
    }

    pub async fn apply_remove(&self, benefactor_id: &str) -> Result<bool> {
        let stored = self.ctx.stores.vips.remove(benefactor_id).await?;

        let removed = self
            .ctx
            .cache
            .with_entitlements(|e| {
                let servers = e
                    .benefactors
                    .get(benefactor_id)
                    .map(|b| b.servers.clone())
                    .unwrap_or_default();
                for server in &servers {
                    e.unsponsor(benefactor_id, server);
                }
                e.remove_benefactor(benefactor_id).map(|_| servers)
            })
            .await;

        self.uniformize().await;
        match &removed {
            Some(servers) => info!(
                "Removed benefactor {} and {} sponsorship(s)",
                benefactor_id,
                servers.len()
            ),
            None if stored => info!("Removed benefactor {}", benefactor_id),
            None => {}
        }
        Ok(stored || removed.is_some())
    }

    /// Sponsor guilds on behalf of a benefactor
    pub async fn add_servers(
        &self,
        benefactor_id: &str,
        server_ids: Vec<String>,
    ) -> Result<Outcome<AddServersReport>> {
        if !self.ctx.identity.is_authoritative() {
            return Ok(self
                .ctx
                .forward(Command::VipAddServers {
                    benefactor_id: benefactor_id.to_string(),
                    server_ids,
                })
                .await);
        }
        self.apply_add_servers(benefactor_id, &server_ids)
            .await
            .map(Outcome::Applied)
    }

    pub async fn apply_add_servers(
        &self,
        benefactor_id: &str,
        server_ids: &[String],
    ) -> Result<AddServersReport> {
        let known = self
            .ctx
            .cache
            .read_entitlements(|e| e.benefactors.contains_key(benefactor_id))
            .await;
        if !known {
            return Err(SyncError::Validation(format!(
                "Unknown benefactor {}",
                benefactor_id
            )));
        }

        let valid = self.validate_guilds(server_ids).await?;
        let mut report = AddServersReport::default();
        for id in server_ids {
            if !valid.contains_key(id) {
                warn!("Failed to add sponsorship to server {} due to missing guild", id);
                report.invalid.push(id.clone());
            }
        }

        let mut touched = BTreeSet::from([benefactor_id.to_string()]);
        self.ctx
            .cache
            .with_entitlements(|e| {
                for (id, name) in &valid {
                    if let Some(SponsorChange::Moved { from }) =
                        e.sponsor(benefactor_id, id, name.clone())
                    {
                        touched.insert(from);
                    }
                    report.added.insert(id.clone(), name.clone());
                }
            })
            .await;
        for (id, name) in &report.added {
            info!("Added sponsorship to server {} ({}) by benefactor {}", id, name, benefactor_id);
        }

        let persisted = self.persist(&touched).await;
        self.uniformize().await;
        persisted.map(|()| report)
    }

    /// Withdraw a benefactor's sponsorship of guilds
    pub async fn remove_servers(
        &self,
        benefactor_id: &str,
        server_ids: Vec<String>,
    ) -> Result<Outcome<RemoveServersReport>> {
        if !self.ctx.identity.is_authoritative() {
            return Ok(self
                .ctx
                .forward(Command::VipRemoveServers {
                    benefactor_id: benefactor_id.to_string(),
                    server_ids,
                })
                .await);
        }
        self.apply_remove_servers(benefactor_id, &server_ids)
            .await
            .map(Outcome::Applied)
    }

    pub async fn apply_remove_servers(
        &self,
        benefactor_id: &str,
        server_ids: &[String],
    ) -> Result<RemoveServersReport> {
        let report = self
            .ctx
            .cache
            .with_entitlements(|e| {
                let mut report = RemoveServersReport::default();
                for id in server_ids {
                    match e.unsponsor(benefactor_id, id) {
                        Some(name) => {
                            report.removed.insert(id.clone(), name);
                        }
                        None => report.failed.push(id.clone()),
                    }
                }
                report
            })
            .await;

        if !report.failed.is_empty() {
            warn!(
                "Sponsorships not removed due to incorrect backing: {:?}",
                report.failed
            );
        }
        if report.removed.is_empty() {
            return Ok(report);
        }

        info!(
            "Removed sponsorships of {:?} by benefactor {}",
            report.removed.keys().collect::<Vec<_>>(),
            benefactor_id
        );
        let persisted = self
            .persist(&BTreeSet::from([benefactor_id.to_string()]))
            .await;
        self.uniformize().await;
        persisted.map(|()| report)
    }

    /// Replace the local maps with ones broadcast by the primary
    pub async fn apply_uniformized(&self, entitlements: Entitlements) {
        self.ctx.cache.replace_entitlements(entitlements).await;
    }

    /// Merge settings into the in-memory record and persist it. The record
    /// is put back as it was if the write fails.
    async fn commit_settings(&self, settings: &BenefactorDoc) -> Result<()> {
        let (previous, record) = self
            .ctx
            .cache
            .with_entitlements(|e| {
                let previous = e.benefactors.get(&settings.id).cloned();
                e.upsert_benefactor(settings);
                (previous, e.benefactors.get(&settings.id).cloned())
            })
            .await;
        let Some(record) = record else {
            return Err(SyncError::Internal(format!(
                "Benefactor {} missing after upsert",
                settings.id
            )));
        };

        if let Err(e) = self.ctx.stores.vips.upsert(&record, WriteMode::Merge).await {
            self.ctx
                .cache
                .with_entitlements(|ent| match previous {
                    Some(previous) => {
                        ent.benefactors.insert(settings.id.clone(), previous);
                    }
                    None => {
                        ent.remove_benefactor(&settings.id);
                    }
                })
                .await;
            return Err(e);
        }
        Ok(())
    }

    /// Guild id -> name for the ids some shard serves. Ids no shard reports
    /// are absent.
    async fn validate_guilds(&self, server_ids: &[String]) -> Result<BTreeMap<String, String>> {
        if !self.ctx.identity.is_sharded() {
            return Ok(server_ids
                .iter()
                .filter_map(|id| self.ctx.directory.guild_name(id).map(|name| (id.clone(), name)))
                .collect());
        }

        let replies = self
            .ctx
            .transport
            .query(Query::KnownGuilds {
                ids: server_ids.to_vec(),
            })
            .await?;
        let mut valid = BTreeMap::new();
        for reply in replies {
            valid.extend(reply.guilds);
        }
        Ok(valid)
    }

    /// Write the in-memory records of the given benefactors
    async fn persist(&self, benefactor_ids: &BTreeSet<String>) -> Result<()> {
        let records: Vec<BenefactorDoc> = self
            .ctx
            .cache
            .read_entitlements(|e| {
                benefactor_ids
                    .iter()
                    .filter_map(|id| e.benefactors.get(id).cloned())
                    .collect()
            })
            .await;

        let mut result = Ok(());
        for record in records {
            if let Err(e) = self.ctx.stores.vips.upsert(&record, WriteMode::Merge).await {
                error!("Unable to persist benefactor {}: {}", record.id, e);
                result = Err(e);
            }
        }
        result
    }

    /// Fill in a missing benefactor name from the directory
    fn with_name(&self, mut benefactor: BenefactorDoc) -> BenefactorDoc {
        if benefactor.name.is_none() {
            benefactor.name = self.ctx.directory.user_name(&benefactor.id);
        }
        benefactor
    }

    async fn uniformize(&self) {
        let entitlements = self.ctx.cache.entitlements().await;
        self.ctx
            .broadcast(Event::EntitlementsUniformized { entitlements })
            .await;
    }
}
