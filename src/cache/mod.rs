//! Process-local cache layer
//!
//! Guild configs served by this process, plus the fleet-wide failure book,
//! entitlement maps and blacklists. Initialized from the store at startup and
//! mutated only by the synchronization components in `crate::sync`.

use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, RwLock};

use crate::db::schemas::GuildConfig;
use crate::types::{Entitlements, FailureBook, FailureState};

#[derive(Default)]
pub struct CacheLayer {
    guilds: DashMap<String, GuildConfig>,
    failures: RwLock<FailureBook>,
    entitlements: RwLock<Entitlements>,
    blacklisted_guilds: DashSet<String>,
    blacklisted_users: DashSet<String>,
    /// Feed names removed since the fetch pipeline last drained the ledger
    deleted: Mutex<Vec<String>>,
}

impl CacheLayer {
    pub fn new() -> Self {
        Self::default()
    }

    // Guild configs

    pub fn guild(&self, guild_id: &str) -> Option<GuildConfig> {
        self.guilds.get(guild_id).map(|entry| entry.value().clone())
    }

    pub fn insert_guild(&self, config: GuildConfig) {
        self.guilds.insert(config.id.clone(), config);
    }

    pub fn remove_guild(&self, guild_id: &str) -> Option<GuildConfig> {
        self.guilds.remove(guild_id).map(|(_, config)| config)
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    /// Snapshot of every cached guild config
    pub fn guilds(&self) -> Vec<GuildConfig> {
        self.guilds.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Guild configs with at least one source on `link`
    pub fn guilds_using(&self, link: &str) -> Vec<GuildConfig> {
        self.guilds
            .iter()
            .filter(|entry| entry.value().sources_for(link).next().is_some())
            .map(|entry| entry.value().clone())
            .collect()
    }

    // Failure book

    pub async fn failure(&self, link: &str) -> Option<FailureState> {
        self.failures.read().await.get(link)
    }

    pub async fn is_broken(&self, link: &str) -> bool {
        self.failures.read().await.is_broken(link)
    }

    pub async fn failures(&self) -> FailureBook {
        self.failures.read().await.clone()
    }

    /// Mutate the failure book under its write lock
    pub async fn with_failures<R>(&self, f: impl FnOnce(&mut FailureBook) -> R) -> R {
        f(&mut *self.failures.write().await)
    }

    pub async fn replace_failures(&self, book: FailureBook) {
        *self.failures.write().await = book;
    }

    // Entitlements

    pub async fn entitlements(&self) -> Entitlements {
        self.entitlements.read().await.clone()
    }

    /// Read the entitlement maps under their read lock
    pub async fn read_entitlements<R>(&self, f: impl FnOnce(&Entitlements) -> R) -> R {
        f(&*self.entitlements.read().await)
    }

    /// Mutate the entitlement maps under their write lock
    pub async fn with_entitlements<R>(&self, f: impl FnOnce(&mut Entitlements) -> R) -> R {
        f(&mut *self.entitlements.write().await)
    }

    pub async fn replace_entitlements(&self, entitlements: Entitlements) {
        *self.entitlements.write().await = entitlements;
    }

    // Blacklists

    pub fn is_blacklisted_guild(&self, guild_id: &str) -> bool {
        self.blacklisted_guilds.contains(guild_id)
    }

    pub fn is_blacklisted_user(&self, user_id: &str) -> bool {
        self.blacklisted_users.contains(user_id)
    }

    /// Replace both blacklists
    pub fn replace_blacklists(&self, guilds: Vec<String>, users: Vec<String>) {
        self.blacklisted_guilds.clear();
        self.blacklisted_users.clear();
        for id in guilds {
            self.blacklisted_guilds.insert(id);
        }
        for id in users {
            self.blacklisted_users.insert(id);
        }
    }

    pub fn add_blacklisted(&self, id: &str, is_guild: bool) {
        if is_guild {
            self.blacklisted_guilds.insert(id.to_string());
        } else {
            self.blacklisted_users.insert(id.to_string());
        }
    }

    /// Remove an id from whichever blacklist holds it
    pub fn remove_blacklisted(&self, id: &str) -> bool {
        let guild = self.blacklisted_guilds.remove(id).is_some();
        let user = self.blacklisted_users.remove(id).is_some();
        guild || user
    }

    /// Current blacklists as (guilds, users), sorted
    pub fn blacklists(&self) -> (Vec<String>, Vec<String>) {
        let mut guilds: Vec<String> = self.blacklisted_guilds.iter().map(|id| id.key().clone()).collect();
        let mut users: Vec<String> = self.blacklisted_users.iter().map(|id| id.key().clone()).collect();
        guilds.sort();
        users.sort();
        (guilds, users)
    }

    // Recently deleted feeds

    pub async fn mark_deleted(&self, rss_name: &str) {
        self.deleted.lock().await.push(rss_name.to_string());
    }

    /// Whether a feed was removed since the last drain. The fetch pipeline
    /// discards in-flight results for such feeds.
    pub async fn recently_deleted(&self, rss_name: &str) -> bool {
        self.deleted.lock().await.iter().any(|name| name == rss_name)
    }

    /// Take the ledger, leaving it empty
    pub async fn drain_deleted(&self) -> Vec<String> {
        std::mem::take(&mut *self.deleted.lock().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::FeedSource;
    use chrono::Utc;

    #[test]
    fn test_guilds_using_link() {
        let cache = CacheLayer::new();
        cache.insert_guild(GuildConfig::new("1").with_source("a", FeedSource::new("X", "c1", "A")));
        cache.insert_guild(GuildConfig::new("2").with_source("b", FeedSource::new("Y", "c2", "B")));

        let using = cache.guilds_using("X");
        assert_eq!(using.len(), 1);
        assert_eq!(using[0].id, "1");
        assert!(cache.guilds_using("Z").is_empty());
    }

    #[test]
    fn test_blacklist_entries() {
        let cache = CacheLayer::new();
        cache.add_blacklisted("g", true);
        cache.add_blacklisted("u", false);
        assert!(cache.is_blacklisted_guild("g"));
        assert!(!cache.is_blacklisted_user("g"));

        assert!(cache.remove_blacklisted("u"));
        assert!(!cache.remove_blacklisted("u"));
        assert_eq!(cache.blacklists(), (vec!["g".to_string()], Vec::new()));

        tokio_test::block_on(async {
            assert!(cache.failures().await.is_empty());
        });
    }

    #[tokio::test]
    async fn test_deleted_ledger_drains() {
        let cache = CacheLayer::new();
        cache.mark_deleted("news").await;

        assert!(cache.recently_deleted("news").await);
        assert_eq!(cache.drain_deleted().await, vec!["news".to_string()]);
        assert!(!cache.recently_deleted("news").await);
    }

    #[tokio::test]
    async fn test_failures_mutate_in_place() {
        let cache = CacheLayer::new();
        cache
            .with_failures(|book| book.fail("X", Utc::now()))
            .await;
        assert!(cache.is_broken("X").await);

        cache.replace_failures(FailureBook::new()).await;
        assert!(cache.failure("X").await.is_none());
    }

    #[test]
    fn test_replace_blacklists() {
        let cache = CacheLayer::new();
        cache.replace_blacklists(vec!["g1".into()], vec!["u1".into()]);
        assert!(cache.is_blacklisted_guild("g1"));
        assert!(cache.is_blacklisted_user("u1"));

        cache.replace_blacklists(Vec::new(), vec!["u2".into()]);
        assert!(!cache.is_blacklisted_guild("g1"));
        assert_eq!(cache.blacklists(), (Vec::new(), vec!["u2".to_string()]));
    }
}
