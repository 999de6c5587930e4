//! Benefactor sponsorship maps
//!
//! `benefactors` is keyed by benefactor id and owns each sponsor list;
//! `sponsored` is keyed by guild id and holds the back-reference. A guild has
//! at most one benefactor, and a back-reference always names a live
//! benefactor whose list contains the guild.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::schemas::BenefactorDoc;

/// Back-reference from a sponsored guild to its benefactor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sponsorship {
    /// Guild display name reported when the sponsorship was validated
    pub name: String,
    pub benefactor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<DateTime<Utc>>,
}

/// Result of moving a guild to a benefactor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SponsorChange {
    /// Newly sponsored
    Added,
    /// Already sponsored by this benefactor; name/expiry refreshed
    Unchanged,
    /// Taken over from another benefactor, whose list was updated
    Moved { from: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlements {
    pub benefactors: HashMap<String, BenefactorDoc>,
    pub sponsored: HashMap<String, Sponsorship>,
}

impl Entitlements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild both maps from durable benefactor records. A guild listed by
    /// several benefactors goes to the last one read, and is removed from the
    /// others' lists.
    pub fn from_benefactors<F>(docs: Vec<BenefactorDoc>, guild_name: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut entitlements = Self::new();
        for doc in docs {
            let servers = doc.servers.clone();
            let id = doc.id.clone();
            entitlements.benefactors.insert(
                id.clone(),
                BenefactorDoc {
                    servers: Vec::new(),
                    ..doc
                },
            );
            for server in servers {
                let name = guild_name(&server).unwrap_or_else(|| server.clone());
                entitlements.sponsor(&id, &server, name);
            }
        }
        entitlements
    }

    /// Insert or refresh a benefactor's settings. The sponsor list already
    /// held in memory is kept, as is any optional field the update leaves
    /// unset; returns true if the benefactor is new.
    pub fn upsert_benefactor(&mut self, settings: &BenefactorDoc) -> bool {
        match self.benefactors.get_mut(&settings.id) {
            Some(existing) => {
                let servers = std::mem::take(&mut existing.servers);
                *existing = BenefactorDoc {
                    id: settings.id.clone(),
                    name: settings.name.clone().or_else(|| existing.name.take()),
                    servers,
                    max_feeds: settings.max_feeds.or(existing.max_feeds),
                    expire_at: settings.expire_at.or(existing.expire_at),
                };
                false
            }
            None => {
                self.benefactors.insert(
                    settings.id.clone(),
                    BenefactorDoc {
                        servers: Vec::new(),
                        ..settings.clone()
                    },
                );
                true
            }
        }
    }

    /// Sponsor `server_id` on behalf of `benefactor_id`. Returns `None` if the
    /// benefactor is unknown.
    pub fn sponsor(&mut self, benefactor_id: &str, server_id: &str, name: String) -> Option<SponsorChange> {
        let expire_at = self.benefactors.get(benefactor_id)?.expire_at;

        let previous = self
            .sponsored
            .get(server_id)
            .map(|s| s.benefactor_id.clone());

        let change = match previous {
            Some(ref from) if from == benefactor_id => SponsorChange::Unchanged,
            Some(from) => {
                if let Some(old) = self.benefactors.get_mut(&from) {
                    old.servers.retain(|s| s != server_id);
                }
                SponsorChange::Moved { from }
            }
            None => SponsorChange::Added,
        };

        self.sponsored.insert(
            server_id.to_string(),
            Sponsorship {
                name,
                benefactor_id: benefactor_id.to_string(),
                expire_at,
            },
        );

        if let Some(benefactor) = self.benefactors.get_mut(benefactor_id) {
            if !benefactor.servers.iter().any(|s| s == server_id) {
                benefactor.servers.push(server_id.to_string());
            }
        }

        Some(change)
    }

    /// Remove the sponsorship of `server_id` by `benefactor_id`. Fails
    /// (returns `None`) unless the back-reference names that benefactor and
    /// the benefactor's list contains the guild. Returns the guild name.
    pub fn unsponsor(&mut self, benefactor_id: &str, server_id: &str) -> Option<String> {
        let sponsorship = self.sponsored.get(server_id)?;
        if sponsorship.benefactor_id != benefactor_id {
            return None;
        }

        let benefactor = self.benefactors.get_mut(benefactor_id)?;
        let index = benefactor.servers.iter().position(|s| s == server_id)?;
        benefactor.servers.remove(index);

        self.sponsored.remove(server_id).map(|s| s.name)
    }

    /// Forget a benefactor whose sponsor list is already empty, or drop the
    /// remaining back-references along with it
    pub fn remove_benefactor(&mut self, benefactor_id: &str) -> Option<BenefactorDoc> {
        let removed = self.benefactors.remove(benefactor_id)?;
        self.sponsored
            .retain(|_, sponsorship| sponsorship.benefactor_id != benefactor_id);
        Some(removed)
    }

    /// Feed limit granted to a guild by its benefactor
    pub fn feed_limit(&self, guild_id: &str) -> Option<u32> {
        let sponsorship = self.sponsored.get(guild_id)?;
        self.benefactors.get(&sponsorship.benefactor_id)?.max_feeds
    }

    pub fn benefactor_of(&self, guild_id: &str) -> Option<&str> {
        self.sponsored
            .get(guild_id)
            .map(|s| s.benefactor_id.as_str())
    }
}
