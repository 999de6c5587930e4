//! Messages exchanged between shards
//!
//! Replicas send `Command`s to the primary. The primary applies them and
//! broadcasts `Event`s, which every process applies to its cache without
//! touching the store. `Query` is a fleet-wide question answered by every
//! process.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::db::schemas::{BenefactorDoc, BlacklistDoc, GuildConfig};
use crate::types::{Entitlements, FailureBook, Partition};

/// Default subject prefix
pub const DEFAULT_SUBJECT_PREFIX: &str = "FEEDFLEET";

/// NATS subjects for one fleet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subjects {
    pub command: String,
    pub event: String,
    pub query: String,
}

impl Subjects {
    pub fn new(prefix: &str) -> Self {
        Self {
            command: format!("{prefix}.primary.command"),
            event: format!("{prefix}.shard.event"),
            query: format!("{prefix}.shard.query"),
        }
    }
}

impl Default for Subjects {
    fn default() -> Self {
        Self::new(DEFAULT_SUBJECT_PREFIX)
    }
}

/// A mutation forwarded to the primary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    GuildUpdate { guild: GuildConfig },
    GuildRemove { guild: GuildConfig },
    FeedDisable { guild: GuildConfig, rss_name: String },
    FeedEnable { guild: GuildConfig, rss_name: String },
    FeedRemove { guild: GuildConfig, rss_name: String },
    GuildBackup { guild: GuildConfig },
    /// Restore a backup minus the feeds whose channels the origin no longer sees
    GuildRestore { backup: GuildConfig, dropped: Vec<String> },
    LinkIncrement { link: String },
    LinkDecrement { link: String },
    FailureIncrement { link: String },
    FailureFail { link: String },
    FailureReset { link: String },
    VipUpdate { benefactor: BenefactorDoc },
    VipUpdateBulk { benefactors: Vec<BenefactorDoc> },
    VipRemove { benefactor_id: String },
    VipAddServers { benefactor_id: String, server_ids: Vec<String> },
    VipRemoveServers { benefactor_id: String, server_ids: Vec<String> },
    BlacklistAdd { entry: BlacklistDoc },
    BlacklistRemove { id: String },
}

/// An applied change, echoed to every process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    GuildUpdated { guild: GuildConfig },
    GuildRemoved { guild_id: String },
    FeedRemoved { guild_id: String, rss_name: String },
    FailuresUniformized { book: FailureBook },
    /// A link broke; every process alerts the guilds it serves
    LinkAlert { link: String, message: String },
    EntitlementsUniformized { entitlements: Entitlements },
    BlacklistsUniformized { guilds: Vec<String>, users: Vec<String> },
}

/// A question every process answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Query {
    /// Which of these guild ids does each shard serve
    KnownGuilds { ids: Vec<String> },
}

/// One process's answer to a `Query`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryReply {
    pub shard: Partition,
    /// Guild id -> display name for the ids this shard serves
    pub guilds: BTreeMap<String, String>,
}

/// Wire wrapper carrying the sender's partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub message_id: String,
    pub origin: Partition,
    pub body: T,
}

impl<T: Serialize + DeserializeOwned> Envelope<T> {
    pub fn new(origin: Partition, body: T) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            origin,
            body,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Into::into)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

impl QueryReply {
    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Into::into)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects() {
        let subjects = Subjects::new("FLEET");
        assert_eq!(subjects.command, "FLEET.primary.command");
        assert_eq!(subjects.event, "FLEET.shard.event");
        assert_eq!(subjects.query, "FLEET.shard.query");
    }

    #[test]
    fn test_command_is_tagged() {
        let envelope = Envelope::new(Some(2), Command::LinkIncrement { link: "X".into() });
        let json: serde_json::Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(json["origin"], 2);
        assert_eq!(json["body"]["type"], "link_increment");
        assert_eq!(json["body"]["link"], "X");
    }

    #[test]
    fn test_event_envelope_decodes() {
        let guild = GuildConfig::new("42");
        let envelope = Envelope::new(None, Event::GuildUpdated { guild: guild.clone() });
        let decoded = Envelope::<Event>::from_bytes(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.origin, None);
        assert_eq!(decoded.message_id, envelope.message_id);
        assert_eq!(decoded.body, Event::GuildUpdated { guild });
    }

    #[test]
    fn test_reply_rejects_garbage() {
        assert!(QueryReply::from_bytes(b"not json").is_err());
    }
}
