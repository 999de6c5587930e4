//! External collaborators
//!
//! `Directory` answers what the chat gateway of this process can see (guilds,
//! channels, users). `Notifier` delivers alerts to channels. Both are
//! implemented outside this crate in production; `StaticDirectory` and
//! `LogNotifier` cover tests and headless runs.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::Result;

/// Guild, channel and user lookups for the guilds this process serves
pub trait Directory: Send + Sync {
    /// Display name of a guild this process serves
    fn guild_name(&self, guild_id: &str) -> Option<String>;

    /// Whether a destination channel still exists
    fn channel_exists(&self, channel_id: &str) -> bool;

    /// Whether the process may attach files in a channel
    fn can_attach(&self, channel_id: &str) -> bool;

    /// Username of a user, if known
    fn user_name(&self, user_id: &str) -> Option<String>;
}

/// A file attached to an alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub content: String,
}

/// One notification to one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub guild_id: String,
    pub channel_id: String,
    pub link: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

/// Sends alerts to channels
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: Alert) -> Result<()>;
}

#[derive(Debug, Clone)]
struct ChannelInfo {
    can_attach: bool,
}

/// In-memory directory
#[derive(Default)]
pub struct StaticDirectory {
    guilds: DashMap<String, String>,
    channels: DashMap<String, ChannelInfo>,
    users: DashMap<String, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_guild(&self, guild_id: impl Into<String>, name: impl Into<String>) {
        self.guilds.insert(guild_id.into(), name.into());
    }

    pub fn remove_guild(&self, guild_id: &str) {
        self.guilds.remove(guild_id);
    }

    pub fn add_channel(&self, channel_id: impl Into<String>, can_attach: bool) {
        self.channels
            .insert(channel_id.into(), ChannelInfo { can_attach });
    }

    pub fn remove_channel(&self, channel_id: &str) {
        self.channels.remove(channel_id);
    }

    pub fn add_user(&self, user_id: impl Into<String>, name: impl Into<String>) {
        self.users.insert(user_id.into(), name.into());
    }
}

impl Directory for StaticDirectory {
    fn guild_name(&self, guild_id: &str) -> Option<String> {
        self.guilds.get(guild_id).map(|name| name.value().clone())
    }

    fn channel_exists(&self, channel_id: &str) -> bool {
        self.channels.contains_key(channel_id)
    }

    fn can_attach(&self, channel_id: &str) -> bool {
        self.channels
            .get(channel_id)
            .is_some_and(|channel| channel.can_attach)
    }

    fn user_name(&self, user_id: &str) -> Option<String> {
        self.users.get(user_id).map(|name| name.value().clone())
    }
}

/// Writes alerts to the log instead of a channel
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: Alert) -> Result<()> {
        warn!(
            "(G: {}) Alert for channel {} about {}: {}",
            alert.guild_id, alert.channel_id, alert.link, alert.message
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_directory_lookups() {
        let directory = StaticDirectory::new();
        directory.add_guild("42", "Answers");
        directory.add_channel("c1", true);
        directory.add_channel("c2", false);

        assert_eq!(directory.guild_name("42").as_deref(), Some("Answers"));
        assert!(directory.channel_exists("c2"));
        assert!(directory.can_attach("c1"));
        assert!(!directory.can_attach("c2"));
        assert!(!directory.can_attach("missing"));

        directory.remove_channel("c1");
        assert!(!directory.channel_exists("c1"));
    }
}
