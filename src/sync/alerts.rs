//! Broken-link alerts
//!
//! The failure tracker decides when a link breaks; this dispatcher turns that
//! into one notification per guild channel subscribed to the link, on every
//! process that serves such a guild.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::SyncContext;
use crate::directory::{Alert, Attachment};
use crate::fabric::Event;

const BACKUP_NOTE: &str = "A backup for this server at this point in time has been attached in case this feed is subjected to forced removal in the future.";

pub struct AlertDispatcher {
    ctx: Arc<SyncContext>,
}

impl AlertDispatcher {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Text sent when `link` reaches the failure limit
    pub fn limit_message(&self, link: &str) -> String {
        format!(
            "**ATTENTION** - Feed link <{}> has reached the connection failure limit and will not be retried until it is manually refreshed by this server, or another server using this feed. See `{}rsslist` for more information.",
            link, self.ctx.settings.command_prefix
        )
    }

    /// Alert the whole fleet about `link`, starting with this process
    pub async fn alert_fleet(&self, link: &str, message: String) {
        self.ctx
            .broadcast(Event::LinkAlert {
                link: link.to_string(),
                message: message.clone(),
            })
            .await;
        self.dispatch(link, &message).await;
    }

    /// Notify every channel this process serves that subscribes to `link`.
    /// Returns the number of alerts handed to the notifier.
    pub async fn dispatch(&self, link: &str, message: &str) -> usize {
        if self.ctx.settings.mute_alerts {
            return 0;
        }

        let directory = &self.ctx.directory;
        let mut sent = 0;
        for guild in self.ctx.cache.guilds_using(link) {
            let mut notified = HashSet::new();
            for (_, source) in guild.sources_for(link) {
                let channel = &source.channel;
                if !directory.channel_exists(channel) || !notified.insert(channel.clone()) {
                    continue;
                }

                let mut alert = Alert {
                    guild_id: guild.id.clone(),
                    channel_id: channel.clone(),
                    link: link.to_string(),
                    message: message.to_string(),
                    attachment: None,
                };
                if directory.can_attach(channel) {
                    match serde_json::to_string_pretty(&guild) {
                        Ok(content) => {
                            alert.message = format!("{}\n\n{}", message, BACKUP_NOTE);
                            alert.attachment = Some(Attachment {
                                file_name: format!("{}.json", guild.id),
                                content,
                            });
                        }
                        Err(e) => warn!("(G: {}) Unable to serialize backup: {}", guild.id, e),
                    }
                }

                match self.ctx.notifier.notify(alert).await {
                    Ok(()) => sent += 1,
                    Err(e) => warn!(
                        "(G: {}) Unable to send limit notice for feed {}: {}",
                        guild.id, link, e
                    ),
                }
            }
        }

        if sent > 0 {
            info!("Sent {} alert(s) for {}", sent, link);
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{FeedSource, GuildConfig};
    use crate::sync::testing::Harness;
    use crate::sync::SyncSettings;

    fn subscribed(id: &str, channel: &str) -> GuildConfig {
        GuildConfig::new(id).with_source("a", FeedSource::new("X", channel, "A"))
    }

    #[tokio::test]
    async fn test_dispatch_attaches_backup_when_permitted() {
        let harness = Harness::unsharded(SyncSettings::default());
        harness.directory.add_channel("c1", true);
        harness.ctx.cache.insert_guild(subscribed("42", "c1"));
        let alerts = AlertDispatcher::new(harness.ctx.clone());

        assert_eq!(alerts.dispatch("X", "broken").await, 1);

        let sent = harness.notifier.alerts().await;
        assert!(sent[0].message.starts_with("broken\n\nA backup"));
        let attachment = sent[0].attachment.as_ref().unwrap();
        assert_eq!(attachment.file_name, "42.json");
        assert!(attachment.content.contains("\"id\": \"42\""));
    }

    #[tokio::test]
    async fn test_dispatch_skips_missing_channels_and_plain_text_without_attach() {
        let harness = Harness::unsharded(SyncSettings::default());
        harness.directory.add_channel("c2", false);
        harness.ctx.cache.insert_guild(subscribed("1", "gone"));
        harness.ctx.cache.insert_guild(subscribed("2", "c2"));
        let alerts = AlertDispatcher::new(harness.ctx.clone());

        assert_eq!(alerts.dispatch("X", "broken").await, 1);
        let sent = harness.notifier.alerts().await;
        assert_eq!(sent[0].guild_id, "2");
        assert_eq!(sent[0].message, "broken");
        assert!(sent[0].attachment.is_none());
    }

    #[tokio::test]
    async fn test_one_alert_per_channel() {
        let harness = Harness::unsharded(SyncSettings::default());
        harness.directory.add_channel("c1", false);
        harness.ctx.cache.insert_guild(
            subscribed("42", "c1").with_source("b", FeedSource::new("X", "c1", "B")),
        );
        let alerts = AlertDispatcher::new(harness.ctx.clone());

        assert_eq!(alerts.dispatch("X", "broken").await, 1);
    }

    #[tokio::test]
    async fn test_muted_sends_nothing() {
        let harness = Harness::unsharded(SyncSettings {
            mute_alerts: true,
            ..SyncSettings::default()
        });
        harness.directory.add_channel("c1", true);
        harness.ctx.cache.insert_guild(subscribed("42", "c1"));
        let alerts = AlertDispatcher::new(harness.ctx.clone());

        assert_eq!(alerts.dispatch("X", "broken").await, 0);
        assert!(harness.notifier.alerts().await.is_empty());
    }

    #[test]
    fn test_limit_message_quotes_prefix() {
        let harness = Harness::unsharded(SyncSettings::default());
        let alerts = AlertDispatcher::new(harness.ctx.clone());
        let message = alerts.limit_message("https://example.com/feed");
        assert!(message.starts_with("**ATTENTION** - Feed link <https://example.com/feed>"));
        assert!(message.ends_with("See `rss.rsslist` for more information."));
    }
}
