//! Configuration for a feedfleet shard
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::time::Duration;
use uuid::Uuid;

use crate::fabric::messages::DEFAULT_SUBJECT_PREFIX;
use crate::sync::SyncSettings;
use crate::types::{Role, ShardIdentity};

/// feedfleet shard - keeps guild configs, link counts, failures and
/// entitlements consistent across a fleet of feed workers
#[derive(Parser, Debug, Clone)]
#[command(name = "feedfleet-shard")]
#[command(about = "Cross-shard state synchronization for feed subscription fleets")]
pub struct Args {
    /// Unique identifier for this process
    #[arg(long, env = "INSTANCE_ID", default_value_t = Uuid::new_v4())]
    pub instance_id: Uuid,

    /// Shard identifier. Absent runs the process unsharded.
    #[arg(long, env = "SHARD_ID")]
    pub shard_id: Option<u32>,

    /// Number of shards in the fleet
    #[arg(long, env = "SHARD_COUNT", default_value = "1")]
    pub shard_count: u32,

    /// Whether this shard writes to the canonical store
    #[arg(long, env = "ROLE", value_enum, default_value = "primary")]
    pub role: Role,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "feedfleet")]
    pub mongodb_db: String,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Prefix for every fleet subject
    #[arg(long, env = "SUBJECT_PREFIX", default_value = DEFAULT_SUBJECT_PREFIX)]
    pub subject_prefix: String,

    /// Failed attempts before a link is marked broken (0 disables)
    #[arg(long, env = "FAIL_LIMIT", default_value = "0")]
    pub fail_limit: u32,

    /// Alert subscribed channels when a link breaks
    #[arg(long, env = "NOTIFY_FAIL", default_value = "true")]
    pub notify_fail: bool,

    /// Suppress every alert, regardless of notify_fail
    #[arg(long, env = "MUTE_ALERTS", default_value = "false")]
    pub mute_alerts: bool,

    /// Command prefix quoted in alert text
    #[arg(long, env = "COMMAND_PREFIX", default_value = "rss.")]
    pub command_prefix: String,

    /// Feed limit for guilds without a benefactor
    #[arg(long, env = "MAX_FEEDS", default_value = "5")]
    pub max_feeds: u32,

    /// How long to collect shard replies to a fleet query, in milliseconds
    #[arg(long, env = "QUERY_WINDOW_MS", default_value = "5000")]
    pub query_window_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.shard_count == 0 {
            return Err("SHARD_COUNT must be at least 1".to_string());
        }

        match self.shard_id {
            Some(id) if id >= self.shard_count => Err(format!(
                "SHARD_ID {} is out of range for SHARD_COUNT {}",
                id, self.shard_count
            )),
            None if self.role == Role::Replica => {
                Err("A replica requires SHARD_ID".to_string())
            }
            _ => Ok(()),
        }
    }

    /// This process's place in the fleet
    pub fn identity(&self) -> ShardIdentity {
        match self.shard_id {
            Some(id) => ShardIdentity {
                shard_id: Some(id),
                shard_count: self.shard_count,
                role: self.role,
            },
            None => ShardIdentity::unsharded(),
        }
    }

    /// Runtime settings for the synchronization layer
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            fail_limit: self.fail_limit,
            notify_fail: self.notify_fail,
            mute_alerts: self.mute_alerts,
            command_prefix: self.command_prefix.clone(),
            max_feeds: self.max_feeds,
        }
    }

    pub fn query_window(&self) -> Duration {
        Duration::from_millis(self.query_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["feedfleet-shard"];
        argv.extend_from_slice(args);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_are_unsharded_primary() {
        let args = parse(&[]);
        assert!(args.validate().is_ok());
        assert!(args.identity().is_authoritative());
        assert!(!args.identity().is_sharded());
        assert_eq!(args.settings().fail_limit, 0);
    }

    #[test]
    fn test_replica_requires_shard_id() {
        let args = parse(&["--role", "replica"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_shard_id_must_be_in_range() {
        let args = parse(&["--shard-id", "4", "--shard-count", "4"]);
        assert!(args.validate().is_err());

        let args = parse(&["--shard-id", "3", "--shard-count", "4", "--role", "replica"]);
        assert!(args.validate().is_ok());
        let identity = args.identity();
        assert_eq!(identity.partition(), Some(3));
        assert!(!identity.is_authoritative());
    }

    #[test]
    fn test_zero_shard_count_rejected() {
        let args = parse(&["--shard-count", "0"]);
        assert!(args.validate().is_err());
    }
}
