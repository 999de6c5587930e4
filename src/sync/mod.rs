//! Cross-shard synchronization
//!
//! Every component shares one `SyncContext`. A mutation on a replica is sent
//! to the primary as a `Command` and reported as `Outcome::Forwarded`; the
//! primary (or an unsharded process) persists it, updates its cache and
//! broadcasts an `Event` that the other processes apply to their caches.
//!
//! Components expose the routed operations (`update`, `increment`, ...) and
//! `apply_*` counterparts that the primary runs for forwarded commands, with
//! the origin's partition where it matters.

pub mod alerts;
pub mod blacklist;
pub mod entitlements;
pub mod failures;
pub mod guild;
pub mod links;

use std::sync::Arc;
use tracing::warn;

use crate::cache::CacheLayer;
use crate::directory::{Directory, Notifier};
use crate::fabric::{Command, Event, Transport};
use crate::store::Stores;
use crate::types::{Outcome, ShardIdentity};

pub use alerts::AlertDispatcher;
pub use blacklist::BlacklistRegistry;
pub use entitlements::{AddServersReport, EntitlementPropagator, RemoveServersReport};
pub use failures::FailureTracker;
pub use guild::{GuildSync, RestoreResult};
pub use links::LinkRegistry;

/// Runtime settings for the synchronization layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Failed attempts before a link breaks; 0 disables the breaker
    pub fail_limit: u32,
    pub notify_fail: bool,
    /// Global switch suppressing every alert
    pub mute_alerts: bool,
    pub command_prefix: String,
    /// Feed limit for guilds without a benefactor
    pub max_feeds: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            fail_limit: 0,
            notify_fail: true,
            mute_alerts: false,
            command_prefix: "rss.".to_string(),
            max_feeds: 5,
        }
    }
}

/// Process-scoped dependencies shared by every component
pub struct SyncContext {
    pub identity: ShardIdentity,
    pub cache: Arc<CacheLayer>,
    pub stores: Stores,
    pub transport: Arc<dyn Transport>,
    pub directory: Arc<dyn Directory>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: SyncSettings,
}

impl SyncContext {
    pub fn new(
        identity: ShardIdentity,
        stores: Stores,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            identity,
            cache: Arc::new(CacheLayer::new()),
            stores,
            transport,
            directory,
            notifier,
            settings,
        }
    }

    /// Whether this process serves `guild_id`. An unsharded process serves
    /// every guild.
    pub fn owns_guild(&self, guild_id: &str) -> bool {
        !self.identity.is_sharded() || self.directory.guild_name(guild_id).is_some()
    }

    /// Send a command to the primary. Transport errors are logged; the next
    /// mutation or refresh reconciles.
    pub async fn forward<T>(&self, command: Command) -> Outcome<T> {
        if let Err(e) = self.transport.send_to_primary(command).await {
            warn!("Failed to forward command to primary: {}", e);
        }
        Outcome::Forwarded
    }

    /// Echo an applied change to the other shards. A no-op when unsharded.
    pub async fn broadcast(&self, event: Event) {
        if !self.identity.is_sharded() {
            return;
        }
        if let Err(e) = self.transport.broadcast(event).await {
            warn!("Failed to broadcast event: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Single-process harness over the in-memory store and transport

    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    use super::{SyncContext, SyncSettings};
    use crate::directory::{Alert, Directory, Notifier, StaticDirectory};
    use crate::fabric::LocalTransport;
    use crate::store::MemoryStores;
    use crate::types::{Partition, Result, ShardIdentity};

    /// Keeps every alert it is given
    #[derive(Default)]
    pub struct RecordingNotifier {
        alerts: Mutex<Vec<Alert>>,
    }

    impl RecordingNotifier {
        pub async fn alerts(&self) -> Vec<Alert> {
            self.alerts.lock().await.clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, alert: Alert) -> Result<()> {
            self.alerts.lock().await.push(alert);
            Ok(())
        }
    }

    pub struct Harness {
        pub stores: MemoryStores,
        pub transport: Arc<LocalTransport>,
        pub directory: Arc<StaticDirectory>,
        pub notifier: Arc<RecordingNotifier>,
        pub ctx: Arc<SyncContext>,
    }

    impl Harness {
        pub fn unsharded(settings: SyncSettings) -> Self {
            Self::build(ShardIdentity::unsharded(), settings, MemoryStores::new(), Vec::new())
        }

        pub fn primary(settings: SyncSettings) -> Self {
            Self::build(ShardIdentity::primary(0, 2), settings, MemoryStores::new(), Vec::new())
        }

        pub fn replica(settings: SyncSettings) -> Self {
            Self::build(ShardIdentity::replica(1, 2), settings, MemoryStores::new(), Vec::new())
        }

        /// Harness whose fleet queries reach this process's directory plus
        /// `peers`, sharing `stores` with other harnesses
        pub fn build(
            identity: ShardIdentity,
            settings: SyncSettings,
            stores: MemoryStores,
            peers: Vec<(Partition, Arc<dyn Directory>)>,
        ) -> Self {
            let directory = Arc::new(StaticDirectory::new());
            let own: Arc<dyn Directory> = directory.clone();
            let mut fleet = vec![(identity.partition(), own)];
            fleet.extend(peers);

            let transport = Arc::new(LocalTransport::new(identity.partition(), fleet));
            let notifier = Arc::new(RecordingNotifier::default());
            let ctx = Arc::new(SyncContext::new(
                identity,
                stores.stores(),
                transport.clone(),
                directory.clone(),
                notifier.clone(),
                settings,
            ));

            Self {
                stores,
                transport,
                directory,
                notifier,
                ctx,
            }
        }
    }

    pub fn breaker(fail_limit: u32) -> SyncSettings {
        SyncSettings {
            fail_limit,
            ..SyncSettings::default()
        }
    }
}
