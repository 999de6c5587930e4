//! Shard messaging fabric
//!
//! Fire-and-forget delivery to the primary, broadcast to every process, and
//! scatter/gather queries. Lost messages are tolerated: the next mutation or
//! refresh reconciles caches.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::client::NatsClient;
use super::messages::{Command, Envelope, Event, Query, QueryReply, Subjects};
use crate::directory::Directory;
use crate::types::{Partition, Result, SyncError};

/// Inter-process channel used by the synchronization layer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a mutation to the primary
    async fn send_to_primary(&self, command: Command) -> Result<()>;

    /// Echo an applied change to every process
    async fn broadcast(&self, event: Event) -> Result<()>;

    /// Ask every process and collect the replies that arrive in time
    async fn query(&self, query: Query) -> Result<Vec<QueryReply>>;
}

/// Answer a query from one process's directory
pub fn answer_query(query: &Query, shard: Partition, directory: &dyn Directory) -> QueryReply {
    match query {
        Query::KnownGuilds { ids } => QueryReply {
            shard,
            guilds: ids
                .iter()
                .filter_map(|id| directory.guild_name(id).map(|name| (id.clone(), name)))
                .collect(),
        },
    }
}

/// NATS-backed transport
pub struct NatsTransport {
    client: NatsClient,
    subjects: Subjects,
    origin: Partition,
    expected_replies: usize,
    window: Duration,
}

impl NatsTransport {
    pub fn new(
        client: NatsClient,
        subjects: Subjects,
        origin: Partition,
        expected_replies: usize,
        window: Duration,
    ) -> Self {
        Self {
            client,
            subjects,
            origin,
            expected_replies,
            window,
        }
    }

    pub fn subjects(&self) -> &Subjects {
        &self.subjects
    }

    pub fn client(&self) -> &NatsClient {
        &self.client
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn send_to_primary(&self, command: Command) -> Result<()> {
        let envelope = Envelope::new(self.origin, command);
        self.client
            .publish(&self.subjects.command, envelope.to_bytes()?)
            .await?;
        debug!("Forwarded command {} to primary", envelope.message_id);
        Ok(())
    }

    async fn broadcast(&self, event: Event) -> Result<()> {
        let envelope = Envelope::new(self.origin, event);
        self.client
            .publish(&self.subjects.event, envelope.to_bytes()?)
            .await
    }

    async fn query(&self, query: Query) -> Result<Vec<QueryReply>> {
        let envelope = Envelope::new(self.origin, query);
        let messages = self
            .client
            .scatter_gather(
                &self.subjects.query,
                envelope.to_bytes()?,
                self.expected_replies,
                self.window,
            )
            .await?;

        let mut replies = Vec::with_capacity(messages.len());
        for message in messages {
            match QueryReply::from_bytes(&message.payload) {
                Ok(reply) => replies.push(reply),
                Err(e) => warn!("Discarding malformed query reply: {}", e),
            }
        }
        if replies.len() < self.expected_replies {
            warn!(
                "Only {}/{} shards answered query {}",
                replies.len(),
                self.expected_replies,
                envelope.message_id
            );
        }
        Ok(replies)
    }
}

/// In-process transport. Records what was sent so callers can deliver it,
/// and answers queries from a fixed set of peer directories.
pub struct LocalTransport {
    origin: Partition,
    peers: Vec<(Partition, Arc<dyn Directory>)>,
    commands: Mutex<Vec<Envelope<Command>>>,
    events: Mutex<Vec<Envelope<Event>>>,
    offline: AtomicBool,
}

impl LocalTransport {
    /// Transport for a single process with no peers
    pub fn isolated() -> Self {
        Self::new(None, Vec::new())
    }

    pub fn new(origin: Partition, peers: Vec<(Partition, Arc<dyn Directory>)>) -> Self {
        Self {
            origin,
            peers,
            commands: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every send fail, or stop doing so
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Commands sent so far, removing them
    pub async fn take_commands(&self) -> Vec<Envelope<Command>> {
        std::mem::take(&mut *self.commands.lock().await)
    }

    /// Events broadcast so far, removing them
    pub async fn take_events(&self) -> Vec<Envelope<Event>> {
        std::mem::take(&mut *self.events.lock().await)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(SyncError::Nats("Transport offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send_to_primary(&self, command: Command) -> Result<()> {
        self.check_online()?;
        self.commands
            .lock()
            .await
            .push(Envelope::new(self.origin, command));
        Ok(())
    }

    async fn broadcast(&self, event: Event) -> Result<()> {
        self.check_online()?;
        self.events
            .lock()
            .await
            .push(Envelope::new(self.origin, event));
        Ok(())
    }

    async fn query(&self, query: Query) -> Result<Vec<QueryReply>> {
        self.check_online()?;
        Ok(self
            .peers
            .iter()
            .map(|(shard, directory)| answer_query(&query, *shard, directory.as_ref()))
            .collect())
    }
}
