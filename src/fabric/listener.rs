//! Subscription loops feeding NATS messages into a `ShardNode`

use futures_util::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::client::NatsClient;
use super::messages::{Command, Envelope, Event, Query, Subjects};
use crate::node::ShardNode;
use crate::types::Result;

/// Start every listener this process needs. The primary (or an unsharded
/// process) consumes commands; every process consumes events and answers
/// queries.
pub async fn spawn_listeners(
    client: &NatsClient,
    subjects: &Subjects,
    node: Arc<ShardNode>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(3);

    if node.identity().is_authoritative() {
        handles.push(spawn_command_listener(client, &subjects.command, node.clone()).await?);
    }
    handles.push(spawn_event_listener(client, &subjects.event, node.clone()).await?);
    handles.push(spawn_query_listener(client, &subjects.query, node).await?);

    Ok(handles)
}

async fn spawn_command_listener(
    client: &NatsClient,
    subject: &str,
    node: Arc<ShardNode>,
) -> Result<JoinHandle<()>> {
    let mut subscriber = client.subscribe(subject).await?;
    info!("Consuming commands on {}", subject);

    Ok(tokio::spawn(async move {
        while let Some(msg) = subscriber.next().await {
            let envelope = match Envelope::<Command>::from_bytes(&msg.payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("Discarding malformed command: {}", e);
                    continue;
                }
            };
            debug!(
                "Command {} from {:?}",
                envelope.message_id, envelope.origin
            );
            if let Err(e) = node.handle_command(envelope).await {
                error!("Failed to apply forwarded command: {}", e);
            }
        }
        warn!("Command subscription closed");
    }))
}

async fn spawn_event_listener(
    client: &NatsClient,
    subject: &str,
    node: Arc<ShardNode>,
) -> Result<JoinHandle<()>> {
    let mut subscriber = client.subscribe(subject).await?;
    info!("Consuming events on {}", subject);

    Ok(tokio::spawn(async move {
        while let Some(msg) = subscriber.next().await {
            match Envelope::<Event>::from_bytes(&msg.payload) {
                Ok(envelope) => node.apply_event(envelope).await,
                Err(e) => warn!("Discarding malformed event: {}", e),
            }
        }
        warn!("Event subscription closed");
    }))
}

async fn spawn_query_listener(
    client: &NatsClient,
    subject: &str,
    node: Arc<ShardNode>,
) -> Result<JoinHandle<()>> {
    let mut subscriber = client.subscribe(subject).await?;
    info!("Answering queries on {}", subject);

    let publisher = client.clone();
    Ok(tokio::spawn(async move {
        while let Some(msg) = subscriber.next().await {
            let Some(reply_to) = msg.reply.clone() else {
                debug!("Query without reply subject, ignoring");
                continue;
            };
            let envelope = match Envelope::<Query>::from_bytes(&msg.payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("Discarding malformed query: {}", e);
                    continue;
                }
            };

            let reply = node.answer_query(&envelope.body);
            match reply.to_bytes() {
                Ok(payload) => {
                    if let Err(e) = publisher.publish(reply_to.as_str(), payload).await {
                        warn!("Failed to answer query {}: {}", envelope.message_id, e);
                    }
                }
                Err(e) => error!("Failed to serialize query reply: {}", e),
            }
        }
        warn!("Query subscription closed");
    }))
}
