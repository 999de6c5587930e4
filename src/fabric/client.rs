//! NATS client wrapper
//!
//! Provides connection management with reconnection, fire-and-forget
//! publishing, and scatter/gather requests bounded by a collection window.

use async_nats::{Client, ConnectOptions, Message};
use bytes::Bytes;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::NatsArgs;
use crate::types::{Result, SyncError};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// NATS client wrapper
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    name: String,
}

impl NatsClient {
    /// Create a new NATS client
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        // No retry_on_initial_connect(): fail fast when NATS is down at startup.
        // Reconnection still works after the first successful connection.
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| SyncError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self {
            client,
            name: name.to_string(),
        })
    }

    /// Get the underlying NATS client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Publish a message to a subject
    pub async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| SyncError::Nats(format!("Publish failed: {}", e)))
    }

    /// Publish to every subscriber of `subject` and gather replies until
    /// `expected` have arrived or `window` has elapsed
    pub async fn scatter_gather(
        &self,
        subject: &str,
        payload: Bytes,
        expected: usize,
        window: Duration,
    ) -> Result<Vec<Message>> {
        let inbox = self.client.new_inbox();

        // Subscribe to the inbox before publishing
        let mut subscription = self
            .client
            .subscribe(inbox.clone())
            .await
            .map_err(|e| SyncError::Nats(format!("Subscribe failed: {}", e)))?;

        self.client
            .publish_with_reply(subject.to_string(), inbox, payload)
            .await
            .map_err(|e| SyncError::Nats(format!("Publish failed: {}", e)))?;

        let deadline = Instant::now() + window;
        let mut replies = Vec::with_capacity(expected);
        while replies.len() < expected {
            match tokio::time::timeout_at(deadline, subscription.next()).await {
                Ok(Some(message)) => replies.push(message),
                Ok(None) => break,
                Err(_) => {
                    debug!(
                        "Collection window on {} closed with {}/{} replies",
                        subject,
                        replies.len(),
                        expected
                    );
                    break;
                }
            }
        }

        Ok(replies)
    }

    /// Subscribe to a subject
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber> {
        self.client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| SyncError::Nats(format!("Subscribe failed: {}", e)))
    }

    /// Flush pending messages
    pub async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| SyncError::Nats(format!("Flush failed: {}", e)))
    }

    /// Get the client name
    pub fn name(&self) -> &str {
        &self.name
    }
}
