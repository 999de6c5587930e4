//! Shard messaging fabric
//!
//! Commands to the primary, events to every process, and fleet queries,
//! carried over NATS in production and in-process in tests.

pub mod client;
pub mod listener;
pub mod messages;
pub mod transport;

pub use client::NatsClient;
pub use listener::spawn_listeners;
pub use messages::{Command, Envelope, Event, Query, QueryReply, Subjects};
pub use transport::{answer_query, LocalTransport, NatsTransport, Transport};
