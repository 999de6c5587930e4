//! Database layer
//!
//! MongoDB backend for the canonical store.
//! Pattern adapted from holo-host/rust/util_libs/db

pub mod mongo;
pub mod schemas;

pub use mongo::{MongoBuckets, MongoClient, MongoCollection};
pub use schemas::{BenefactorDoc, BlacklistDoc, FailedLinkDoc, FeedSource, GuildConfig, LinkTrackerDoc};
