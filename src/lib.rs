//! Feedfleet - cross-shard state synchronization for feed subscription fleets
//!
//! A fleet of processes each serves a subset of guilds. One primary writes
//! to the canonical store; replicas forward their mutations to it and keep
//! their caches current from the events it broadcasts.
//!
//! ## Components
//!
//! - **Guilds**: per-guild feed configuration with backup and restore
//! - **Links**: reference counts per link and partition; zero releases the link
//! - **Failures**: consecutive-failure counting and circuit breaking with alerts
//! - **Entitlements**: benefactor sponsorship of guilds and feed limits
//! - **Blacklists**: guild and user bans
//! - **Fabric**: NATS command, event and query subjects between shards

pub mod cache;
pub mod config;
pub mod db;
pub mod directory;
pub mod fabric;
pub mod node;
pub mod store;
pub mod sync;
pub mod types;

pub use config::Args;
pub use node::ShardNode;
pub use types::{Result, SyncError};
