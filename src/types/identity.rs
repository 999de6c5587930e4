//! Shard identity and write authority

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Link registry partition: a shard id, or `None` when unsharded
pub type Partition = Option<u32>;

/// Write authority held by a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Applies writes to the canonical store and broadcasts events
    Primary,
    /// Forwards writes to the primary and applies its events
    Replica,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Replica => write!(f, "replica"),
        }
    }
}

/// Which shard this process is and whether it may write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardIdentity {
    /// `None` when sharding is inactive
    pub shard_id: Option<u32>,
    pub shard_count: u32,
    pub role: Role,
}

impl ShardIdentity {
    /// A single process serving every tenant
    pub fn unsharded() -> Self {
        Self {
            shard_id: None,
            shard_count: 1,
            role: Role::Primary,
        }
    }

    pub fn primary(shard_id: u32, shard_count: u32) -> Self {
        Self {
            shard_id: Some(shard_id),
            shard_count,
            role: Role::Primary,
        }
    }

    pub fn replica(shard_id: u32, shard_count: u32) -> Self {
        Self {
            shard_id: Some(shard_id),
            shard_count,
            role: Role::Replica,
        }
    }

    pub fn is_sharded(&self) -> bool {
        self.shard_id.is_some()
    }

    /// Whether this process writes to the canonical store itself
    pub fn is_authoritative(&self) -> bool {
        !self.is_sharded() || self.role == Role::Primary
    }

    /// This process's link registry partition
    pub fn partition(&self) -> Partition {
        self.shard_id
    }
}

impl fmt::Display for ShardIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shard_id {
            Some(id) => write!(f, "shard {}/{} ({})", id, self.shard_count, self.role),
            None => write!(f, "unsharded"),
        }
    }
}

/// Result of a mutation that may have been routed to the primary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Applied by this process
    Applied(T),
    /// Sent to the primary; this process's cache is updated by the echo
    Forwarded,
}

impl<T> Outcome<T> {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Outcome::Forwarded)
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            Outcome::Forwarded => None,
        }
    }
}
