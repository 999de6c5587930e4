//! Shared types: errors, identity, and the pure state held by the cache

pub mod entitlement;
pub mod error;
pub mod failure;
pub mod identity;
pub mod link_list;

pub use entitlement::{Entitlements, SponsorChange, Sponsorship};
pub use error::{Result, SyncError};
pub use failure::{FailureBook, FailureState, Transition};
pub use identity::{Outcome, Partition, Role, ShardIdentity};
pub use link_list::LinkList;
