//! Database schemas
//!
//! Defines the MongoDB document structures for guild configs, backups, link
//! reference counts, failure records, benefactors and blacklists.

mod blacklist;
mod failed_link;
mod guild;
mod link_tracker;
mod vip;

pub use blacklist::{BlacklistDoc, BLACKLIST_COLLECTION};
pub use failed_link::{FailedLinkDoc, FAILED_LINK_COLLECTION};
pub use guild::{
    DisplayOptions, FeedSource, GuildConfig, GUILD_BACKUP_COLLECTION, GUILD_COLLECTION,
};
pub use link_tracker::{LinkTrackerDoc, LINK_TRACKER_COLLECTION};
pub use vip::{BenefactorDoc, VIP_COLLECTION};
