//! Link tracker document schema
//!
//! One document per (link, shard partition). Unsharded fleets store a single
//! document per link with no shard.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::store::Record;

/// Collection name for link reference counts
pub const LINK_TRACKER_COLLECTION: &str = "link_tracker";

/// Reference count document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkTrackerDoc {
    /// Composite key of partition and link
    pub key: String,

    pub link: String,

    pub count: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<u32>,
}

impl LinkTrackerDoc {
    pub fn new(link: impl Into<String>, count: u32, shard: Option<u32>) -> Self {
        let link = link.into();
        Self {
            key: Self::key_for(&link, shard),
            link,
            count,
            shard,
        }
    }

    /// Store key for a link in a partition
    pub fn key_for(link: &str, shard: Option<u32>) -> String {
        match shard {
            Some(shard) => format!("{shard}:{link}"),
            None => format!("g:{link}"),
        }
    }
}

impl Record for LinkTrackerDoc {
    const KEY_FIELD: &'static str = "key";

    fn key(&self) -> String {
        self.key.clone()
    }
}

impl IntoIndexes for LinkTrackerDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "key": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("key_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "link": 1 },
                Some(IndexOptions::builder().name("link_index".to_string()).build()),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_keys_do_not_collide() {
        let global = LinkTrackerDoc::new("X", 1, None);
        let shard0 = LinkTrackerDoc::new("X", 1, Some(0));
        let shard1 = LinkTrackerDoc::new("X", 1, Some(1));

        assert_eq!(global.key, "g:X");
        assert_eq!(shard0.key, "0:X");
        assert_ne!(shard0.key, shard1.key);
    }
}
