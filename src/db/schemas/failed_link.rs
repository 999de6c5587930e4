//! Failed link document schema

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::store::Record;

/// Collection name for failure records
pub const FAILED_LINK_COLLECTION: &str = "failed_links";

/// Failure record stored in MongoDB. Exactly one of `count` and `failed` is set.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FailedLinkDoc {
    pub link: String,

    /// Consecutive failed attempts while still counting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// RFC 3339 timestamp once the link is broken
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<String>,
}

impl FailedLinkDoc {
    pub fn counting(link: impl Into<String>, count: u32) -> Self {
        Self {
            link: link.into(),
            count: Some(count),
            failed: None,
        }
    }

    pub fn broken(link: impl Into<String>, failed: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            count: None,
            failed: Some(failed.into()),
        }
    }
}

impl Record for FailedLinkDoc {
    const KEY_FIELD: &'static str = "link";

    fn key(&self) -> String {
        self.link.clone()
    }
}

impl IntoIndexes for FailedLinkDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "link": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("link_unique".to_string())
                    .build(),
            ),
        )]
    }
}
