//! Benefactor (VIP) document schema
//!
//! A benefactor sponsors elevated limits for the guilds in `servers`.

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::store::Record;

/// Collection name for benefactors
pub const VIP_COLLECTION: &str = "vips";

/// Benefactor document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BenefactorDoc {
    /// Benefactor user identifier
    pub id: String,

    /// Resolved username, backfilled from the directory when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Sponsored guild ids
    #[serde(default)]
    pub servers: Vec<String>,

    /// Feed limit granted to sponsored guilds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_feeds: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<DateTime<Utc>>,
}

impl BenefactorDoc {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_feeds(mut self, max_feeds: u32) -> Self {
        self.max_feeds = Some(max_feeds);
        self
    }
}

impl Record for BenefactorDoc {
    const KEY_FIELD: &'static str = "id";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl IntoIndexes for BenefactorDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "id": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("id_unique".to_string())
                    .build(),
            ),
        )]
    }
}
