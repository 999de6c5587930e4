//! Blacklist document schema

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::store::Record;

/// Collection name for blacklisted guilds and users
pub const BLACKLIST_COLLECTION: &str = "blacklists";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlacklistDoc {
    /// Guild or user identifier
    pub id: String,

    /// True for a guild, false for a user
    #[serde(default)]
    pub is_guild: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Record for BlacklistDoc {
    const KEY_FIELD: &'static str = "id";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl IntoIndexes for BlacklistDoc {
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
