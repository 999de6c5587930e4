//! Guild config document schema
//!
//! One document per tenant, holding its feed subscriptions and locale
//! overrides. Backups use the same shape in a separate collection.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::mongo::IntoIndexes;
use crate::store::Record;

/// Collection name for live guild configs
pub const GUILD_COLLECTION: &str = "guilds";

/// Collection name for guild config backups
pub const GUILD_BACKUP_COLLECTION: &str = "guild_backups";

/// Per-source display option overrides. `None` defers to the global setting.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_titles: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_dates: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_previews: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_links_existence: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_tables: Option<bool>,
}

/// One subscription inside a guild config
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FeedSource {
    /// External resource link, shared across tenants
    pub link: String,

    /// Destination channel identifier
    pub channel: String,

    /// Display title
    #[serde(default)]
    pub title: String,

    /// Absent means enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,

    #[serde(default)]
    pub options: DisplayOptions,
}

impl FeedSource {
    /// Create an enabled source
    pub fn new(link: impl Into<String>, channel: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            channel: channel.into(),
            title: title.into(),
            disabled: None,
            options: DisplayOptions::default(),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled == Some(true)
    }
}

/// Guild config document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct GuildConfig {
    /// Tenant identifier
    pub id: String,

    /// Guild display name, informational only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Subscription name -> source
    #[serde(default)]
    pub sources: BTreeMap<String, FeedSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_language: Option<String>,
}

impl GuildConfig {
    /// Create a config with no sources and no overrides
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Builder-style source insertion
    pub fn with_source(mut self, name: impl Into<String>, source: FeedSource) -> Self {
        self.sources.insert(name.into(), source);
        self
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Whether any locale override is set
    pub fn has_overrides(&self) -> bool {
        self.timezone.is_some() || self.date_format.is_some() || self.date_language.is_some()
    }

    /// No sources and no overrides: eligible for deletion
    pub fn is_empty(&self) -> bool {
        !self.has_sources() && !self.has_overrides()
    }

    /// Sources pointing at `link`
    pub fn sources_for<'a>(&'a self, link: &'a str) -> impl Iterator<Item = (&'a String, &'a FeedSource)> {
        self.sources.iter().filter(move |(_, s)| s.link == link)
    }
}

impl Record for GuildConfig {
    const KEY_FIELD: &'static str = "id";

    fn key(&self) -> String {
        self.id.clone()
    }
}

impl IntoIndexes for GuildConfig {
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
