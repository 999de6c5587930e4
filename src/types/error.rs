//! Error types for the synchronization layer
//!
//! One flat enum with string payloads, plus `From` conversions for the
//! driver errors this crate touches.

/// Main error type for synchronization operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Malformed input, unknown tenant/feed/benefactor. No state was changed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Durable read or write failed
    #[error("Database error: {0}")]
    Database(String),

    /// A multi-item operation had at least one failed write. Successful items
    /// are committed and not rolled back.
    #[error("Bulk operation failed for {} of {} item(s): {}", .failed.len(), .failed.len() + .succeeded.len(), .failed.join(", "))]
    PartialBulk {
        succeeded: Vec<String>,
        failed: Vec<String>,
    },

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether this error means the canonical store rejected or lost a write
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Database(_) | Self::PartialBulk { .. })
    }

    /// Whether this error came from the inter-process transport
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Nats(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

impl From<mongodb::error::Error> for SyncError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for SyncError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Serialization(format!("BSON error: {}", err))
    }
}

impl From<bson::de::Error> for SyncError {
    fn from(err: bson::de::Error) -> Self {
        Self::Serialization(format!("BSON error: {}", err))
    }
}

impl From<async_nats::Error> for SyncError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

/// Result type alias for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;
