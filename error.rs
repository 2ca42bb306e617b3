use crate::algorithm::Algorithm;
use crate::metadata::UserId;
use thiserror::Error;

/// Error taxonomy for vault operations
#[derive(Debug, Error)]
pub enum VaultError {
    /// Caller mistakes: unknown algorithm tag, malformed key hex, bad paths
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Supplied secret key does not match the stored hash, or no key exists
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// AEAD tag verification failed or the envelope is malformed
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Missing user, file record or stored object
    #[error("Not found: {0}")]
    NotFound(String),

    /// The resource already exists (secret key, filename)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object store, staging area or metadata store I/O failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// Files were re-encrypted but the metadata store still describes the old algorithm
    #[error("Metadata desync for user {user_id}: files re-encrypted {from} -> {to} but commit failed: {reason}")]
    MetadataDesync {
        user_id: UserId,
        from: Algorithm,
        to: Algorithm,
        reason: String,
    },

    /// Summary error for a migration that stopped before committing
    #[error("Migration for user {user_id} aborted while {stage} ({storage_name}): {source}")]
    MigrationAborted {
        user_id: UserId,
        stage: &'static str,
        storage_name: String,
        #[source]
        source: Box<VaultError>,
    },
}

impl VaultError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Tag mismatches look the same as a wrong key to the caller.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::Integrity(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::Storage(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("metadata serialization: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
