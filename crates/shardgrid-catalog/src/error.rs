//! Error types for the shard catalog.

use shard_core::{KeyError, RawKey, Shard};
use thiserror::Error;

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog not initialized: {0}")]
    CatalogNotInitialized(String),

    #[error("catalog belongs to shard map {found:?}, expected {expected:?}")]
    ShardMapMismatch { expected: String, found: String },

    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("invalid shard {0}: server and database must match [a-z0-9][a-z0-9_-]*")]
    InvalidShard(Shard),

    #[error("unknown shard: {0}")]
    UnknownShard(Shard),

    #[error("key {key} is already mapped to {existing}, refusing to map it to {requested}")]
    MappingConflict {
        key: RawKey,
        existing: Shard,
        requested: Shard,
    },

    #[error("mapping for {key} is at version {actual}, expected {expected}")]
    VersionConflict {
        key: RawKey,
        expected: u64,
        actual: u64,
    },

    #[error("no mapping for key {0}")]
    MappingNotFound(RawKey),

    #[error("failed to open catalog store: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

impl CatalogError {
    /// Whether the outcome of the failed call is unknown and the call may be
    /// retried under the idempotency rules.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatalogError::Open(_)
                | CatalogError::Transaction(_)
                | CatalogError::Table(_)
                | CatalogError::Read(_)
                | CatalogError::Write(_)
        )
    }
}
