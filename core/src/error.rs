//! Error types for the lead search core.

use crate::LeadId;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the cache store. Never surfaced to callers of the core
/// operations; [`crate::cache::CacheStore`] turns them into misses.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
            CacheError::Unavailable(e.to_string())
        } else {
            CacheError::Backend(e.to_string())
        }
    }
}

/// Failures of the lead store, the system of record.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("row codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("corrupt row key: {0:?}")]
    CorruptKey(Vec<u8>),
}

/// Core error type for lead indexing and search operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Lead store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Rejected query or lead payload
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("lead not found: {0}")]
    NotFound(LeadId),

    #[error("configuration error: {0}")]
    Config(String),
}
