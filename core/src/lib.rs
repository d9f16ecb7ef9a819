//! Lead search core: tokenization, the inverted index kept in the cache store,
//! full-text search over the lead store, and cache invalidation on writes.

pub mod analytics;
pub mod cache;
pub mod config;
pub mod error;
pub mod indexer;
pub mod metadata;
mod model;
pub mod persist;
pub mod search;
pub mod service;
pub mod store;
pub mod tokenizer;

pub use error::{CacheError, Error, Result, StoreError};
pub use model::*;
