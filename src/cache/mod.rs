//! Version-named persistent cache stores.
//!
//! This module provides the storage side of the offline worker:
//! - Stores are addressed by name (the worker's version tag)
//! - Entries map a request identity (method + URL) to a full response
//! - Writes happen in batches, atomically, so a failed install leaves no trace
//! - Whole stores are deleted at once when a newer version activates

mod storage;
mod types;

pub use storage::{CacheStorage, SqliteStorage, StorageError};
pub use types::RequestKey;
#[cfg(test)]
pub use types::{CachedResponse, EntrySummary};
