use thiserror::Error;

use crate::cache::StorageError;
use crate::net::NetworkError;

/// Errors surfaced by a single lifecycle event.
#[derive(Debug, Error)]
pub enum WorkerError {
  /// A manifest asset could not be fetched; the install step fails.
  #[error("Failed to precache {url}: {source}")]
  Precache { url: String, source: NetworkError },

  /// A manifest asset answered with a non-2xx status; the install step fails.
  #[error("Failed to precache {url}: server answered {status}")]
  PrecacheStatus { url: String, status: u16 },

  /// Activation asked for a version whose store is missing or incomplete.
  #[error("Cache {version} is not installed; run install first")]
  NotInstalled { version: String },

  /// Network failure with nothing in the cache to fall back to.
  #[error(transparent)]
  Network(#[from] NetworkError),

  #[error("Cache storage unavailable: {0}")]
  Storage(#[from] StorageError),

  #[error("Invalid precache manifest: {0}")]
  InvalidManifest(String),

  #[error("Invalid URL '{url}': {source}")]
  InvalidUrl {
    url: String,
    source: url::ParseError,
  },
}
