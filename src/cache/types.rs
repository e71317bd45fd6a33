//! Request identity and cached entry types.

use chrono::{DateTime, Utc};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::{Request, Response};

/// Identity of a cached request: method plus absolute URL (fragment dropped).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn get(url: &Url) -> Self {
    Self::new(&Method::GET, url)
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(&request.method, &request.url)
  }

  /// SHA256 of `"METHOD url"`, used as the storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response read back from a cache store.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Listing row for inspecting a store without loading bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
  pub method: String,
  pub url: String,
  pub status: u16,
  pub size: usize,
  pub cached_at: DateTime<Utc>,
}
