//! Network boundary for the interceptor.
//!
//! Everything the worker sends over the wire goes through the [`Network`]
//! trait so that hosts (and tests) can decide what "the network" is.

mod client;
#[cfg(test)]
pub mod testing;
mod types;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

pub use client::HttpNetwork;
pub use types::{Request, RequestMode, Response};

/// Transport-level failure: no connectivity, DNS failure, timeout.
///
/// An HTTP error status is a [`Response`], never a `NetworkError`.
#[derive(Debug, Clone, Error)]
#[error("network request to {url} failed: {message}")]
pub struct NetworkError {
  pub url: String,
  pub message: String,
}

impl NetworkError {
  pub fn new(url: &Url, message: impl std::fmt::Display) -> Self {
    Self {
      url: url.to_string(),
      message: message.to_string(),
    }
  }
}

/// Something that can perform a request and hand back the full response.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}
