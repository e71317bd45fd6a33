//! The offline cache worker: install, activate and fetch handlers.
//!
//! Policy, in short:
//! - install: fetch every manifest URL and store all of them in the
//!   version-named store, or none of them
//! - activate: drop every store whose name is not the current version
//! - fetch: network first; on network failure serve the exact cached request,
//!   then (navigations only) the offline page; otherwise fail
//!
//! Only install writes to the store. Fetch handling reads it and only after
//! the network attempt failed.

mod error;
mod manifest;

use futures::future::try_join_all;
use reqwest::Method;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, RequestKey};
use crate::net::{Network, Request, Response};

pub use error::WorkerError;
pub use manifest::{PrecacheManifest, DEFAULT_CACHE_VERSION, DEFAULT_OFFLINE_PAGE};

/// Where a fetch response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  /// Exact request found in the store after a network failure
  Cache,
  /// Navigation answered with the precached offline page
  OfflineFallback,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::OfflineFallback => "offline-fallback",
    }
  }
}

impl fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Result of handling a fetch event.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Not intercepted; the host sends the request to the network untouched.
  Passthrough,
  Respond {
    response: Response,
    source: ResponseSource,
  },
}

/// What a successful install did, plus the signal for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub cache_name: String,
  pub cached: usize,
  /// Ask the host to activate right away instead of waiting
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
  pub cache_name: String,
  /// Stale stores that were removed
  pub deleted: Vec<String>,
  /// Ask the host to take control of already-open clients
  pub claim_clients: bool,
}

/// One version of the offline worker.
///
/// Owns its version tag, manifest and origin; the network and cache storage
/// are injected handles shared with the host.
pub struct OfflineWorker {
  version: String,
  scope: Url,
  manifest: PrecacheManifest,
  skip_waiting: bool,
  network: Arc<dyn Network>,
  storage: Arc<dyn CacheStorage>,
}

impl OfflineWorker {
  pub fn new(
    version: impl Into<String>,
    scope: Url,
    manifest: PrecacheManifest,
    network: Arc<dyn Network>,
    storage: Arc<dyn CacheStorage>,
  ) -> Self {
    Self {
      version: version.into(),
      scope,
      manifest,
      skip_waiting: true,
      network,
      storage,
    }
  }

  /// Whether install asks the host to skip the waiting phase (default: yes).
  pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
    self.skip_waiting = skip_waiting;
    self
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn scope(&self) -> &Url {
    &self.scope
  }

  pub fn manifest(&self) -> &PrecacheManifest {
    &self.manifest
  }

  /// Populate the version-named store with every manifest asset.
  ///
  /// Fetches run concurrently. Any transport failure or non-2xx answer fails
  /// the whole install before anything is written.
  pub async fn install(&self) -> Result<InstallReport, WorkerError> {
    info!(version = %self.version, "install");

    self.storage.open(&self.version)?;

    let urls = self.manifest.resolve(&self.scope)?;
    let entries = try_join_all(urls.into_iter().map(|url| self.precache(url))).await?;

    self.storage.put_all(&self.version, &entries)?;
    info!(version = %self.version, cached = entries.len(), "precache complete");

    Ok(InstallReport {
      cache_name: self.version.clone(),
      cached: entries.len(),
      skip_waiting: self.skip_waiting,
    })
  }

  async fn precache(&self, url: Url) -> Result<(RequestKey, Response), WorkerError> {
    let request = Request::get(url);
    let response = self
      .network
      .fetch(&request)
      .await
      .map_err(|source| WorkerError::Precache {
        url: request.url.to_string(),
        source,
      })?;

    if !response.is_success() {
      return Err(WorkerError::PrecacheStatus {
        url: request.url.to_string(),
        status: response.status,
      });
    }

    debug!(url = %request.url, bytes = response.body.len(), "precached");
    Ok((RequestKey::for_request(&request), response))
  }

  /// Whether this version's store exists and holds every manifest asset.
  pub async fn is_installed(&self) -> Result<bool, WorkerError> {
    if !self.storage.has(&self.version)? {
      return Ok(false);
    }
    for url in self.manifest.resolve(&self.scope)? {
      if self
        .storage
        .match_request(&self.version, &RequestKey::get(&url))?
        .is_none()
      {
        return Ok(false);
      }
    }
    Ok(true)
  }

  /// Delete every store that does not belong to this version.
  ///
  /// Fails with [`WorkerError::NotInstalled`] before touching anything when
  /// this version's own store is not complete.
  pub async fn activate(&self) -> Result<ActivateReport, WorkerError> {
    info!(version = %self.version, "activate");

    if !self.is_installed().await? {
      return Err(WorkerError::NotInstalled {
        version: self.version.clone(),
      });
    }

    let mut deleted = Vec::new();
    for name in self.storage.keys()? {
      if name != self.version && self.storage.delete(&name)? {
        info!(cache = %name, "deleted stale cache");
        deleted.push(name);
      }
    }

    Ok(ActivateReport {
      cache_name: self.version.clone(),
      deleted,
      claim_clients: true,
    })
  }

  /// Network-first handling of one intercepted request.
  pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome, WorkerError> {
    if request.method != Method::GET {
      debug!(method = %request.method, url = %request.url, "not intercepting non-GET");
      return Ok(FetchOutcome::Passthrough);
    }
    if request.url.origin() != self.scope.origin() {
      debug!(url = %request.url, "not intercepting cross-origin");
      return Ok(FetchOutcome::Passthrough);
    }

    let error = match self.network.fetch(request).await {
      Ok(response) => {
        return Ok(FetchOutcome::Respond {
          response,
          source: ResponseSource::Network,
        })
      }
      Err(e) => e,
    };

    warn!(url = %request.url, error = %error, "network failed, trying cache");

    let key = RequestKey::for_request(request);
    if let Some(cached) = self.storage.match_request(&self.version, &key)? {
      debug!(url = %request.url, cached_at = %cached.cached_at, "serving cached response");
      return Ok(FetchOutcome::Respond {
        response: cached.response,
        source: ResponseSource::Cache,
      });
    }

    if request.is_navigation() {
      let offline = RequestKey::get(&self.manifest.offline_url(&self.scope)?);
      if let Some(cached) = self.storage.match_request(&self.version, &offline)? {
        info!(url = %request.url, "serving offline page");
        return Ok(FetchOutcome::Respond {
          response: cached.response,
          source: ResponseSource::OfflineFallback,
        });
      }
    }

    Err(WorkerError::Network(error))
  }
}
