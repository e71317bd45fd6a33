//! The fixed list of assets fetched at install time.

use url::Url;

use super::WorkerError;

/// Version tag of the cache store. Bump it whenever the manifest or the
/// caching policy changes so the next activation drops the old store.
pub const DEFAULT_CACHE_VERSION: &str = "dossier-pwa-v1";

/// Page served to navigations that fail while offline.
pub const DEFAULT_OFFLINE_PAGE: &str = "/offline/";

pub const DEFAULT_PRECACHE: [&str; 4] = [
  "/offline/",
  "/static/manifest.json",
  "/static/dossier_icon.png",
  "/static/css/dist/styles.css",
];

/// Ordered, de-duplicated set of URLs to precache, relative to the worker's
/// origin. Always contains the offline page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheManifest {
  urls: Vec<String>,
  offline_page: String,
}

impl PrecacheManifest {
  pub fn new<I, S>(urls: I, offline_page: impl Into<String>) -> Result<Self, WorkerError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut deduped: Vec<String> = Vec::new();
    for url in urls {
      let url = url.into();
      if url.trim().is_empty() {
        return Err(WorkerError::InvalidManifest("empty URL".to_string()));
      }
      if !deduped.contains(&url) {
        deduped.push(url);
      }
    }

    let offline_page = offline_page.into();
    if !deduped.contains(&offline_page) {
      return Err(WorkerError::InvalidManifest(format!(
        "offline page {} is not precached",
        offline_page
      )));
    }

    Ok(Self {
      urls: deduped,
      offline_page,
    })
  }

  pub fn urls(&self) -> &[String] {
    &self.urls
  }

  pub fn offline_page(&self) -> &str {
    &self.offline_page
  }

  /// Absolute URLs of every entry, in manifest order.
  pub fn resolve(&self, scope: &Url) -> Result<Vec<Url>, WorkerError> {
    self.urls.iter().map(|url| join(scope, url)).collect()
  }

  pub fn offline_url(&self, scope: &Url) -> Result<Url, WorkerError> {
    join(scope, &self.offline_page)
  }
}

impl Default for PrecacheManifest {
  fn default() -> Self {
    Self {
      urls: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
      offline_page: DEFAULT_OFFLINE_PAGE.to_string(),
    }
  }
}

fn join(scope: &Url, url: &str) -> Result<Url, WorkerError> {
  scope.join(url).map_err(|source| WorkerError::InvalidUrl {
    url: url.to_string(),
    source,
  })
}
