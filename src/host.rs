//! Lifecycle driver for offline workers.
//!
//! Plays the part of the browser's worker registration: installs a new
//! version, activates it once install succeeded and it asked to skip waiting,
//! and routes fetch events to whichever version is active.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::net::Request;
use crate::worker::{ActivateReport, FetchOutcome, InstallReport, OfflineWorker, WorkerError};

/// Outcome of registering a worker version.
#[derive(Debug, Clone)]
pub struct Registration {
  pub version: String,
  /// `None` when an already complete store was resumed instead
  pub install: Option<InstallReport>,
  /// `None` while the version is still waiting
  pub activate: Option<ActivateReport>,
}

pub struct WorkerHost {
  active: RwLock<Option<Arc<OfflineWorker>>>,
  waiting: Mutex<Option<Arc<OfflineWorker>>>,
  clients_claimed: AtomicBool,
}

impl WorkerHost {
  pub fn new() -> Self {
    Self {
      active: RwLock::new(None),
      waiting: Mutex::new(None),
      clients_claimed: AtomicBool::new(false),
    }
  }

  /// Install `worker` and, if it asks to skip waiting, activate it.
  ///
  /// A failed install or activate leaves the previously active version in
  /// control.
  pub async fn register(&self, worker: OfflineWorker) -> Result<Registration, WorkerError> {
    self.install_and_activate(Arc::new(worker)).await
  }

  /// Bring up `worker` when the host starts.
  ///
  /// Like [`register`](Self::register), except that a failed precache does
  /// not strand a version whose store is already complete (a restart while
  /// offline): that store is activated as is.
  pub async fn start(&self, worker: OfflineWorker) -> Result<Registration, WorkerError> {
    let worker = Arc::new(worker);
    let error = match self.install_and_activate(Arc::clone(&worker)).await {
      Ok(registration) => return Ok(registration),
      Err(e @ (WorkerError::Precache { .. } | WorkerError::PrecacheStatus { .. })) => e,
      Err(e) => return Err(e),
    };

    if !worker.is_installed().await? {
      return Err(error);
    }

    info!(version = %worker.version(), "resuming installed cache");
    let version = worker.version().to_string();
    let activate = self.activate(worker).await?;
    Ok(Registration {
      version,
      install: None,
      activate: Some(activate),
    })
  }

  async fn install_and_activate(
    &self,
    worker: Arc<OfflineWorker>,
  ) -> Result<Registration, WorkerError> {
    let version = worker.version().to_string();

    let install = match worker.install().await {
      Ok(report) => report,
      Err(e) => {
        let active = self.active_version().await;
        warn!(
          version = %version,
          active = ?active,
          error = %e,
          "install failed, keeping current version"
        );
        return Err(e);
      }
    };

    if !install.skip_waiting {
      info!(version = %version, "installed, waiting");
      *self.waiting.lock().await = Some(worker);
      return Ok(Registration {
        version,
        install: Some(install),
        activate: None,
      });
    }

    let activate = self.activate(worker).await?;
    Ok(Registration {
      version,
      install: Some(install),
      activate: Some(activate),
    })
  }

  /// Activate the waiting version, if there is one.
  pub async fn promote_waiting(&self) -> Result<Option<ActivateReport>, WorkerError> {
    let waiting = self.waiting.lock().await.take();
    match waiting {
      Some(worker) => self.activate(worker).await.map(Some),
      None => Ok(None),
    }
  }

  async fn activate(&self, worker: Arc<OfflineWorker>) -> Result<ActivateReport, WorkerError> {
    // Hold the write lock across activation so no fetch reaches the new
    // version before its stale stores are gone.
    let mut active = self.active.write().await;
    let report = worker.activate().await?;

    if report.claim_clients {
      self.clients_claimed.store(true, Ordering::SeqCst);
    }
    info!(
      version = %worker.version(),
      deleted = report.deleted.len(),
      claimed = report.claim_clients,
      "activated"
    );
    *active = Some(worker);

    Ok(report)
  }

  /// Route a fetch event to the active version. Without one, nothing is
  /// intercepted.
  pub async fn dispatch(&self, request: &Request) -> Result<FetchOutcome, WorkerError> {
    let worker = self.active.read().await.clone();
    match worker {
      Some(worker) => worker.handle_fetch(request).await,
      None => Ok(FetchOutcome::Passthrough),
    }
  }

  pub async fn active_version(&self) -> Option<String> {
    self
      .active
      .read()
      .await
      .as_ref()
      .map(|w| w.version().to_string())
  }

  #[allow(dead_code)]
  pub async fn waiting_version(&self) -> Option<String> {
    self
      .waiting
      .lock()
      .await
      .as_ref()
      .map(|w| w.version().to_string())
  }

  /// Whether an activated version has taken control of open clients.
  pub fn clients_claimed(&self) -> bool {
    self.clients_claimed.load(Ordering::SeqCst)
  }
}

impl Default for WorkerHost {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{
    CacheStorage, CachedResponse, EntrySummary, RequestKey, SqliteStorage, StorageError,
  };
  use crate::net::testing::ScriptedNetwork;
  use crate::net::Response;
  use crate::worker::{PrecacheManifest, ResponseSource};
  use std::time::Duration;
  use url::Url;

  const ORIGIN: &str = "http://dossier.test/";

  fn setup() -> (Arc<ScriptedNetwork>, Arc<SqliteStorage>) {
    let network = Arc::new(ScriptedNetwork::new());
    for path in PrecacheManifest::default().urls() {
      network.serve(
        &format!("http://dossier.test{}", path),
        Response::new(200, format!("asset {}", path)),
      );
    }
    (network, Arc::new(SqliteStorage::in_memory().unwrap()))
  }

  fn worker<S: CacheStorage + 'static>(
    version: &str,
    network: &Arc<ScriptedNetwork>,
    storage: &Arc<S>,
  ) -> OfflineWorker {
    OfflineWorker::new(
      version,
      Url::parse(ORIGIN).unwrap(),
      PrecacheManifest::default(),
      network.clone(),
      storage.clone(),
    )
  }

  #[tokio::test]
  async fn test_register_installs_then_activates() {
    let (network, storage) = setup();
    let host = WorkerHost::new();
    assert!(!host.clients_claimed());

    let registration = host
      .register(worker("dossier-pwa-v1", &network, &storage))
      .await
      .unwrap();

    assert_eq!(registration.install.as_ref().map(|r| r.cached), Some(4));
    assert!(registration.activate.is_some());
    assert_eq!(host.active_version().await.as_deref(), Some("dossier-pwa-v1"));
    assert!(host.clients_claimed());
  }

  #[tokio::test]
  async fn test_upgrade_prunes_previous_store() {
    let (network, storage) = setup();
    let host = WorkerHost::new();
    host
      .register(worker("dossier-pwa-v1", &network, &storage))
      .await
      .unwrap();

    let registration = host
      .register(worker("dossier-pwa-v2", &network, &storage))
      .await
      .unwrap();

    assert_eq!(
      registration.activate.unwrap().deleted,
      vec!["dossier-pwa-v1".to_string()]
    );
    assert_eq!(storage.keys().unwrap(), vec!["dossier-pwa-v2".to_string()]);
  }

  #[tokio::test]
  async fn test_failed_install_keeps_previous_version() {
    let (network, storage) = setup();
    let host = WorkerHost::new();
    host
      .register(worker("dossier-pwa-v1", &network, &storage))
      .await
      .unwrap();

    network.unreachable("http://dossier.test/static/manifest.json");
    let result = host
      .register(worker("dossier-pwa-v2", &network, &storage))
      .await;

    assert!(matches!(result, Err(WorkerError::Precache { .. })));
    assert_eq!(host.active_version().await.as_deref(), Some("dossier-pwa-v1"));
    assert_eq!(storage.entries("dossier-pwa-v1").unwrap().len(), 4);

    // The still-active version keeps serving its own store
    network.set_offline(true);
    let outcome = host
      .dispatch(&Request::navigate(
        Url::parse("http://dossier.test/dossiers/").unwrap(),
      ))
      .await
      .unwrap();
    assert!(matches!(
      outcome,
      FetchOutcome::Respond {
        source: ResponseSource::OfflineFallback,
        ..
      }
    ));
  }

  #[tokio::test]
  async fn test_dispatch_without_active_worker_passes_through() {
    let host = WorkerHost::new();
    let outcome = host
      .dispatch(&Request::get(Url::parse("http://dossier.test/").unwrap()))
      .await
      .unwrap();
    assert!(matches!(outcome, FetchOutcome::Passthrough));
  }

  #[tokio::test]
  async fn test_waiting_worker_activates_on_promote() {
    let (network, storage) = setup();
    let host = WorkerHost::new();
    host
      .register(worker("dossier-pwa-v1", &network, &storage))
      .await
      .unwrap();

    let registration = host
      .register(worker("dossier-pwa-v2", &network, &storage).with_skip_waiting(false))
      .await
      .unwrap();
    assert!(registration.activate.is_none());
    assert_eq!(host.active_version().await.as_deref(), Some("dossier-pwa-v1"));
    assert_eq!(host.waiting_version().await.as_deref(), Some("dossier-pwa-v2"));
    assert_eq!(storage.keys().unwrap().len(), 2);

    let report = host.promote_waiting().await.unwrap().unwrap();
    assert_eq!(report.deleted, vec!["dossier-pwa-v1".to_string()]);
    assert_eq!(host.active_version().await.as_deref(), Some("dossier-pwa-v2"));
    assert!(host.waiting_version().await.is_none());
    assert!(host.promote_waiting().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_start_offline_resumes_complete_store() {
    let (network, storage) = setup();
    WorkerHost::new()
      .register(worker("dossier-pwa-v1", &network, &storage))
      .await
      .unwrap();

    // Restart without connectivity
    network.set_offline(true);
    let host = WorkerHost::new();
    let registration = host
      .start(worker("dossier-pwa-v1", &network, &storage))
      .await
      .unwrap();

    assert!(registration.install.is_none());
    assert!(registration.activate.is_some());
    assert_eq!(host.active_version().await.as_deref(), Some("dossier-pwa-v1"));
    let outcome = host
      .dispatch(&Request::navigate(
        Url::parse("http://dossier.test/dossiers/7/").unwrap(),
      ))
      .await
      .unwrap();
    assert!(matches!(
      outcome,
      FetchOutcome::Respond {
        source: ResponseSource::OfflineFallback,
        ..
      }
    ));
  }

  #[tokio::test]
  async fn test_start_offline_without_store_leaves_nothing_active() {
    let (network, storage) = setup();
    network.set_offline(true);
    let host = WorkerHost::new();

    let result = host
      .start(worker("dossier-pwa-v1", &network, &storage))
      .await;

    assert!(matches!(result, Err(WorkerError::Precache { .. })));
    assert!(host.active_version().await.is_none());
    let outcome = host
      .dispatch(&Request::navigate(
        Url::parse("http://dossier.test/dossiers/").unwrap(),
      ))
      .await
      .unwrap();
    assert!(matches!(outcome, FetchOutcome::Passthrough));
  }

  /// SQLite storage that remembers, for every lookup of a dossier page, which
  /// stores existed at that moment.
  struct RecordingStorage {
    inner: SqliteStorage,
    lookups: std::sync::Mutex<Vec<(String, Vec<String>)>>,
  }

  impl RecordingStorage {
    fn new() -> Self {
      Self {
        inner: SqliteStorage::in_memory().unwrap(),
        lookups: std::sync::Mutex::new(Vec::new()),
      }
    }

    fn lookups(&self) -> Vec<(String, Vec<String>)> {
      self.lookups.lock().unwrap().clone()
    }
  }

  impl CacheStorage for RecordingStorage {
    fn open(&self, name: &str) -> Result<(), StorageError> {
      self.inner.open(name)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
      self.inner.keys()
    }

    fn has(&self, name: &str) -> Result<bool, StorageError> {
      self.inner.has(name)
    }

    fn delete(&self, name: &str) -> Result<bool, StorageError> {
      self.inner.delete(name)
    }

    fn match_request(
      &self,
      name: &str,
      key: &RequestKey,
    ) -> Result<Option<CachedResponse>, StorageError> {
      if key.url.contains("/dossiers/") {
        let stores = self.inner.keys()?;
        self.lookups.lock().unwrap().push((name.to_string(), stores));
      }
      self.inner.match_request(name, key)
    }

    fn put_all(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<(), StorageError> {
      self.inner.put_all(name, entries)
    }

    fn entries(&self, name: &str) -> Result<Vec<EntrySummary>, StorageError> {
      self.inner.entries(name)
    }
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_fetches_never_see_new_version_with_stale_stores() {
    let (network, _) = setup();
    network.unreachable("http://dossier.test/dossiers/1/");
    let storage = Arc::new(RecordingStorage::new());
    let host = Arc::new(WorkerHost::new());
    host
      .register(worker("dossier-pwa-v1", &network, &storage))
      .await
      .unwrap();

    let request = Request::navigate(Url::parse("http://dossier.test/dossiers/1/").unwrap());
    host.dispatch(&request).await.unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..4 {
      let host = Arc::clone(&host);
      let done = Arc::clone(&done);
      let request = request.clone();
      readers.push(tokio::spawn(async move {
        while !done.load(Ordering::SeqCst) {
          // A fetch routed to the old version can lose its store mid-flight
          let _ = host.dispatch(&request).await;
          tokio::task::yield_now().await;
        }
      }));
    }

    host
      .register(worker("dossier-pwa-v2", &network, &storage).with_skip_waiting(false))
      .await
      .unwrap();
    host.promote_waiting().await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    host.dispatch(&request).await.unwrap();

    done.store(true, Ordering::SeqCst);
    for reader in readers {
      reader.await.unwrap();
    }

    let lookups = storage.lookups();
    assert!(lookups.iter().any(|(name, _)| name == "dossier-pwa-v1"));
    assert!(lookups.iter().any(|(name, _)| name == "dossier-pwa-v2"));
    for (name, stores) in &lookups {
      if name == "dossier-pwa-v2" {
        assert_eq!(stores, &vec!["dossier-pwa-v2".to_string()]);
      }
    }
  }
}
