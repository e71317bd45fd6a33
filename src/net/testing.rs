//! Scripted in-memory network for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::types::{Request, Response};
use super::{Network, NetworkError};

/// Serves canned responses by URL and records every request it sees.
///
/// Unknown URLs answer 404. Going offline makes every fetch fail.
#[derive(Default)]
pub struct ScriptedNetwork {
  responses: Mutex<HashMap<String, Response>>,
  unreachable: Mutex<HashSet<String>>,
  offline: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn serve(&self, url: &str, response: Response) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  /// Make a single URL fail at the transport level.
  pub fn unreachable(&self, url: &str) {
    self.unreachable.lock().unwrap().insert(url.to_string());
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Every request seen so far, as `"METHOD url"`.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let url = request.url.to_string();
    self
      .calls
      .lock()
      .unwrap()
      .push(format!("{} {}", request.method, url));

    if self.offline.load(Ordering::SeqCst) {
      return Err(NetworkError::new(&request.url, "network unreachable"));
    }
    if self.unreachable.lock().unwrap().contains(&url) {
      return Err(NetworkError::new(&request.url, "connection refused"));
    }

    Ok(
      self
        .responses
        .lock()
        .unwrap()
        .get(&url)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}
