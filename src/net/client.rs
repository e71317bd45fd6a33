use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::config::NetworkConfig;

use super::types::{Request, Response};
use super::{Network, NetworkError};

/// HTTP implementation of [`Network`] on top of reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(config.user_agent.as_str())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| NetworkError::new(&request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    // A connection dropped mid-body is still a network failure
    let body = response
      .bytes()
      .await
      .map_err(|e| NetworkError::new(&request.url, e))?
      .to_vec();

    debug!(method = %request.method, url = %request.url, status, "network response");

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
