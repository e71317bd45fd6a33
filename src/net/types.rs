//! Request and response types shared by the network, cache and worker layers.

use reqwest::Method;
use url::Url;

/// How the request was issued, mirroring the fetch `mode` of a browser request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  SameOrigin,
  #[default]
  Cors,
  NoCors,
}

impl RequestMode {
  /// Parse the value of a `Sec-Fetch-Mode` header.
  pub fn from_fetch_mode(value: &str) -> Option<Self> {
    match value.trim().to_ascii_lowercase().as_str() {
      "navigate" => Some(Self::Navigate),
      "same-origin" => Some(Self::SameOrigin),
      "cors" => Some(Self::Cors),
      "no-cors" => Some(Self::NoCors),
      _ => None,
    }
  }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Request {
  /// A plain GET, as issued for subresources and precaching.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Cors,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  /// A GET for a full page load.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  #[cfg(test)]
  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// A complete response: status, headers in wire order, and the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  #[cfg(test)]
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// 2xx, the same test `Cache.addAll` applies.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
