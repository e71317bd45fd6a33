//! HTTP front for the worker host.
//!
//! Every request that reaches the proxy is rewritten onto the application
//! origin, dispatched through the active worker, and forwarded untouched when
//! the worker does not intercept it.

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::header::{HeaderName, HeaderValue, ACCEPT, HOST};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::Router;
use color_eyre::{eyre::eyre, Result};
use http_body_util::LengthLimitError;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::host::WorkerHost;
use crate::net::{Network, Request, RequestMode, Response};
use crate::worker::{FetchOutcome, ResponseSource};

/// Largest request body the proxy will buffer.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Response header naming where the body came from.
pub const SOURCE_HEADER: &str = "x-offline-source";

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 9] = [
  "connection",
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
  "content-length",
];

pub struct ProxyState {
  pub host: Arc<WorkerHost>,
  pub network: Arc<dyn Network>,
  pub origin: Url,
}

pub fn router(state: Arc<ProxyState>) -> Router {
  Router::new().fallback(handle).with_state(state)
}

pub async fn serve(listen: SocketAddr, state: Arc<ProxyState>) -> Result<()> {
  let listener = tokio::net::TcpListener::bind(listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", listen, e))?;

  info!(listen = %listen, origin = %state.origin, "proxy listening");

  axum::serve(listener, router(state))
    .await
    .map_err(|e| eyre!("Proxy server failed: {}", e))
}

async fn handle(
  State(state): State<Arc<ProxyState>>,
  request: axum::extract::Request,
) -> HttpResponse {
  let (parts, body) = request.into_parts();
  let body = match read_body(body, MAX_BODY_BYTES).await {
    Ok(body) => body,
    Err(rejection) => return rejection.into_response(),
  };

  let request = intercepted_request(
    &state.origin,
    &parts.method,
    &parts.uri,
    &parts.headers,
    body,
  );

  match state.host.dispatch(&request).await {
    Ok(FetchOutcome::Respond { response, source }) => {
      debug!(url = %request.url, source = %source, "intercepted");
      into_http(response, Some(source))
    }
    Ok(FetchOutcome::Passthrough) => match state.network.fetch(&request).await {
      Ok(response) => into_http(response, None),
      Err(e) => {
        warn!(method = %request.method, url = %request.url, error = %e, "passthrough failed");
        (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
      }
    },
    Err(e) => {
      warn!(url = %request.url, error = %e, "fetch failed");
      (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
    }
  }
}

/// Buffer the request body: `413` past `limit`, `400` when the client's body
/// stream fails.
async fn read_body(body: Body, limit: usize) -> Result<Vec<u8>, (StatusCode, String)> {
  match to_bytes(body, limit).await {
    Ok(bytes) => Ok(bytes.to_vec()),
    Err(e) if exceeds_limit(&e) => Err((StatusCode::PAYLOAD_TOO_LARGE, e.to_string())),
    Err(e) => {
      debug!(error = %e, "could not read request body");
      Err((StatusCode::BAD_REQUEST, e.to_string()))
    }
  }
}

fn exceeds_limit(error: &axum::Error) -> bool {
  let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
  while let Some(e) = source {
    if e.is::<LengthLimitError>() {
      return true;
    }
    source = e.source();
  }
  false
}

/// Rewrite an incoming proxy request onto the application origin.
pub fn intercepted_request(
  origin: &Url,
  method: &Method,
  uri: &Uri,
  headers: &HeaderMap,
  body: Vec<u8>,
) -> Request {
  // Never `join`: "//host/..." would replace the origin
  let mut url = origin.clone();
  url.set_path(uri.path());
  url.set_query(uri.query());

  let mut forwarded = Vec::new();
  for (name, value) in headers {
    if is_hop_by_hop(name.as_str()) || *name == HOST || name.as_str() == "accept-encoding" {
      continue;
    }
    if let Ok(value) = value.to_str() {
      forwarded.push((name.as_str().to_string(), value.to_string()));
    }
  }

  Request {
    method: method.clone(),
    url,
    mode: request_mode(method, headers),
    headers: forwarded,
    body,
  }
}

/// `Sec-Fetch-Mode` when the client sends it; otherwise an HTML-accepting
/// GET counts as a navigation.
fn request_mode(method: &Method, headers: &HeaderMap) -> RequestMode {
  if let Some(mode) = headers
    .get("sec-fetch-mode")
    .and_then(|v| v.to_str().ok())
    .and_then(RequestMode::from_fetch_mode)
  {
    return mode;
  }

  let accepts_html = headers
    .get(ACCEPT)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|v| v.contains("text/html"));

  if *method == Method::GET && accepts_html {
    RequestMode::Navigate
  } else {
    RequestMode::SameOrigin
  }
}

fn is_hop_by_hop(name: &str) -> bool {
  HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

pub fn into_http(response: Response, source: Option<ResponseSource>) -> HttpResponse {
  let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
  let mut http = HttpResponse::new(Body::from(response.body));
  *http.status_mut() = status;

  let headers = http.headers_mut();
  for (name, value) in &response.headers {
    if is_hop_by_hop(name) {
      continue;
    }
    if let (Ok(name), Ok(value)) = (
      HeaderName::from_bytes(name.as_bytes()),
      HeaderValue::from_str(value),
    ) {
      headers.append(name, value);
    }
  }
  if let Some(source) = source {
    headers.insert(
      HeaderName::from_static(SOURCE_HEADER),
      HeaderValue::from_static(source.as_str()),
    );
  }

  http
}
