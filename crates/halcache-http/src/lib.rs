//! `halcache-http`: the reqwest-backed [`Transport`].
//!
//! Any HTTP response is a [`RawResponse`], whatever its status. Only
//! connection failures, timeouts and unreadable success bodies are errors.

pub mod error;

use std::time::Duration;

use async_trait::async_trait;
use halcache_core::{
  Error as CoreError,
  request::{RestRequest, RestRequestMethod},
  service::{RawResponse, Transport},
};
use reqwest::{Client, Method, header};
use serde_json::Value;
use tracing::{debug, warn};

pub use error::{Error, Result};

const JSON: &str = "application/json";

/// Executes requests against a HAL REST API over HTTP.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpTransport {
  client: Client,
}

impl HttpTransport {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client })
  }

  /// Wrap an already configured client.
  pub fn with_client(client: Client) -> Self { Self { client } }
}

fn method(method: RestRequestMethod) -> Method {
  match method {
    RestRequestMethod::Get => Method::GET,
    RestRequestMethod::Post => Method::POST,
    RestRequestMethod::Put => Method::PUT,
    RestRequestMethod::Patch => Method::PATCH,
    RestRequestMethod::Delete => Method::DELETE,
    RestRequestMethod::Head => Method::HEAD,
    RestRequestMethod::Options => Method::OPTIONS,
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn execute(&self, request: &RestRequest) -> halcache_core::Result<RawResponse> {
    let mut builder = self
      .client
      .request(method(request.method), &request.href)
      .header(header::ACCEPT, JSON);
    if let Some(body) = &request.body {
      let content_type = request.content_type.as_deref().unwrap_or(JSON);
      let bytes =
        serde_json::to_vec(body).map_err(|e| CoreError::Serialization(e.to_string()))?;
      builder = builder.header(header::CONTENT_TYPE, content_type).body(bytes);
    }

    let response = builder.send().await.map_err(|e| {
      warn!(href = %request.href, "request failed: {e}");
      CoreError::Transport(e.to_string())
    })?;
    let status = response.status();
    let bytes = response
      .bytes()
      .await
      .map_err(|e| CoreError::Transport(e.to_string()))?;
    debug!(method = request.method.as_str(), href = %request.href, %status, "response");

    let body = if bytes.is_empty() {
      None
    } else {
      match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => Some(value),
        Err(e) if status.is_success() => {
          return Err(CoreError::Serialization(format!("{}: {e}", request.href)));
        }
        // Error pages are often not JSON; the status still counts.
        Err(_) => None,
      }
    };
    Ok(RawResponse { status: status.as_u16(), body })
  }
}

#[cfg(test)]
mod tests;
