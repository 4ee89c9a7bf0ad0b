//! Outbound leg of the content proxy: forward a chat-completion payload and
//! hand back the upstream status and body untouched.
//!
//! NOTE: the API key is never logged; only sizes, status and latency are.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum RelayError {
  /// The request never produced an upstream response (DNS, connect, timeout, TLS...).
  #[error("network error: {0}")]
  Network(String),
}

/// Raw upstream response.
#[derive(Clone, Debug)]
pub struct UpstreamReply {
  pub status: u16,
  pub body: Bytes,
}

impl UpstreamReply {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

#[async_trait]
pub trait ChatUpstream: Send + Sync {
  async fn forward(&self, body: Bytes) -> Result<UpstreamReply, RelayError>;
}

/// reqwest-backed upstream. With an API key it talks to the model provider directly;
/// without one it can point at another deployment of the proxy.
#[derive(Clone)]
pub struct HttpUpstream {
  client: reqwest::Client,
  url: String,
  api_key: Option<String>,
}

impl HttpUpstream {
  pub fn new(url: String, api_key: Option<String>) -> Result<Self, RelayError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(60))
      .build()
      .map_err(|e| RelayError::Network(e.to_string()))?;
    Ok(Self { client, url, api_key })
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn has_credential(&self) -> bool {
    self.api_key.is_some()
  }
}

#[async_trait]
impl ChatUpstream for HttpUpstream {
  #[instrument(level = "info", skip(self, body), fields(url = %self.url, body_len = body.len()))]
  async fn forward(&self, body: Bytes) -> Result<UpstreamReply, RelayError> {
    let start = Instant::now();
    let mut req = self
      .client
      .post(&self.url)
      .header(USER_AGENT, "ssc-planner/0.1")
      .header(CONTENT_TYPE, "application/json");
    if let Some(key) = &self.api_key {
      req = req.header(AUTHORIZATION, format!("Bearer {}", key));
    }

    let res = req.body(body).send().await.map_err(|e| RelayError::Network(e.to_string()))?;
    let status = res.status().as_u16();
    let body = res.bytes().await.map_err(|e| RelayError::Network(e.to_string()))?;
    info!(target: "proxy", status, elapsed = ?start.elapsed(), resp_len = body.len(), "Upstream responded");
    Ok(UpstreamReply { status, body })
  }
}
