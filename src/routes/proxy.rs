//! `/api/grok-proxy`: forwards a chat-completion request to the model provider
//! with the server-held credential and passes the provider's answer straight back.

use std::sync::Arc;

use axum::{
  body::{Body, Bytes},
  extract::State,
  http::{header::CONTENT_TYPE, Method, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use tracing::{error, info, instrument, warn};

use crate::protocol::ErrorOut;
use crate::state::AppState;

fn proxy_error() -> Response {
  (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorOut { error: "Proxy error" })).into_response()
}

#[instrument(level = "info", skip(state, body), fields(body_len = body.len()))]
pub async fn grok_proxy(State(state): State<Arc<AppState>>, method: Method, body: Bytes) -> Response {
  if method != Method::POST {
    warn!(target: "proxy", %method, "Rejected non-POST proxy request");
    return (StatusCode::METHOD_NOT_ALLOWED, Json(ErrorOut { error: "Method not allowed" })).into_response();
  }

  let reply = match state.upstream.forward(body).await {
    Ok(r) => r,
    Err(e) => {
      error!(target: "proxy", error = %e, "Upstream unreachable");
      return proxy_error();
    }
  };

  // Upstream statuses pass through; only a body that is not JSON counts as a proxy failure.
  if let Err(e) = serde_json::from_slice::<serde_json::Value>(&reply.body) {
    error!(target: "proxy", status = reply.status, error = %e, "Upstream body is not JSON");
    return proxy_error();
  }
  let status = match StatusCode::from_u16(reply.status) {
    Ok(s) => s,
    Err(_) => return proxy_error(),
  };
  info!(target: "proxy", %status, resp_len = reply.body.len(), "Proxied");

  Response::builder()
    .status(status)
    .header(CONTENT_TYPE, "application/json")
    .body(Body::from(reply.body))
    .unwrap_or_else(|_| proxy_error())
}
