//! SSC Planner · study planner backend
//!
//! - Axum HTTP API: planner sessions (guest or signed in), daily notes, quizzes
//! - `/api/grok-proxy`: chat-completion relay holding the provider credential
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   GROK_API_KEY        : bearer credential added to proxied requests
//!   GROK_API_URL        : default "https://api.x.ai/v1/chat/completions"
//!   CONTENT_PROXY_URL   : send daily/quiz generation to a remote proxy instead
//!   DATA_DIR            : guest records live under DATA_DIR/local (default ./data)
//!   SESSION_IDLE_SECS   : idle sessions are dropped from memory after this (default 86400)
//!   PLANNER_CONFIG_PATH : path to TOML config (topics, content options, prompts)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

mod auth;
mod config;
mod content;
mod daily;
mod domain;
mod planner;
mod protocol;
mod quiz;
mod relay;
mod routes;
mod session;
mod state;
mod store;
mod telemetry;
mod util;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared state: proxy upstream, content client, identity, stores.
  let state = Arc::new(AppState::from_env()?);
  let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
  let _sweeper = state.spawn_idle_sweeper();

  let app = build_router(state);

  let listener = TcpListener::bind(addr).await?;
  info!(target: "ssc_planner", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: "ssc_planner", error = %e, "Could not listen for shutdown signal");
      }
      info!(target: "ssc_planner", "Shutting down");
    })
    .await?;
  Ok(())
}
