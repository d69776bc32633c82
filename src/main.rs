//! LARA · formative feedback backend
//!
//! - Axum HTTP API for the student flow and the teacher dashboard
//! - Feedback drafted by a hosted model, released only after teacher approval
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT               : u16 (default 3000)
//!   ANTHROPIC_API_KEY  : required for feedback generation
//!   ANTHROPIC_BASE_URL : default "https://api.anthropic.com/v1"
//!   CLAUDE_MODEL       : model id used for feedback
//!   LARA_CONFIG_PATH   : path to TOML config (prompt template + service knobs)
//!   LARA_DATA_DIR      : directory for persisted state (default ./data, ":memory:" for none)
//!   LARA_BASE_URL      : public URL used in share links
//!   LOG_LEVEL          : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT         : "pretty" (default) or "json"

mod anthropic;
mod auth;
mod config;
mod controller;
mod domain;
mod error;
mod feedback;
mod protocol;
mod routes;
mod session;
mod state;
mod storage;
mod task_codes;
mod telemetry;
mod util;

#[cfg(test)]
mod test_support;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let port = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .unwrap_or(3000);

  // Shared state: storage, identity store, model gateway, prompts.
  let state = Arc::new(AppState::from_env(port)?);

  let app = build_router(state);

  let addr = SocketAddr::from(([0, 0, 0, 0], port));
  let listener = TcpListener::bind(addr).await?;
  info!(target: "lara_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "lara_backend", error = %e, "Failed to listen for shutdown signal");
    return;
  }
  info!(target: "lara_backend", "Shutdown requested");
}
