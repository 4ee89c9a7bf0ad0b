//! Telemetry initialization (tracing/tracing-subscriber).
//!
//! Behavior:
//! - LOG_LEVEL controls the filter (e.g. "debug" or detailed directives like
//!   "info,planner=debug,quiz=debug,proxy=info,tower_http=info").
//! - LOG_FORMAT selects "pretty" (default) or "json" structured logs.
//!
//! Tower HTTP TraceLayer still adds per-request spans; this complements it.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,ssc_planner=debug,planner=debug,quiz=debug,session=info,proxy=info,store=info,tower_http=info,axum=info";

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    // Choose JSON vs pretty; the two builders have different types.
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => {
            builder.json().init();
        }
        _ => {
            builder.init();
        }
    }
}
