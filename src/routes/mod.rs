//! Router assembly: content proxy, planner API, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{any, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod proxy;

/// Build the application router with:
/// - the content proxy at `/api/grok-proxy` (every method routed; non-POST answered with 405)
/// - the planner API under `/api/v1/...`
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    // Static files with SPA fallback
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        // Content proxy
        .route("/api/grok-proxy", any(proxy::grok_proxy))
        // Planner API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/sessions", post(http::http_create_session))
        .route("/api/v1/sessions/:id", get(http::http_get_session).delete(http::http_delete_session))
        .route("/api/v1/sessions/:id/guest", post(http::http_post_guest))
        .route("/api/v1/sessions/:id/signup", post(http::http_post_signup))
        .route("/api/v1/sessions/:id/login", post(http::http_post_login))
        .route("/api/v1/sessions/:id/logout", post(http::http_post_logout))
        .route("/api/v1/sessions/:id/plan", post(http::http_post_plan))
        .route("/api/v1/sessions/:id/reset", post(http::http_post_reset))
        .route("/api/v1/sessions/:id/start", post(http::http_post_start))
        .route("/api/v1/sessions/:id/daily", get(http::http_get_daily))
        .route("/api/v1/sessions/:id/quiz", get(http::http_get_quiz).post(http::http_post_quiz))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::{PlannerConfig, Settings, DEFAULT_GROK_API_URL, DEFAULT_SESSION_IDLE};
    use crate::content::testing::ScriptedUpstream;
    use crate::content::ContentClient;
    use crate::store::MemoryDocumentDb;

    /// Router over a scripted upstream; guest records live in the returned temp dir.
    pub async fn app_with(upstream: Arc<ScriptedUpstream>) -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app_in(upstream, dir.path());
        (app, dir)
    }

    /// Router and state over `data_dir`; building twice on one dir acts as a restart.
    fn app_in(upstream: Arc<ScriptedUpstream>, data_dir: &Path) -> (Router, Arc<AppState>) {
        let settings = Settings {
            port: 0,
            grok_api_key: None,
            grok_api_url: DEFAULT_GROK_API_URL.into(),
            content_proxy_url: None,
            data_dir: data_dir.to_path_buf(),
            session_idle: DEFAULT_SESSION_IDLE,
        };
        let config = Arc::new(PlannerConfig::default());
        let content = ContentClient::new(upstream.clone(), config.prompts.clone(), &config.content);
        let state = Arc::new(AppState::new(settings, config, upstream, content, Arc::new(MemoryDocumentDb::default())));
        (build_router(state.clone()), state)
    }

    pub async fn body_json(res: Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        (status, body_json(res).await)
    }

    #[tokio::test]
    async fn health() {
        let up = Arc::new(ScriptedUpstream::new(vec![ScriptedUpstream::completion("ok")]));
        let (app, _dir) = app_with(up).await;
        let (status, body) = call(&app, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn guest_session_over_http() {
        let up = Arc::new(ScriptedUpstream::new(vec![ScriptedUpstream::completion(
            r#"{"title":"Day notes","content":"..."}"#,
        )]));
        let (app, _dir) = app_with(up).await;

        let (_, view) = call(&app, "POST", "/api/v1/sessions", None).await;
        assert_eq!(view["state"], "signed_out");
        assert_eq!(view["screens"], json!(["auth"]));
        let id = view["sessionId"].as_str().unwrap().to_string();

        let (_, view) = call(&app, "POST", &format!("/api/v1/sessions/{id}/guest"), None).await;
        assert_eq!(view["screens"], json!(["plan_input"]));

        let (_, view) = call(&app, "POST", &format!("/api/v1/sessions/{id}/plan"), Some(json!({ "months": "abc" }))).await;
        assert_eq!(view["message"], "Please enter a valid number of months (1 or more).");
        assert_eq!(view["screens"], json!(["plan_input"]));

        let (_, view) = call(&app, "POST", &format!("/api/v1/sessions/{id}/plan"), Some(json!({ "months": 1 }))).await;
        assert_eq!(view["screens"], json!(["plan_summary"]));
        assert_eq!(view["summary"]["prep_days"], 24);
        assert_eq!(view["plan"].as_array().unwrap().len(), 30);

        let (status, _) = call(&app, "GET", &format!("/api/v1/sessions/{id}/daily"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, view) = call(&app, "POST", &format!("/api/v1/sessions/{id}/start"), None).await;
        assert_eq!(view["screens"], json!(["daily"]));

        let (status, daily) = call(&app, "GET", &format!("/api/v1/sessions/{id}/daily"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(daily["status"], "day");
        assert_eq!(daily["number"], 1);
        assert_eq!(daily["title"], "Day notes");
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let up = Arc::new(ScriptedUpstream::new(vec![ScriptedUpstream::completion("ok")]));
        let (app, _dir) = app_with(up).await;
        let uri = format!("/api/v1/sessions/{}", uuid::Uuid::new_v4());
        let (status, body) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "Unknown session" }));
    }

    #[tokio::test]
    async fn guest_session_survives_restart() {
        let up = Arc::new(ScriptedUpstream::new(vec![ScriptedUpstream::completion("ok")]));
        let dir = tempfile::tempdir().unwrap();

        let (app, _) = app_in(up.clone(), dir.path());
        let (_, view) = call(&app, "POST", "/api/v1/sessions", None).await;
        let id = view["sessionId"].as_str().unwrap().to_string();
        call(&app, "POST", &format!("/api/v1/sessions/{id}/guest"), None).await;
        call(&app, "POST", &format!("/api/v1/sessions/{id}/plan"), Some(json!({ "months": 2 }))).await;
        drop(app);

        let (app, _) = app_in(up, dir.path());
        let (status, view) = call(&app, "GET", &format!("/api/v1/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["state"], "signed_out");

        let (_, view) = call(&app, "POST", &format!("/api/v1/sessions/{id}/guest"), None).await;
        assert_eq!(view["screens"], json!(["plan_summary"]));
        assert_eq!(view["summary"]["months"], 2);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_and_reopen_from_disk() {
        let up = Arc::new(ScriptedUpstream::new(vec![ScriptedUpstream::completion("ok")]));
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app_in(up, dir.path());

        let (_, view) = call(&app, "POST", "/api/v1/sessions", None).await;
        let kept = view["sessionId"].as_str().unwrap().to_string();
        call(&app, "POST", &format!("/api/v1/sessions/{kept}/guest"), None).await;
        call(&app, "POST", &format!("/api/v1/sessions/{kept}/plan"), Some(json!({ "months": 1 }))).await;
        // Never wrote anything, so nothing to reopen.
        let (_, view) = call(&app, "POST", "/api/v1/sessions", None).await;
        let blank = view["sessionId"].as_str().unwrap().to_string();
        assert_eq!(state.live_sessions().await, 2);

        assert_eq!(state.evict_idle(Duration::from_secs(3600)).await, 0);
        assert_eq!(state.evict_idle(Duration::ZERO).await, 2);
        assert_eq!(state.live_sessions().await, 0);

        let (status, _) = call(&app, "GET", &format!("/api/v1/sessions/{blank}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "GET", &format!("/api/v1/sessions/{kept}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.live_sessions().await, 1);
    }

    #[tokio::test]
    async fn delete_drops_the_session() {
        let up = Arc::new(ScriptedUpstream::new(vec![ScriptedUpstream::completion("ok")]));
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app_in(up, dir.path());
        let (_, view) = call(&app, "POST", "/api/v1/sessions", None).await;
        let id = view["sessionId"].as_str().unwrap().to_string();

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/api/v1/sessions/{id}"))
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.live_sessions().await, 0);

        let (status, _) = call(&app, "GET", &format!("/api/v1/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
