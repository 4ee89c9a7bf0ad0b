//! Planner API handlers. These are thin wrappers that lock the session and forward to the controller.
//! Each handler is instrumented and logs the session id and basic result info.

use std::sync::Arc;

use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use chrono::{Local, NaiveDateTime};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::protocol::*;
use crate::state::{AppState, SharedSession};

fn now() -> NaiveDateTime {
  Local::now().naive_local()
}

fn unknown_session() -> Response {
  (StatusCode::NOT_FOUND, Json(ErrorOut { error: "Unknown session" })).into_response()
}

fn conflict(error: &'static str) -> Response {
  (StatusCode::CONFLICT, Json(ErrorOut { error })).into_response()
}

async fn lookup(state: &AppState, id: &Uuid) -> Result<SharedSession, Response> {
  state.session(id).await.ok_or_else(unknown_session)
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_create_session(State(state): State<Arc<AppState>>) -> Result<Json<SessionView>, Response> {
  let (_, session) = state.create_session().await.map_err(|e| {
    error!(target: "session", error = %e, "Could not open local record");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorOut { error: "Could not create session" })).into_response()
  })?;
  let mut s = session.lock().await;
  s.sync().await;
  Ok(Json(s.view()))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, Response> {
  let session = lookup(&state, &id).await?;
  let mut s = session.lock().await;
  s.sync().await;
  Ok(Json(s.view()))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
  if state.close_session(&id).await {
    StatusCode::NO_CONTENT.into_response()
  } else {
    unknown_session()
  }
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_guest(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, Response> {
  let session = lookup(&state, &id).await?;
  let mut s = session.lock().await;
  s.continue_as_guest().await;
  Ok(Json(s.view()))
}

#[instrument(level = "info", skip(state, body), fields(email = %body.email))]
pub async fn http_post_signup(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
  Json(body): Json<CredentialsIn>,
) -> Result<Json<SessionView>, Response> {
  let session = lookup(&state, &id).await?;
  let mut s = session.lock().await;
  s.sign_up(&body.email, &body.password).await;
  Ok(Json(s.view()))
}

#[instrument(level = "info", skip(state, body), fields(email = %body.email))]
pub async fn http_post_login(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
  Json(body): Json<CredentialsIn>,
) -> Result<Json<SessionView>, Response> {
  let session = lookup(&state, &id).await?;
  let mut s = session.lock().await;
  s.sign_in(&body.email, &body.password).await;
  Ok(Json(s.view()))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_logout(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, Response> {
  let session = lookup(&state, &id).await?;
  let mut s = session.lock().await;
  s.sign_out().await;
  Ok(Json(s.view()))
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_post_plan(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
  Json(body): Json<MonthsIn>,
) -> Result<Json<SessionView>, Response> {
  let session = lookup(&state, &id).await?;
  let mut s = session.lock().await;
  s.submit_months(&body.as_input()).await;
  let view = s.view();
  info!(target: "planner", session = %id, months = ?view.summary.map(|x| x.months), "Plan request handled");
  Ok(Json(view))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_reset(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, Response> {
  let session = lookup(&state, &id).await?;
  let mut s = session.lock().await;
  s.reset_plan().await;
  Ok(Json(s.view()))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_start(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, Response> {
  let session = lookup(&state, &id).await?;
  let mut s = session.lock().await;
  s.start(now()).await;
  Ok(Json(s.view()))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_daily(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> Result<Json<DailyOut>, Response> {
  let session = lookup(&state, &id).await?;
  let mut s = session.lock().await;
  s.daily(now()).await.map(Json).ok_or_else(|| conflict("No active plan"))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_quiz(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
) -> Result<Json<QuizOut>, Response> {
  let session = lookup(&state, &id).await?;
  let mut s = session.lock().await;
  s.quiz(now()).await.map(Json).ok_or_else(|| conflict("No study day in progress"))
}

#[instrument(level = "info", skip(state, body), fields(answers = body.selections.len()))]
pub async fn http_post_quiz(
  State(state): State<Arc<AppState>>,
  Path(id): Path<Uuid>,
  Json(body): Json<QuizSubmitIn>,
) -> Result<Json<QuizResultOut>, Response> {
  let session = lookup(&state, &id).await?;
  let mut s = session.lock().await;
  let out = s.submit_quiz(&body.selections).await.ok_or_else(|| conflict("No quiz in progress"))?;
  info!(target: "quiz", session = %id, score = out.outcome.score, total = out.outcome.total, "Quiz submitted");
  Ok(Json(out))
}
