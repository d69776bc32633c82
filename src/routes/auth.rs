//! Teacher account endpoints. Credentials never appear in spans.

use std::sync::Arc;
use axum::{extract::State, Json};
use tracing::{debug, instrument};

use crate::auth::ProfileUpdate;
use crate::error::Result;
use crate::feedback::FeedbackGenerator;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
pub async fn http_sign_up<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Json(body): Json<SignUpIn>,
) -> Result<Json<TeacherOut>> {
  let teacher = state.identity.sign_up(&body.email, &body.password, &body.name)?;
  Ok(Json(TeacherOut { teacher: Some(teacher) }))
}

#[instrument(level = "info", skip_all)]
pub async fn http_log_in<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Json(body): Json<LogInIn>,
) -> Result<Json<TeacherOut>> {
  let teacher = state.identity.log_in(&body.email, &body.password)?;
  Ok(Json(TeacherOut { teacher: Some(teacher) }))
}

#[instrument(level = "info", skip_all)]
pub async fn http_log_out<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
) -> Result<Json<OkOut>> {
  if !state.identity.is_logged_in()? {
    debug!(target: "auth", "Logout without an active session");
  }
  state.identity.log_out()?;
  Ok(Json(OkOut { ok: true }))
}

#[instrument(level = "debug", skip_all)]
pub async fn http_me<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
) -> Result<Json<TeacherOut>> {
  Ok(Json(TeacherOut { teacher: state.identity.current_teacher()? }))
}

#[instrument(level = "info", skip_all)]
pub async fn http_update_me<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Json(body): Json<ProfileUpdate>,
) -> Result<Json<TeacherOut>> {
  let teacher = state.identity.update_profile(body)?;
  Ok(Json(TeacherOut { teacher: Some(teacher) }))
}
