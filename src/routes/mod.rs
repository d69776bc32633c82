//! Router assembly: HTTP endpoints, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::feedback::FeedbackGenerator;
use crate::state::AppState;

pub mod auth;
pub mod http;
pub mod teacher;

/// Build the application router with:
/// - student, teacher and account endpoints under `/api/v1/...`
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
///
/// Every endpoint takes an optional `teacherId` query parameter; without it the
/// request works on the shared demo partition.
pub fn build_router<G: FeedbackGenerator + 'static>(state: Arc<AppState<G>>) -> Router {
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        .route("/api/v1/health", get(http::http_health::<G>))
        .route("/api/v1/entry", get(http::http_get_entry::<G>))
        // Accounts
        .route("/api/v1/auth/signup", post(auth::http_sign_up::<G>))
        .route("/api/v1/auth/login", post(auth::http_log_in::<G>))
        .route("/api/v1/auth/logout", post(auth::http_log_out::<G>))
        .route(
            "/api/v1/auth/me",
            get(auth::http_me::<G>).patch(auth::http_update_me::<G>),
        )
        // Tasks
        .route(
            "/api/v1/tasks",
            get(teacher::http_list_tasks::<G>).post(teacher::http_create_task::<G>),
        )
        .route("/api/v1/tasks/progress", get(teacher::http_task_progress::<G>))
        .route("/api/v1/tasks/codes", get(teacher::http_task_codes::<G>))
        .route("/api/v1/tasks/by-code/:code", get(teacher::http_task_by_code::<G>))
        .route("/api/v1/tasks/:id/select", post(teacher::http_select_task::<G>))
        // Students
        .route(
            "/api/v1/students",
            get(teacher::http_list_students::<G>).post(http::http_join::<G>),
        )
        .route("/api/v1/students/:id/status", get(http::http_student_status::<G>))
        .route("/api/v1/students/:id/wait", get(http::http_wait_for_feedback::<G>))
        .route("/api/v1/students/:id/submit", post(http::http_submit::<G>))
        .route(
            "/api/v1/students/:id/feedback",
            get(http::http_student_feedback::<G>).put(teacher::http_update_feedback::<G>),
        )
        .route("/api/v1/students/:id/next-step", post(http::http_next_step::<G>))
        .route("/api/v1/students/:id/submission", get(teacher::http_get_submission::<G>))
        .route("/api/v1/students/:id/approve", post(teacher::http_approve::<G>))
        // Dashboard
        .route("/api/v1/overview", get(teacher::http_overview::<G>))
        .route(
            "/api/v1/state",
            get(teacher::http_get_state::<G>).delete(teacher::http_reset_state::<G>),
        )
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
