//! Student-facing HTTP handlers: entry resolution, joining, submitting and waiting.
//! Thin wrappers over `StudentFlow` and the partition's `SessionStore`.

use std::{sync::Arc, time::Duration};
use axum::{extract::{Path, Query, State}, Json};
use tracing::{debug, info, instrument};

use crate::controller::{resolve_entry, share_link, Entry, EntryQuery, StatusPoller, StudentFlow, StudentStep};
use crate::domain::{FeedbackSession, Task};
use crate::error::{LaraError, Result};
use crate::feedback::FeedbackGenerator;
use crate::protocol::*;
use crate::session::{Partition, SessionStore};
use crate::state::AppState;

const DEFAULT_WAIT_MS: u64 = 25_000;
const MAX_WAIT_MS: u64 = 30_000;

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryParams {
  #[serde(default)]
  teacher_id: Option<String>,
  #[serde(flatten)]
  query: EntryQuery,
}

#[instrument(level = "info", skip(state))]
pub async fn http_health<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
) -> Json<HealthOut> {
  Json(HealthOut { ok: true, feedback_configured: state.generator.is_configured() })
}

#[instrument(level = "info", skip(state, p))]
pub async fn http_get_entry<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Query(p): Query<EntryParams>,
) -> Result<Json<Entry>> {
  let store = state.session(Partition::from_teacher(p.teacher_id.as_deref())).await?;
  let entry = resolve_entry(&p.query, &store).await?;
  Ok(Json(entry))
}

/// Task by explicit id, else by shareable code (unknown code: current task), else current.
async fn task_for(store: &SessionStore, task_id: Option<&str>, task_code: Option<&str>) -> Result<Task> {
  if let Some(id) = task_id.filter(|s| !s.trim().is_empty()) {
    return store.task(id).await.ok_or_else(|| LaraError::TaskNotFound(id.to_string()));
  }
  if let Some(code) = task_code.filter(|s| !s.trim().is_empty()) {
    if let Some(task) = store.find_task_by_code(code).await? {
      return Ok(task);
    }
    debug!(target: "lara_backend", %code, "Unknown task code; using current task");
  }
  store
    .current_task()
    .await
    .ok_or_else(|| LaraError::TaskNotFound("current".into()))
}

#[instrument(level = "info", skip(state, body), fields(name_len = body.name.len()))]
pub async fn http_join<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Query(p): Query<PartitionQuery>,
  Json(body): Json<JoinIn>,
) -> Result<Json<JoinOut>> {
  let store = state.session(p.partition()).await?;
  let task = task_for(&store, None, body.task_code.as_deref()).await?;
  let mut flow = StudentFlow::new(store, task.clone());
  let student = flow.join(&body.name).await?;
  let link = share_link(&state.base_url, task.task_code.as_deref(), Some(&student.id));
  Ok(Json(JoinOut {
    student,
    task,
    step: flow.step(),
    share_link: link,
    poll_interval_ms: state.poll_interval().as_millis() as u64,
  }))
}

/// The polled primitive: current status of one student.
#[instrument(level = "debug", skip(state, p))]
pub async fn http_student_status<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Path(id): Path<String>,
  Query(p): Query<PartitionQuery>,
) -> Result<Json<StatusOut>> {
  let store = state.session(p.partition()).await?;
  let status = store
    .get_student_status(&id)
    .await
    .ok_or_else(|| LaraError::StudentNotFound(id.clone()))?;
  Ok(Json(StatusOut { student_id: id, status, step: StudentStep::for_status(status) }))
}

/// Generate feedback for the student's text and record the submission.
/// Generation failures surface as 502 with the retry message; nothing is stored.
#[instrument(level = "info", skip(state, p, body), fields(content_len = body.content.len()))]
pub async fn http_submit<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Path(id): Path<String>,
  Query(p): Query<PartitionQuery>,
  Json(body): Json<SubmitIn>,
) -> Result<Json<SubmitOut>> {
  let store = state.session(p.partition()).await?;
  let task = task_for(&store, body.task_id.as_deref(), body.task_code.as_deref()).await?;
  let mut flow = StudentFlow::restore(store.clone(), task, &id).await?;
  flow.set_draft(body.content);
  flow.submit(&state.generator).await?;
  info!(target: "lara_backend", student_id = %id, task_id = %flow.task().id, content_len = flow.draft().len(), "Submission recorded");
  Ok(Json(SubmitOut { step: flow.step(), submission: store.submission(&id).await }))
}

/// Approved feedback, or `null` while the teacher has not approved yet.
#[instrument(level = "debug", skip(state, p))]
pub async fn http_student_feedback<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Path(id): Path<String>,
  Query(p): Query<PartitionQuery>,
) -> Result<Json<Option<FeedbackSession>>> {
  let store = state.session(p.partition()).await?;
  let task = task_for(&store, None, None).await?;
  let flow = StudentFlow::restore(store, task, &id).await?;
  Ok(Json(flow.approved_feedback().await))
}

#[instrument(level = "info", skip(state, p, body), fields(next_step_id = %body.next_step_id))]
pub async fn http_next_step<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Path(id): Path<String>,
  Query(p): Query<PartitionQuery>,
  Json(body): Json<NextStepIn>,
) -> Result<Json<NextStepOut>> {
  let store = state.session(p.partition()).await?;
  let task = task_for(&store, None, None).await?;
  let mut flow = StudentFlow::restore(store.clone(), task, &id).await?;
  flow.select_next_step(&body.next_step_id).await?;
  let next_step_id = flow.continue_with_selection().await?;
  let status = store
    .get_student_status(&id)
    .await
    .ok_or_else(|| LaraError::StudentNotFound(id.clone()))?;
  Ok(Json(NextStepOut { next_step_id, status }))
}

/// Long-poll: hold the request until the waiting student moves on or the timeout passes.
#[instrument(level = "info", skip(state, q), fields(timeout_ms = ?q.timeout_ms))]
pub async fn http_wait_for_feedback<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Path(id): Path<String>,
  Query(q): Query<WaitQuery>,
) -> Result<Json<StatusOut>> {
  let store = state.session(Partition::from_teacher(q.teacher_id.as_deref())).await?;
  let task = task_for(&store, None, None).await?;
  let mut flow = StudentFlow::restore(store.clone(), task, &id).await?;

  if flow.step() == StudentStep::Waiting {
    let poller = StatusPoller::spawn(store.clone(), id.clone(), state.poll_interval());
    let mut rx = poller.subscribe();
    let limit = Duration::from_millis(q.timeout_ms.unwrap_or(DEFAULT_WAIT_MS).min(MAX_WAIT_MS));
    let released = tokio::time::timeout(limit, async {
      while rx.changed().await.is_ok() {
        let seen = *rx.borrow_and_update();
        if flow.observe(seen) != StudentStep::Waiting {
          return true;
        }
      }
      false
    })
    .await
    .unwrap_or(false);
    poller.stop();
    debug!(target: "lara_backend", student_id = %id, polls = poller.ticks(), released, "Wait finished");
  }

  let status = store
    .get_student_status(&id)
    .await
    .ok_or_else(|| LaraError::StudentNotFound(id.clone()))?;
  Ok(Json(StatusOut { student_id: id, status, step: flow.step() }))
}
