//! Teacher dashboard handlers: tasks, review queue, approvals and the class overview.

use std::{collections::BTreeMap, sync::Arc};
use axum::{extract::{Path, Query, State}, Json};
use tracing::{info, instrument, warn};

use crate::domain::{FeedbackSession, Submission};
use crate::error::{LaraError, Result};
use crate::feedback::FeedbackGenerator;
use crate::protocol::*;
use crate::session::{ClassOverview, NewTask, SessionState, TaskProgress};
use crate::state::AppState;

#[instrument(level = "debug", skip(state, p))]
pub async fn http_list_tasks<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Query(p): Query<PartitionQuery>,
) -> Result<Json<TasksOut>> {
  let snapshot = state.session(p.partition()).await?.snapshot().await;
  Ok(Json(TasksOut {
    tasks: snapshot.tasks.into_iter().map(TaskOut::from).collect(),
    current_task_id: snapshot.current_task_id,
  }))
}

/// Blank criteria lines from the form are dropped before the task is stored.
#[instrument(level = "info", skip(state, p, body), fields(title = %body.title))]
pub async fn http_create_task<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Query(p): Query<PartitionQuery>,
  Json(mut body): Json<NewTask>,
) -> Result<Json<TaskOut>> {
  if body.title.trim().is_empty() || body.prompt.trim().is_empty() {
    return Err(LaraError::invalid_input("task", "title and prompt are required"));
  }
  body.success_criteria = body
    .success_criteria
    .into_iter()
    .map(|c| c.trim().to_string())
    .filter(|c| !c.is_empty())
    .collect();
  let task = state.session(p.partition()).await?.create_task(body).await?;
  Ok(Json(TaskOut::from(task)))
}

#[instrument(level = "info", skip(state, p))]
pub async fn http_select_task<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Path(id): Path<String>,
  Query(p): Query<PartitionQuery>,
) -> Result<Json<OkOut>> {
  let store = state.session(p.partition()).await?;
  if store.task(&id).await.is_none() {
    warn!(target: "session", task_id = %id, "Selecting a task id that is not in the list");
  }
  store.select_task(&id).await?;
  Ok(Json(OkOut { ok: true }))
}

#[instrument(level = "debug", skip(state, p))]
pub async fn http_task_progress<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Query(p): Query<PartitionQuery>,
) -> Result<Json<Vec<TaskProgress>>> {
  Ok(Json(state.session(p.partition()).await?.task_progress().await))
}

#[instrument(level = "info", skip(state, p))]
pub async fn http_task_by_code<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Path(code): Path<String>,
  Query(p): Query<PartitionQuery>,
) -> Result<Json<TaskOut>> {
  let store = state.session(p.partition()).await?;
  match store.find_task_by_code(&code).await? {
    Some(task) => Ok(Json(TaskOut::from(task))),
    None => Err(LaraError::TaskNotFound(code)),
  }
}

/// Code -> task id mappings of the partition.
#[instrument(level = "debug", skip(state, p))]
pub async fn http_task_codes<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Query(p): Query<PartitionQuery>,
) -> Result<Json<BTreeMap<String, String>>> {
  let store = state.session(p.partition()).await?;
  Ok(Json(store.codes().all_codes(store.partition())?))
}

#[instrument(level = "debug", skip(state, p))]
pub async fn http_list_students<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Query(p): Query<PartitionQuery>,
) -> Result<Json<StudentsOut>> {
  let snapshot = state.session(p.partition()).await?.snapshot().await;
  Ok(Json(StudentsOut { students: snapshot.students }))
}

#[instrument(level = "debug", skip(state, p))]
pub async fn http_get_submission<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Path(id): Path<String>,
  Query(p): Query<PartitionQuery>,
) -> Result<Json<Submission>> {
  let store = state.session(p.partition()).await?;
  store
    .submission(&id)
    .await
    .map(Json)
    .ok_or(LaraError::SubmissionNotFound(id))
}

#[instrument(level = "info", skip(state, p))]
pub async fn http_approve<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Path(id): Path<String>,
  Query(p): Query<PartitionQuery>,
) -> Result<Json<OkOut>> {
  state.session(p.partition()).await?.approve_feedback(&id).await?;
  Ok(Json(OkOut { ok: true }))
}

/// Teacher edits to the generated feedback before approval.
#[instrument(level = "info", skip(state, p, body), fields(next_steps = body.next_steps.len()))]
pub async fn http_update_feedback<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Path(id): Path<String>,
  Query(p): Query<PartitionQuery>,
  Json(body): Json<FeedbackSession>,
) -> Result<Json<OkOut>> {
  state.session(p.partition()).await?.update_feedback(&id, body).await?;
  Ok(Json(OkOut { ok: true }))
}

#[instrument(level = "debug", skip(state, p))]
pub async fn http_overview<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Query(p): Query<PartitionQuery>,
) -> Result<Json<ClassOverview>> {
  Ok(Json(state.session(p.partition()).await?.class_overview().await))
}

#[instrument(level = "debug", skip(state, p))]
pub async fn http_get_state<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Query(p): Query<PartitionQuery>,
) -> Result<Json<SessionState>> {
  Ok(Json(state.session(p.partition()).await?.snapshot().await))
}

#[instrument(level = "info", skip(state, p))]
pub async fn http_reset_state<G: FeedbackGenerator + 'static>(
  State(state): State<Arc<AppState<G>>>,
  Query(p): Query<PartitionQuery>,
) -> Result<Json<OkOut>> {
  let partition = p.partition();
  state.session(partition.clone()).await?.reset().await?;
  info!(target: "lara_backend", partition = %partition.key(), "Partition reset over HTTP");
  Ok(Json(OkOut { ok: true }))
}
