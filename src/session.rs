//! Session state: the per-partition container of tasks, students and submissions.
//!
//! This module owns:
//!   - `Partition` (one per teacher id, plus the shared demo scope)
//!   - `SessionState` (the persisted blob)
//!   - `SessionStore`, the only sanctioned way to change that state
//!
//! Every mutation goes through `SessionStore::commit`, which applies the change
//! under the write lock and then persists the full snapshot. Persistence is
//! whole-blob and last-writer-wins.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{FeedbackSession, Student, StudentStatus, Submission, Task};
use crate::error::{LaraError, Result};
use crate::storage::{read_json, write_json, BlobStore};
use crate::task_codes::{self, TaskCodeRegistry};
use crate::util::now_millis;

pub const DEFAULT_TASK_ID: &str = "default-task";
const DEMO_KEY: &str = "demo";

/// Isolated storage scope.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Partition {
    Demo,
    Teacher(String),
}

impl Partition {
    /// A missing or blank teacher id selects the demo partition. So does the
    /// literal `demo`, which would otherwise share the demo storage keys.
    pub fn from_teacher(teacher_id: Option<&str>) -> Self {
        match teacher_id.map(str::trim) {
            Some(id) if !id.is_empty() && id != DEMO_KEY => Self::Teacher(id.to_string()),
            _ => Self::Demo,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Demo => DEMO_KEY,
            Self::Teacher(id) => id,
        }
    }

    fn state_key(&self) -> String {
        format!("lara-store-v2-{}", self.key())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub tasks: Vec<Task>,
    pub students: Vec<Student>,
    pub submissions: BTreeMap<String, Submission>,
    pub current_task_id: String,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            tasks: vec![default_task()],
            students: Vec::new(),
            submissions: BTreeMap::new(),
            current_task_id: DEFAULT_TASK_ID.to_string(),
        }
    }
}

fn default_task() -> Task {
    Task {
        id: DEFAULT_TASK_ID.to_string(),
        title: "Creative Writing 101: The Forest".into(),
        prompt: "Write a descriptive paragraph about walking through a mysterious forest. \
                 Focus on sensory details (sight, sound, smell)."
            .into(),
        success_criteria: vec![
            "Include at least 3 distinct sensory details".into(),
            "Use strong adjectives".into(),
            "Create a clear mood or atmosphere".into(),
        ],
        universal_expectations: true,
        task_code: None,
    }
}

impl SessionState {
    fn student_mut(&mut self, student_id: &str) -> Result<&mut Student> {
        self.students
            .iter_mut()
            .find(|s| s.id == student_id)
            .ok_or_else(|| LaraError::StudentNotFound(student_id.to_string()))
    }

    fn task_codes(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().filter_map(|t| t.task_code.as_deref())
    }
}

/// Referential checks over a state snapshot. Returns one line per violation.
pub fn check_invariants(state: &SessionState) -> Vec<String> {
    let mut problems = Vec::new();
    for (key, sub) in &state.submissions {
        if key != &sub.student_id {
            problems.push(format!("submission keyed by {key} belongs to {}", sub.student_id));
        }
        if !state.students.iter().any(|s| s.id == sub.student_id) {
            problems.push(format!("submission for unknown student {}", sub.student_id));
        }
    }
    for s in &state.students {
        if s.status.requires_submission() && !state.submissions.contains_key(&s.id) {
            problems.push(format!(
                "student {} is {} without a submission",
                s.id,
                s.status.as_str()
            ));
        }
    }
    problems
}

/// Task as submitted by the teacher form. Id and code are filled in when absent.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub prompt: String,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub universal_expectations: bool,
    #[serde(default)]
    pub task_code: Option<String>,
}

/// Per-task counts shown on the teacher's task list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub task_id: String,
    pub title: String,
    pub task_code: Option<String>,
    pub total: usize,
    pub pending_review: usize,
    pub feedback_ready: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassOverview {
    pub total_students: usize,
    pub active_students: usize,
    pub awaiting_review: usize,
}

/// Cheap-to-clone handle over one partition's state.
#[derive(Clone)]
pub struct SessionStore {
    partition: Partition,
    blobs: Arc<dyn BlobStore>,
    codes: TaskCodeRegistry,
    state: Arc<RwLock<SessionState>>,
}

impl SessionStore {
    /// Load the partition blob, or start from the initial state when there is none.
    #[instrument(level = "info", skip(blobs), fields(partition = %partition.key()))]
    pub fn open(partition: Partition, blobs: Arc<dyn BlobStore>) -> Result<Self> {
        let loaded: Option<SessionState> = read_json(blobs.as_ref(), &partition.state_key())?;
        let state = match loaded {
            Some(s) => {
                info!(target: "session", tasks = s.tasks.len(), students = s.students.len(), "Loaded session state");
                s
            }
            None => SessionState::default(),
        };
        for problem in check_invariants(&state) {
            warn!(target: "session", %problem, "Stored session state is inconsistent");
        }
        Ok(Self {
            codes: TaskCodeRegistry::new(blobs.clone()),
            partition,
            blobs,
            state: Arc::new(RwLock::new(state)),
        })
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn codes(&self) -> &TaskCodeRegistry {
        &self.codes
    }

    /// Apply `f` and persist the result. `f` must not mutate before it can fail.
    async fn commit<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut SessionState) -> Result<T>,
    {
        let mut state = self.state.write().await;
        let out = f(&mut state)?;
        write_json(self.blobs.as_ref(), &self.partition.state_key(), &*state)?;
        debug!(target: "session", partition = %self.partition.key(), %op, "state committed");
        Ok(out)
    }

    #[instrument(level = "info", skip(self, new_task), fields(partition = %self.partition.key(), title = %new_task.title))]
    pub async fn create_task(&self, new_task: NewTask) -> Result<Task> {
        let requested_code = match new_task.task_code.as_deref() {
            Some(code) => {
                let code = task_codes::normalize(code);
                if !task_codes::is_valid_format(&code) {
                    return Err(LaraError::invalid_input(
                        "taskCode",
                        "must be 6 letters or digits",
                    ));
                }
                Some(code)
            }
            None => None,
        };

        let partition = self.partition.clone();
        let codes = self.codes.clone();
        let task = self
            .commit("create_task", move |state| {
                let mut existing: HashSet<String> =
                    codes.all_codes(&partition)?.into_keys().collect();
                existing.extend(state.task_codes().map(str::to_string));
                let code = match requested_code {
                    Some(code) if existing.contains(&code) => {
                        return Err(LaraError::invalid_input("taskCode", "already in use"));
                    }
                    Some(code) => code,
                    None => task_codes::generate_unique(&existing, &mut rand::thread_rng()),
                };
                let task = Task {
                    id: new_task
                        .id
                        .filter(|id| !id.trim().is_empty())
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    title: new_task.title,
                    prompt: new_task.prompt,
                    success_criteria: new_task.success_criteria,
                    universal_expectations: new_task.universal_expectations,
                    task_code: Some(code.clone()),
                };
                codes.save_mapping(&partition, &code, &task.id)?;
                state.tasks.insert(0, task.clone());
                state.current_task_id = task.id.clone();
                Ok(task)
            })
            .await?;
        info!(target: "session", task_id = %task.id, task_code = ?task.task_code, "Task created");
        Ok(task)
    }

    #[instrument(level = "info", skip(self, name), fields(partition = %self.partition.key(), name_len = name.len()))]
    pub async fn add_student(&self, name: &str) -> Result<Student> {
        let student = Student {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: StudentStatus::Active,
            joined_at: now_millis(),
        };
        let added = student.clone();
        self.commit("add_student", move |state| {
            state.students.push(added);
            Ok(())
        })
        .await?;
        info!(target: "session", student_id = %student.id, "Student joined");
        Ok(student)
    }

    /// Mark the student submitted and write (or overwrite) their submission.
    #[instrument(level = "info", skip(self, content, feedback), fields(partition = %self.partition.key(), content_len = content.len()))]
    pub async fn submit_work(
        &self,
        student_id: &str,
        task_id: &str,
        content: &str,
        feedback: FeedbackSession,
    ) -> Result<Submission> {
        let submission = Submission {
            student_id: student_id.to_string(),
            task_id: task_id.to_string(),
            content: content.to_string(),
            feedback: Some(feedback),
            timestamp: now_millis(),
        };
        let stored = submission.clone();
        self.commit("submit_work", move |state| {
            state.student_mut(&stored.student_id)?.status = StudentStatus::Submitted;
            state.submissions.insert(stored.student_id.clone(), stored);
            Ok(())
        })
        .await?;
        info!(target: "session", %student_id, %task_id, "Work submitted");
        Ok(submission)
    }

    /// Release feedback to the student. A missing submission is not rejected.
    #[instrument(level = "info", skip(self), fields(partition = %self.partition.key()))]
    pub async fn approve_feedback(&self, student_id: &str) -> Result<()> {
        self.commit("approve_feedback", |state| {
            let has_feedback = state
                .submissions
                .get(student_id)
                .is_some_and(|s| s.feedback.is_some());
            state.student_mut(student_id)?.status = StudentStatus::FeedbackReady;
            if !has_feedback {
                warn!(target: "session", %student_id, "Approved a student without submitted feedback");
            }
            Ok(())
        })
        .await?;
        info!(target: "session", %student_id, "Feedback approved");
        Ok(())
    }

    /// Replace the feedback of an existing submission; status is left alone.
    #[instrument(level = "info", skip(self, feedback), fields(partition = %self.partition.key()))]
    pub async fn update_feedback(&self, student_id: &str, feedback: FeedbackSession) -> Result<()> {
        self.commit("update_feedback", |state| {
            let sub = state
                .submissions
                .get_mut(student_id)
                .ok_or_else(|| LaraError::SubmissionNotFound(student_id.to_string()))?;
            sub.feedback = Some(feedback);
            Ok(())
        })
        .await
    }

    /// Student picked a next step after reading approved feedback.
    #[instrument(level = "info", skip(self), fields(partition = %self.partition.key()))]
    pub async fn begin_revision(&self, student_id: &str) -> Result<()> {
        self.commit("begin_revision", |state| {
            let student = state.student_mut(student_id)?;
            if !student.status.feedback_visible() {
                return Err(LaraError::invalid_input(
                    "status",
                    format!("cannot revise while {}", student.status.as_str()),
                ));
            }
            student.status = StudentStatus::Revising;
            Ok(())
        })
        .await
    }

    /// Pointer change only; the id is not checked against the task list.
    #[instrument(level = "info", skip(self), fields(partition = %self.partition.key()))]
    pub async fn select_task(&self, task_id: &str) -> Result<()> {
        self.commit("select_task", |state| {
            state.current_task_id = task_id.to_string();
            Ok(())
        })
        .await
    }

    /// Drop the partition's persisted state and code mappings. Irreversible.
    #[instrument(level = "info", skip(self), fields(partition = %self.partition.key()))]
    pub async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        self.blobs.remove(&self.partition.state_key())?;
        self.codes.clear(&self.partition)?;
        *state = SessionState::default();
        warn!(target: "session", partition = %self.partition.key(), "Session state reset");
        Ok(())
    }

    /// The lookup polled by waiting students.
    pub async fn get_student_status(&self, student_id: &str) -> Option<StudentStatus> {
        let state = self.state.read().await;
        state
            .students
            .iter()
            .find(|s| s.id == student_id)
            .map(|s| s.status)
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn student(&self, student_id: &str) -> Option<Student> {
        let state = self.state.read().await;
        state.students.iter().find(|s| s.id == student_id).cloned()
    }

    pub async fn submission(&self, student_id: &str) -> Option<Submission> {
        self.state.read().await.submissions.get(student_id).cloned()
    }

    pub async fn task(&self, task_id: &str) -> Option<Task> {
        let state = self.state.read().await;
        state.tasks.iter().find(|t| t.id == task_id).cloned()
    }

    /// Task under the current pointer, else the first task.
    pub async fn current_task(&self) -> Option<Task> {
        let state = self.state.read().await;
        state
            .tasks
            .iter()
            .find(|t| t.id == state.current_task_id)
            .or_else(|| state.tasks.first())
            .cloned()
    }

    /// Resolve a shareable code through the partition's mapping, then the task list.
    pub async fn find_task_by_code(&self, code: &str) -> Result<Option<Task>> {
        let normalized = task_codes::normalize(code);
        let mapped = self.codes.resolve(&self.partition, &normalized)?;
        let state = self.state.read().await;
        let by_mapping = mapped.and_then(|id| state.tasks.iter().find(|t| t.id == id));
        let found = by_mapping.or_else(|| {
            state
                .tasks
                .iter()
                .find(|t| t.task_code.as_deref() == Some(normalized.as_str()))
        });
        Ok(found.cloned())
    }

    pub async fn task_progress(&self) -> Vec<TaskProgress> {
        let state = self.state.read().await;
        state
            .tasks
            .iter()
            .map(|task| {
                let statuses: Vec<StudentStatus> = state
                    .submissions
                    .values()
                    .filter(|sub| sub.task_id == task.id)
                    .filter_map(|sub| {
                        state
                            .students
                            .iter()
                            .find(|s| s.id == sub.student_id)
                            .map(|s| s.status)
                    })
                    .collect();
                TaskProgress {
                    task_id: task.id.clone(),
                    title: task.title.clone(),
                    task_code: task.task_code.clone(),
                    total: statuses.len(),
                    pending_review: statuses
                        .iter()
                        .filter(|s| **s == StudentStatus::Submitted)
                        .count(),
                    feedback_ready: statuses.iter().filter(|s| s.feedback_visible()).count(),
                }
            })
            .collect()
    }

    pub async fn class_overview(&self) -> ClassOverview {
        let state = self.state.read().await;
        ClassOverview {
            total_students: state.students.len(),
            active_students: state
                .students
                .iter()
                .filter(|s| s.status != StudentStatus::Completed)
                .count(),
            awaiting_review: state
                .students
                .iter()
                .filter(|s| s.status == StudentStatus::Submitted)
                .count(),
        }
    }
}
