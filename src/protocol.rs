//! Public request/response structs for the HTTP API (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::controller::StudentStep;
use crate::domain::{Student, StudentStatus, Submission, Task, Teacher};
use crate::session::Partition;

/// `?teacherId=` selects a teacher partition; absent means the shared demo partition.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionQuery {
    #[serde(default)]
    pub teacher_id: Option<String>,
}

impl PartitionQuery {
    pub fn partition(&self) -> Partition {
        Partition::from_teacher(self.teacher_id.as_deref())
    }
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    #[serde(rename = "feedbackConfigured")]
    pub feedback_configured: bool,
}

//
// Auth
//

#[derive(Deserialize)]
pub struct SignUpIn {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct LogInIn {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TeacherOut {
    pub teacher: Option<Teacher>,
}

//
// Tasks
//

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOut {
    #[serde(flatten)]
    pub task: Task,
    /// `ABC-123` form for display.
    pub display_code: Option<String>,
}

impl From<Task> for TaskOut {
    fn from(task: Task) -> Self {
        let display_code = task
            .task_code
            .as_deref()
            .map(crate::task_codes::format_for_display);
        Self { task, display_code }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksOut {
    pub tasks: Vec<TaskOut>,
    pub current_task_id: String,
}

//
// Students
//

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinIn {
    pub name: String,
    #[serde(default)]
    pub task_code: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOut {
    pub student: Student,
    pub task: Task,
    pub step: StudentStep,
    pub share_link: Option<String>,
    pub poll_interval_ms: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitIn {
    pub content: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub task_code: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOut {
    pub step: StudentStep,
    pub submission: Option<Submission>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOut {
    pub student_id: String,
    pub status: StudentStatus,
    pub step: StudentStep,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitQuery {
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStepIn {
    pub next_step_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStepOut {
    pub next_step_id: String,
    pub status: StudentStatus,
}

#[derive(Serialize)]
pub struct StudentsOut {
    pub students: Vec<Student>,
}

#[derive(Serialize)]
pub struct OkOut {
    pub ok: bool,
}
