//! Domain models: tasks, students, submissions and the structured feedback schema.
//!
//! Field names serialize in camelCase so persisted blobs and HTTP bodies keep
//! the same shape the browser client reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A teacher-authored writing prompt. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: String,
  pub title: String,
  pub prompt: String,
  pub success_criteria: Vec<String>,
  pub universal_expectations: bool,
  /// 6-char shareable code; unique within the owning partition.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub task_code: Option<String>,
}

/// Lifecycle of one student in a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
  Active,
  Submitted,
  FeedbackReady,
  Revising,
  Completed,
}

impl StudentStatus {
  /// Statuses that imply a submission record exists for the student.
  pub fn requires_submission(self) -> bool {
    matches!(self, Self::Submitted | Self::FeedbackReady | Self::Revising)
  }

  /// Approved feedback is visible to the student.
  pub fn feedback_visible(self) -> bool {
    matches!(self, Self::FeedbackReady | Self::Revising)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Active => "active",
      Self::Submitted => "submitted",
      Self::FeedbackReady => "feedback_ready",
      Self::Revising => "revising",
      Self::Completed => "completed",
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
  pub id: String,
  pub name: String,
  pub status: StudentStatus,
  /// Milliseconds since the Unix epoch.
  pub joined_at: i64,
}

/// One student's work on a task. Keyed by `student_id`; a resubmission overwrites it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
  pub student_id: String,
  pub task_id: String,
  pub content: String,
  pub feedback: Option<FeedbackSession>,
  pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
  Task,
  Process,
  SelfReg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
  Revise,
  ImproveSection,
  Reupload,
  Rehearse,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackItem {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: FeedbackType,
  pub text: String,
  /// Quotes from the student's work.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub anchors: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStep {
  pub id: String,
  pub action_verb: String,
  pub target: String,
  pub success_indicator: String,
  pub cta_text: String,
  pub action_type: ActionType,
}

/// Structured feedback produced for a single submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSession {
  pub goal: String,
  pub strengths: Vec<FeedbackItem>,
  pub growth_areas: Vec<FeedbackItem>,
  pub next_steps: Vec<NextStep>,
}

impl FeedbackSession {
  pub fn next_step(&self, id: &str) -> Option<&NextStep> {
    self.next_steps.iter().find(|s| s.id == id)
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
  pub id: String,
  pub email: String,
  pub name: String,
  pub created_at: DateTime<Utc>,
}
