//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::{ActionType, FeedbackItem, FeedbackSession, FeedbackType, NextStep};
use crate::error::{LaraError, Result};
use crate::feedback::FeedbackGenerator;

pub fn sample_feedback() -> FeedbackSession {
  FeedbackSession {
    goal: "Describe a setting using the senses".into(),
    strengths: vec![FeedbackItem {
      id: "str-0".into(),
      kind: FeedbackType::Task,
      text: "Strong opening mood".into(),
      anchors: Some(vec!["The forest was dark.".into()]),
    }],
    growth_areas: vec![FeedbackItem {
      id: "grow-0".into(),
      kind: FeedbackType::Process,
      text: "Add sounds and smells".into(),
      anchors: None,
    }],
    next_steps: vec![
      NextStep {
        id: "next-0".into(),
        action_verb: "Add".into(),
        target: "two sound details".into(),
        success_indicator: "Reader can hear the forest".into(),
        cta_text: "Add sounds".into(),
        action_type: ActionType::Revise,
      },
      NextStep {
        id: "next-1".into(),
        action_verb: "Rewrite".into(),
        target: "the last sentence".into(),
        success_indicator: "Ending matches the mood".into(),
        cta_text: "Fix ending".into(),
        action_type: ActionType::ImproveSection,
      },
    ],
  }
}

/// Generator that returns a canned result and counts calls.
pub struct StubGenerator {
  pub fail: bool,
  pub calls: AtomicUsize,
}

impl StubGenerator {
  pub fn ok() -> Self {
    Self { fail: false, calls: AtomicUsize::new(0) }
  }

  pub fn failing() -> Self {
    Self { fail: true, calls: AtomicUsize::new(0) }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl FeedbackGenerator for StubGenerator {
  async fn generate(
    &self,
    _task_prompt: &str,
    _criteria: &[String],
    _student_work: &str,
  ) -> Result<FeedbackSession> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      Err(LaraError::Generation("stubbed network failure".into()))
    } else {
      Ok(sample_feedback())
    }
  }
}
