//! Feedback generation contract.
//!
//! The gateway sends the task prompt and criteria as a system instruction and
//! the student's text as the single user message. The model must answer with
//! one JSON object in the `FeedbackSession` shape. The reply is validated
//! strictly (any shape mismatch is a generation failure) and every item id is
//! replaced by its position: `str-i`, `grow-i`, `next-i`.

use std::future::Future;

use serde::Deserialize;

use crate::domain::{ActionType, FeedbackItem, FeedbackSession, FeedbackType, NextStep};
use crate::error::{LaraError, Result};
use crate::util::fill_template;

/// Anything that can turn (prompt, criteria, student text) into validated feedback.
pub trait FeedbackGenerator: Send + Sync {
  fn generate(
    &self,
    task_prompt: &str,
    criteria: &[String],
    student_work: &str,
  ) -> impl Future<Output = Result<FeedbackSession>> + Send;

  /// False when every call is known to fail (e.g. no credentials).
  fn is_configured(&self) -> bool {
    true
  }
}

/// Render criteria as a bullet list and fill the system template.
pub fn build_system_prompt(template: &str, task_prompt: &str, criteria: &[String]) -> String {
  let criteria_list = criteria
    .iter()
    .map(|c| format!("- {c}"))
    .collect::<Vec<_>>()
    .join("\n");
  fill_template(template, &[("task_prompt", task_prompt), ("criteria", &criteria_list)])
}

/// Remove a leading ```json / ``` fence and a trailing ``` fence, if present.
pub fn strip_code_fences(text: &str) -> &str {
  let mut s = text.trim();
  if let Some(rest) = s.strip_prefix("```json") {
    s = rest;
  }
  if let Some(rest) = s.strip_prefix("```") {
    s = rest;
  }
  if let Some(rest) = s.strip_suffix("```") {
    s = rest;
  }
  s.trim()
}

// Wire shape from the model. Ids are accepted in any JSON form and then discarded.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFeedback {
  goal: String,
  strengths: Vec<RawItem>,
  growth_areas: Vec<RawItem>,
  next_steps: Vec<RawNextStep>,
}

#[derive(Deserialize)]
struct RawItem {
  #[serde(default, rename = "id")]
  _id: Option<serde_json::Value>,
  #[serde(rename = "type")]
  kind: FeedbackType,
  text: String,
  #[serde(default)]
  anchors: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNextStep {
  #[serde(default, rename = "id")]
  _id: Option<serde_json::Value>,
  action_verb: String,
  target: String,
  success_indicator: String,
  cta_text: String,
  action_type: ActionType,
}

fn items(raw: Vec<RawItem>, prefix: &str) -> Vec<FeedbackItem> {
  raw
    .into_iter()
    .enumerate()
    .map(|(i, r)| FeedbackItem {
      id: format!("{prefix}-{i}"),
      kind: r.kind,
      text: r.text,
      anchors: r.anchors,
    })
    .collect()
}

/// Parse and validate a model reply into a `FeedbackSession` with positional ids.
pub fn parse_feedback(text: &str) -> Result<FeedbackSession> {
  let json = strip_code_fences(text);
  if json.is_empty() {
    return Err(LaraError::Generation("empty model response".into()));
  }
  let raw: RawFeedback = serde_json::from_str(json)
    .map_err(|e| LaraError::Generation(format!("response did not match feedback schema: {e}")))?;

  Ok(FeedbackSession {
    goal: raw.goal,
    strengths: items(raw.strengths, "str"),
    growth_areas: items(raw.growth_areas, "grow"),
    next_steps: raw
      .next_steps
      .into_iter()
      .enumerate()
      .map(|(i, n)| NextStep {
        id: format!("next-{i}"),
        action_verb: n.action_verb,
        target: n.target,
        success_indicator: n.success_indicator,
        cta_text: n.cta_text,
        action_type: n.action_type,
      })
      .collect(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Prompts;

  const MODEL_REPLY: &str = r#"```json
{
  "goal": "Use sensory details to build atmosphere",
  "strengths": [
    {"id": 17, "type": "task", "text": "Clear mood", "anchors": ["The forest was dark."]},
    {"id": "dup", "type": "self_reg", "text": "Stayed on topic"}
  ],
  "growthAreas": [
    {"id": "dup", "type": "process", "text": "Only one sense used", "anchors": []}
  ],
  "nextSteps": [
    {"id": "x", "actionVerb": "Add", "target": "a smell", "successIndicator": "3 senses", "ctaText": "Add a smell", "actionType": "revise"},
    {"actionVerb": "Read", "target": "aloud", "successIndicator": "Flows well", "ctaText": "Read it aloud", "actionType": "rehearse"}
  ]
}
```"#;

  #[test]
  fn system_prompt_embeds_task_and_criteria() {
    let prompts = Prompts::default();
    let criteria = vec!["3 sensory details".to_string(), "Strong verbs".to_string()];
    let p = build_system_prompt(&prompts.feedback_system, "Write about a forest", &criteria);
    assert!(p.contains("Task Prompt: \"Write about a forest\""));
    assert!(p.contains("- 3 sensory details\n- Strong verbs"));
    assert!(!p.contains("{criteria}"));
  }

  #[test]
  fn strips_fences_in_all_forms() {
    assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
    assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
    assert_eq!(strip_code_fences("  {} "), "{}");
  }

  #[test]
  fn ids_are_reassigned_by_position() {
    let fb = parse_feedback(MODEL_REPLY).unwrap();
    for (i, s) in fb.strengths.iter().enumerate() {
      assert_eq!(s.id, format!("str-{i}"));
    }
    for (i, g) in fb.growth_areas.iter().enumerate() {
      assert_eq!(g.id, format!("grow-{i}"));
    }
    for (i, n) in fb.next_steps.iter().enumerate() {
      assert_eq!(n.id, format!("next-{i}"));
    }
    assert_eq!(fb.strengths.len(), 2);
    assert_eq!(fb.strengths[1].kind, FeedbackType::SelfReg);
    assert_eq!(fb.next_steps[1].action_type, ActionType::Rehearse);
  }

  #[test]
  fn non_json_is_a_generation_failure() {
    let err = parse_feedback("Great work! Keep going.").unwrap_err();
    assert!(matches!(err, LaraError::Generation(_)));
    assert!(matches!(parse_feedback("```json\n```"), Err(LaraError::Generation(_))));
  }

  #[test]
  fn schema_violations_are_rejected() {
    // Missing nextSteps.
    let missing = r#"{"goal":"g","strengths":[],"growthAreas":[]}"#;
    assert!(matches!(parse_feedback(missing), Err(LaraError::Generation(_))));

    // Unknown feedback type.
    let bad_type = r#"{"goal":"g","strengths":[{"type":"vibes","text":"t"}],"growthAreas":[],"nextSteps":[]}"#;
    assert!(matches!(parse_feedback(bad_type), Err(LaraError::Generation(_))));

    // Unknown action type.
    let bad_action = r#"{"goal":"g","strengths":[],"growthAreas":[],"nextSteps":[{"actionVerb":"a","target":"b","successIndicator":"c","ctaText":"d","actionType":"dance"}]}"#;
    assert!(matches!(parse_feedback(bad_action), Err(LaraError::Generation(_))));
  }
}
