//! Minimal client for the hosted Messages API.
//!
//! One request per generation: the system instruction carries the task prompt
//! and criteria, the single user message is the student's text. The first
//! `text` content block must hold the feedback JSON.
//!
//! NOTE: We never log the API key or the student's text; only lengths, model
//! names and latencies.

use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config::{ModelSettings, Prompts};
use crate::domain::FeedbackSession;
use crate::error::{LaraError, Result};
use crate::feedback::{build_system_prompt, parse_feedback, FeedbackGenerator};
use crate::util::trunc_for_log;

const API_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicClient {
  client: reqwest::Client,
  api_key: String,
  pub base_url: String,
  pub model: String,
  max_tokens: u32,
  prompts: Prompts,
}

impl AnthropicClient {
  /// Fails fast with `Configuration` when no usable API key is set.
  pub fn new(settings: &ModelSettings, prompts: Prompts) -> Result<Self> {
    let api_key = match settings.api_key.as_deref().map(str::trim) {
      Some(k) if !k.is_empty() => k.to_string(),
      _ => {
        return Err(LaraError::Configuration(
          "Missing Anthropic API key. Set ANTHROPIC_API_KEY in the environment.".into(),
        ))
      }
    };
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(settings.request_timeout_secs))
      .build()
      .map_err(|e| LaraError::Configuration(format!("HTTP client: {e}")))?;

    Ok(Self {
      client,
      api_key,
      base_url: settings.base_url.trim_end_matches('/').to_string(),
      model: settings.model.clone(),
      max_tokens: settings.max_tokens,
      prompts,
    })
  }

  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model, system_len = system.len(), user_len = user.len()))]
  async fn messages_text(&self, system: &str, user: &str) -> Result<String> {
    let url = format!("{}/messages", self.base_url);
    let req = MessagesRequest {
      model: &self.model,
      max_tokens: self.max_tokens,
      system,
      messages: vec![MessageReq { role: "user", content: user }],
    };

    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "lara-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("x-api-key", &self.api_key)
      .header("anthropic-version", API_VERSION)
      .json(&req)
      .send()
      .await
      .map_err(|e| LaraError::Generation(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_api_error(&body).unwrap_or(body);
      return Err(LaraError::Generation(format!("API HTTP {}: {}", status, trunc_for_log(&msg, 300))));
    }

    let body: MessagesResponse = res
      .json()
      .await
      .map_err(|e| LaraError::Generation(format!("unreadable API response: {e}")))?;
    if let Some(usage) = &body.usage {
      info!(input_tokens = ?usage.input_tokens, output_tokens = ?usage.output_tokens, "Model usage");
    }
    first_text_block(body.content)
  }
}

impl FeedbackGenerator for AnthropicClient {
  #[instrument(level = "info", skip(self, task_prompt, criteria, student_work), fields(criteria = criteria.len(), work_len = student_work.len()))]
  async fn generate(
    &self,
    task_prompt: &str,
    criteria: &[String],
    student_work: &str,
  ) -> Result<FeedbackSession> {
    let system = build_system_prompt(&self.prompts.feedback_system, task_prompt, criteria);
    let start = Instant::now();
    let result = self
      .messages_text(&system, student_work)
      .await
      .and_then(|text| parse_feedback(&text));
    let elapsed = start.elapsed();

    match &result {
      Ok(fb) => info!(
        ?elapsed,
        strengths = fb.strengths.len(),
        growth_areas = fb.growth_areas.len(),
        next_steps = fb.next_steps.len(),
        "Feedback generated"
      ),
      Err(e) => error!(?elapsed, error = %e, "Feedback generation failed"),
    }
    result
  }
}

/// Gateway used by the running service. Without a key every call fails fast.
#[derive(Clone)]
pub struct FeedbackGateway {
  client: std::result::Result<AnthropicClient, String>,
}

impl FeedbackGateway {
  pub fn from_settings(settings: &ModelSettings, prompts: Prompts) -> Self {
    Self { client: AnthropicClient::new(settings, prompts).map_err(|e| e.to_string()) }
  }
}

impl FeedbackGenerator for FeedbackGateway {
  async fn generate(
    &self,
    task_prompt: &str,
    criteria: &[String],
    student_work: &str,
  ) -> Result<FeedbackSession> {
    match &self.client {
      Ok(c) => c.generate(task_prompt, criteria, student_work).await,
      Err(msg) => Err(LaraError::Configuration(msg.clone())),
    }
  }

  fn is_configured(&self) -> bool {
    self.client.is_ok()
  }
}

fn first_text_block(blocks: Vec<ContentBlock>) -> Result<String> {
  blocks
    .into_iter()
    .find(|b| b.kind == "text")
    .and_then(|b| b.text)
    .ok_or_else(|| LaraError::Generation("No text content in response".into()))
}

// --- Messages DTOs ---

#[derive(Serialize)]
struct MessagesRequest<'a> {
  model: &'a str,
  max_tokens: u32,
  system: &'a str,
  messages: Vec<MessageReq<'a>>,
}
#[derive(Serialize)]
struct MessageReq<'a> { role: &'a str, content: &'a str }

#[derive(Deserialize)]
struct MessagesResponse {
  #[serde(default)] content: Vec<ContentBlock>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ContentBlock {
  #[serde(rename = "type")] kind: String,
  #[serde(default)] text: Option<String>,
}
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] input_tokens: Option<u32>,
  #[serde(default)] output_tokens: Option<u32>,
}

/// Try to extract a clean error message from an API error body.
fn extract_api_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
