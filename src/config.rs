//! Loading service configuration (prompts + tuning knobs) from TOML.
//!
//! See `AgentConfig`, `Prompts` and `ServiceConfig` for the expected schema.
//! Every field has a default, so an absent or partial file is fine.

use serde::Deserialize;
use tracing::{error, info, warn};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub service: ServiceConfig,
}

/// Prompts used by the feedback gateway.
/// `feedback_system` understands `{task_prompt}` and `{criteria}` placeholders.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub feedback_system: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      feedback_system: r#"You are LARA, a helpful teacher's assistant.
Analyze the student's writing based ONLY on the provided prompt and success criteria.
Be encouraging but specific.

Task Prompt: "{task_prompt}"
Success Criteria:
{criteria}

You must respond with ONLY valid JSON matching this exact structure:
{
  "goal": "string - A summary of the learning goal",
  "strengths": [
    {
      "id": "string",
      "type": "task" | "process" | "self_reg",
      "text": "string - What they did well",
      "anchors": ["string - specific examples from their work"]
    }
  ],
  "growthAreas": [
    {
      "id": "string",
      "type": "task" | "process" | "self_reg",
      "text": "string - What needs improvement",
      "anchors": ["string - specific examples"]
    }
  ],
  "nextSteps": [
    {
      "id": "string",
      "actionVerb": "string",
      "target": "string",
      "successIndicator": "string",
      "ctaText": "string - at most 30 characters",
      "actionType": "revise" | "improve_section" | "reupload" | "rehearse"
    }
  ]
}"#
        .into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
  /// How often a waiting student re-reads their status.
  pub poll_interval_ms: u64,
  pub max_tokens: u32,
  pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self { poll_interval_ms: 1000, max_tokens: 4096, request_timeout_secs: 60 }
  }
}

impl ServiceConfig {
  /// Replace zero values with their defaults.
  pub fn sanitized(mut self) -> Self {
    let defaults = Self::default();
    if self.poll_interval_ms == 0 {
      warn!(target: "lara_backend", default = defaults.poll_interval_ms, "poll_interval_ms must be > 0; using default");
      self.poll_interval_ms = defaults.poll_interval_ms;
    }
    if self.max_tokens == 0 {
      warn!(target: "lara_backend", default = defaults.max_tokens, "max_tokens must be > 0; using default");
      self.max_tokens = defaults.max_tokens;
    }
    if self.request_timeout_secs == 0 {
      warn!(target: "lara_backend", default = defaults.request_timeout_secs, "request_timeout_secs must be > 0; using default");
      self.request_timeout_secs = defaults.request_timeout_secs;
    }
    self
  }
}

/// Connection settings for the hosted model, read from the environment.
#[derive(Clone)]
pub struct ModelSettings {
  pub api_key: Option<String>,
  pub base_url: String,
  pub model: String,
  pub max_tokens: u32,
  pub request_timeout_secs: u64,
}

impl ModelSettings {
  pub fn from_env(service: &ServiceConfig) -> Self {
    Self {
      api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
      base_url: std::env::var("ANTHROPIC_BASE_URL")
        .unwrap_or_else(|_| "https://api.anthropic.com/v1".into()),
      model: std::env::var("CLAUDE_MODEL").unwrap_or_else(|_| "claude-3-5-sonnet-20241022".into()),
      max_tokens: service.max_tokens,
      request_timeout_secs: service.request_timeout_secs,
    }
  }

  pub fn has_api_key(&self) -> bool {
    self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
  }
}

// Never print the key.
impl std::fmt::Debug for ModelSettings {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModelSettings")
      .field("has_api_key", &self.has_api_key())
      .field("base_url", &self.base_url)
      .field("model", &self.model)
      .field("max_tokens", &self.max_tokens)
      .field("request_timeout_secs", &self.request_timeout_secs)
      .finish()
  }
}

/// Parse TOML. Out-of-range service knobs are logged and reset to their defaults.
pub fn parse_agent_config(s: &str) -> Result<AgentConfig, toml::de::Error> {
  let mut cfg = toml::from_str::<AgentConfig>(s)?;
  cfg.service = cfg.service.sanitized();
  Ok(cfg)
}

/// Attempt to load `AgentConfig` from LARA_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("LARA_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_agent_config(&s) {
      Ok(cfg) => {
        info!(target: "lara_backend", %path, "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "lara_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "lara_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_toml_keeps_defaults() {
    let cfg = parse_agent_config("[service]\npoll_interval_ms = 250\n").unwrap();
    assert_eq!(cfg.service.poll_interval_ms, 250);
    assert_eq!(cfg.service.max_tokens, 4096);
    assert!(cfg.prompts.feedback_system.contains("{task_prompt}"));
  }

  #[test]
  fn zero_poll_interval_falls_back_to_default() {
    let cfg = parse_agent_config("[service]\npoll_interval_ms = 0\nrequest_timeout_secs = 5\n").unwrap();
    assert_eq!(cfg.service.poll_interval_ms, 1000);
    assert_eq!(cfg.service.request_timeout_secs, 5);
  }

  #[test]
  fn prompt_override() {
    let cfg = parse_agent_config("[prompts]\nfeedback_system = \"Grade {task_prompt}\"\n").unwrap();
    assert_eq!(cfg.prompts.feedback_system, "Grade {task_prompt}");
  }

  #[test]
  fn debug_output_hides_key() {
    let s = ModelSettings {
      api_key: Some("sk-secret".into()),
      base_url: "http://x".into(),
      model: "m".into(),
      max_tokens: 1,
      request_timeout_secs: 1,
    };
    let dbg = format!("{s:?}");
    assert!(!dbg.contains("sk-secret"));
    assert!(dbg.contains("has_api_key: true"));
  }
}
