// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Requested shape of the assistant's final text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputFormat {
    Text,
    JsonObject,
    JsonSchema { schema: Value },
}

/// How the model may use the attached toolkit this turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    /// Force a specific tool by name.
    Tool(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    Auto,
    Any,
    None,
}

/// Sampling and feature options for one generation call.
///
/// All fields are optional; a provider ignores options it does not recognize
/// but must refuse an option that references a feature the target model does
/// not have (`thinking_budget` against a non-thinking model, `safe_prompt`
/// outside Mistral).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Sampling temperature in [0, 2].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Response token cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    /// Deterministic sampling seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    /// Overrides the session system prompt for this turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Provider-specific reasoning depth, in tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
    /// Mistral content-filter toggle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_prompt: Option<bool>,
    /// Number of parallel completions (≥ 1).  Tool loops require 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_completions: Option<u32>,
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn with_top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn with_top_k(mut self, k: u32) -> Self {
        self.top_k = Some(k);
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn with_stop_sequence(mut self, s: impl Into<String>) -> Self {
        self.stop_sequences.push(s.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_thinking_budget(mut self, tokens: u32) -> Self {
        self.thinking_budget = Some(tokens);
        self
    }

    pub fn with_safe_prompt(mut self, on: bool) -> Self {
        self.safe_prompt = Some(on);
        self
    }

    pub fn with_num_completions(mut self, n: u32) -> Self {
        self.num_completions = Some(n);
        self
    }

    /// Range checks on caller-supplied values.
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::BadParameter(format!(
                    "temperature {t} outside [0, 2]"
                )));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::BadParameter(format!("top_p {p} outside [0, 1]")));
            }
        }
        if self.num_completions == Some(0) {
            return Err(Error::BadParameter("num_completions must be ≥ 1".into()));
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chains_accumulate() {
        let o = GenerateOptions::new()
            .with_temperature(0.7)
            .with_max_tokens(512)
            .with_stop_sequence("END")
            .with_stop_sequence("STOP");
        assert_eq!(o.temperature, Some(0.7));
        assert_eq!(o.max_tokens, Some(512));
        assert_eq!(o.stop_sequences, vec!["END", "STOP"]);
    }

    #[test]
    fn validate_rejects_out_of_range_temperature() {
        assert!(GenerateOptions::new().with_temperature(2.5).validate().is_err());
        assert!(GenerateOptions::new().with_temperature(2.0).validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_completions() {
        assert!(GenerateOptions::new().with_num_completions(0).validate().is_err());
        assert!(GenerateOptions::new().with_num_completions(3).validate().is_ok());
    }

    #[test]
    fn default_serializes_to_empty_object() {
        let json = serde_json::to_value(GenerateOptions::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn tool_choice_tool_name_round_trips() {
        let o = GenerateOptions::new().with_tool_choice(ToolChoice::Tool("weather".into()));
        let json = serde_json::to_string(&o).unwrap();
        let back: GenerateOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_choice, Some(ToolChoice::Tool("weather".into())));
    }

    #[test]
    fn output_format_schema_round_trips() {
        let o = GenerateOptions::new().with_format(OutputFormat::JsonSchema {
            schema: serde_json::json!({"type": "object"}),
        });
        let json = serde_json::to_string(&o).unwrap();
        let back: GenerateOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, o);
    }
}
