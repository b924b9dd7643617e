// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic Claude driver — `/v1/messages` with SSE streaming.
//!
//! Tool calls surface as `tool_use` content blocks whose JSON arguments
//! stream in as `input_json_delta` fragments; extended thinking streams as
//! `thinking_delta` fragments.  Claude has no embedding surface, so the
//! default `embed` refusal is kept.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::context::Ctx;
use crate::delta::{Delta, FinishReason};
use crate::error::{Error, Result};
use crate::options::{OutputFormat, ToolChoice, ToolChoiceMode};
use crate::provider::{
    check_attachments, check_feature_options, DeltaStream, GenerateRequest, Provider,
};
use crate::types::{Capabilities, ContentBlock, Message, Model, Role, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            client: reqwest::Client::new(),
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| Error::Permanent("ANTHROPIC_API_KEY not set".into()))
    }
}

fn claude_model(id: &str, display_name: &str, aliases: &[&str]) -> Model {
    Model {
        id: id.into(),
        display_name: display_name.into(),
        provider: "anthropic".into(),
        aliases: aliases.iter().map(|s| s.to_string()).collect(),
        capabilities: Capabilities {
            chat: true,
            vision: true,
            function_calling: true,
            thinking: true,
            ..Default::default()
        },
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    /// Anthropic's list endpoint carries no capability metadata, so the
    /// catalogue is maintained statically.
    async fn models(&self, _ctx: &Ctx) -> Result<Vec<Model>> {
        Ok(vec![
            claude_model("claude-opus-4-5", "Claude Opus 4.5", &["opus"]),
            claude_model("claude-sonnet-4-5", "Claude Sonnet 4.5", &["sonnet"]),
            claude_model("claude-haiku-4-5", "Claude Haiku 4.5", &["haiku"]),
        ])
    }

    async fn generate(&self, ctx: &Ctx, req: &GenerateRequest) -> Result<DeltaStream> {
        let key = self.key()?;
        let model = self
            .models(ctx)
            .await?
            .into_iter()
            .find(|m| m.matches(&req.model))
            .unwrap_or_else(|| claude_model(&req.model, &req.model, &[]));
        check_feature_options("anthropic", &model, &req.options, false)?;
        check_attachments(&model, &req.messages)?;
        if req.options.num_completions.map_or(false, |n| n > 1) {
            return Err(Error::UnsupportedFeature(
                "anthropic does not support multiple completions per call".into(),
            ));
        }
        match &req.options.format {
            None | Some(OutputFormat::Text) => {}
            Some(_) => {
                return Err(Error::UnsupportedFeature(
                    "anthropic does not support constrained output formats".into(),
                ));
            }
        }

        let body = build_anthropic_body(req)?;
        debug!(model = %req.model, "sending Anthropic request");

        let resp = ctx
            .run(async {
                Ok(self
                    .client
                    .post(format!("{}/v1/messages", self.base_url))
                    .header("x-api-key", key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body)
                    .send()
                    .await?)
            })
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::from_status("anthropic", status, &body));
        }

        let lines = crate::sse::data_lines(resp.bytes_stream());
        let events = lines
            .map(|line| {
                let out: Vec<Result<Delta>> = match line {
                    Ok(payload) => match serde_json::from_str::<Value>(&payload) {
                        Ok(v) => parse_event(&v),
                        Err(_) => Vec::new(),
                    },
                    Err(e) => vec![Err(e)],
                };
                futures::stream::iter(out)
            })
            .flatten();

        Ok(Box::pin(events))
    }
}

/// Translate a canonical request into the `/v1/messages` JSON body.
fn build_anthropic_body(req: &GenerateRequest) -> Result<Value> {
    let mut system_text = String::new();
    let mut messages: Vec<Value> = Vec::new();

    for m in &req.messages {
        match m.role {
            Role::System => system_text = m.text(),
            Role::User | Role::Assistant => {
                let role = if m.role == Role::User { "user" } else { "assistant" };
                let content = content_blocks(m)?;
                if !content.is_empty() {
                    messages.push(json!({ "role": role, "content": content }));
                }
            }
            // Tool results travel as user-role tool_result blocks.
            Role::Tool => {
                let content = content_blocks(m)?;
                messages.push(json!({ "role": "user", "content": content }));
            }
        }
    }

    let opts = &req.options;
    let mut body = json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": opts.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "stream": true,
    });
    if !system_text.is_empty() {
        body["system"] = json!(system_text);
    }
    if let Some(t) = opts.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = opts.top_p {
        body["top_p"] = json!(p);
    }
    if let Some(k) = opts.top_k {
        body["top_k"] = json!(k);
    }
    if !opts.stop_sequences.is_empty() {
        body["stop_sequences"] = json!(opts.stop_sequences);
    }
    if let Some(budget) = opts.thinking_budget {
        body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        body["tools"] = json!(tools);
        if let Some(choice) = &opts.tool_choice {
            body["tool_choice"] = match choice {
                ToolChoice::Mode(ToolChoiceMode::Auto) => json!({ "type": "auto" }),
                ToolChoice::Mode(ToolChoiceMode::Any) => json!({ "type": "any" }),
                ToolChoice::Mode(ToolChoiceMode::None) => json!({ "type": "none" }),
                ToolChoice::Tool(name) => json!({ "type": "tool", "name": name }),
            };
        }
    }
    Ok(body)
}

/// Map one canonical message to Anthropic content blocks.
fn content_blocks(m: &Message) -> Result<Vec<Value>> {
    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    let mut out = Vec::new();
    for block in &m.content {
        match block {
            ContentBlock::Text { text } => {
                if !text.is_empty() {
                    out.push(json!({ "type": "text", "text": text }));
                }
            }
            ContentBlock::Image { attachment } => {
                out.push(json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": attachment.mime_type,
                        "data": B64.encode(&attachment.data),
                    }
                }));
            }
            ContentBlock::Audio { attachment, .. } => {
                return Err(Error::UnsupportedAttachment(format!(
                    "anthropic does not accept audio input ({})",
                    attachment.mime_type
                )));
            }
            ContentBlock::ToolCall { id, name, arguments } => {
                out.push(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": arguments,
                }));
            }
            ContentBlock::ToolResult { call_id, value, is_error } => {
                let content = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out.push(json!({
                    "type": "tool_result",
                    "tool_use_id": call_id,
                    "content": content,
                    "is_error": is_error,
                }));
            }
            // Hidden reasoning is never resent to the API.
            ContentBlock::Thinking { .. } => {}
        }
    }
    Ok(out)
}

/// Translate one SSE event into canonical deltas.
fn parse_event(v: &Value) -> Vec<Result<Delta>> {
    let mut out: Vec<Result<Delta>> = Vec::new();
    match v["type"].as_str().unwrap_or("") {
        "message_start" => {
            out.push(Ok(Delta::Role { role: Role::Assistant }));
            if let Some(usage) = v["message"].get("usage") {
                out.push(Ok(Delta::Usage {
                    usage: Usage::new(usage["input_tokens"].as_u64().unwrap_or(0), 0),
                }));
            }
        }
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                out.push(Ok(Delta::ToolCall {
                    index,
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: String::new(),
                }));
            }
        }
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    if let Some(text) = delta["text"].as_str() {
                        if !text.is_empty() {
                            out.push(Ok(Delta::text(text)));
                        }
                    }
                }
                "input_json_delta" => {
                    if let Some(partial) = delta["partial_json"].as_str() {
                        out.push(Ok(Delta::ToolCall {
                            index,
                            id: String::new(),
                            name: String::new(),
                            arguments: partial.to_string(),
                        }));
                    }
                }
                "thinking_delta" => {
                    if let Some(text) = delta["thinking"].as_str() {
                        if !text.is_empty() {
                            out.push(Ok(Delta::thinking(text)));
                        }
                    }
                }
                // The signature blob that closes a thinking block is not
                // human-readable and must never surface as text.
                "signature_delta" => {}
                _ => {}
            }
        }
        "message_delta" => {
            if let Some(usage) = v.get("usage") {
                out.push(Ok(Delta::Usage {
                    usage: Usage::new(0, usage["output_tokens"].as_u64().unwrap_or(0)),
                }));
            }
            if let Some(stop) = v["delta"]["stop_reason"].as_str() {
                let reason = match stop {
                    "max_tokens" => FinishReason::MaxTokens,
                    "refusal" => FinishReason::Refusal,
                    "pause_turn" => FinishReason::PauseTurn,
                    // end_turn, stop_sequence, tool_use
                    _ => FinishReason::Stop,
                };
                out.push(Ok(Delta::finish(reason)));
            }
        }
        // message_stop carries nothing the assembler still needs; an
        // exhausted stream without an explicit finish defaults to Stop.
        _ => {}
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
