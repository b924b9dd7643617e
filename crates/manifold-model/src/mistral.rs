// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Mistral AI driver — OpenAI-compatible `/v1/chat/completions` wire format
//! plus the native `/v1/embeddings` surface.
//!
//! Streaming arrives as `data:` SSE chunks with a `[DONE]` sentinel; tool
//! calls are fragmented across chunks and keyed by their `index` field.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::context::Ctx;
use crate::delta::{Delta, FinishReason};
use crate::error::{Error, Result};
use crate::options::{GenerateOptions, OutputFormat, ToolChoice, ToolChoiceMode};
use crate::provider::{
    check_attachments, check_feature_options, DeltaStream, GenerateRequest, Provider,
};
use crate::types::{Capabilities, ContentBlock, Message, Model, Role, Usage};

pub struct MistralProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl MistralProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.mistral.ai/v1".into()),
            client: reqwest::Client::new(),
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| Error::Permanent("MISTRAL_API_KEY not set".into()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn capabilities_for(id: &str) -> Capabilities {
        if id.contains("embed") {
            Capabilities::embedding()
        } else {
            Capabilities {
                chat: true,
                function_calling: true,
                // Pixtral-class models accept images.
                vision: id.contains("pixtral"),
                ..Default::default()
            }
        }
    }
}

#[async_trait]
impl Provider for MistralProvider {
    fn name(&self) -> &str {
        "mistral"
    }

    /// Live listing: `GET /v1/models`.
    async fn models(&self, ctx: &Ctx) -> Result<Vec<Model>> {
        let key = self.key()?;
        let resp = ctx
            .run(async {
                Ok(self
                    .client
                    .get(self.url("models"))
                    .bearer_auth(key)
                    .send()
                    .await?)
            })
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::from_status("mistral", status, &body));
        }
        let body: Value = resp.json().await?;
        let mut models = Vec::new();
        for entry in body["data"].as_array().into_iter().flatten() {
            let Some(id) = entry["id"].as_str() else { continue };
            let aliases = entry["aliases"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            models.push(Model {
                id: id.to_string(),
                display_name: entry["name"].as_str().unwrap_or(id).to_string(),
                provider: "mistral".into(),
                aliases,
                capabilities: Self::capabilities_for(id),
            });
        }
        Ok(models)
    }

    async fn generate(&self, ctx: &Ctx, req: &GenerateRequest) -> Result<DeltaStream> {
        let key = self.key()?;
        let model = Model {
            id: req.model.clone(),
            display_name: req.model.clone(),
            provider: "mistral".into(),
            aliases: vec![],
            capabilities: Self::capabilities_for(&req.model),
        };
        check_feature_options("mistral", &model, &req.options, true)?;
        check_attachments(&model, &req.messages)?;

        let body = build_chat_body(req)?;
        debug!(model = %req.model, "sending Mistral request");

        let resp = ctx
            .run(async {
                Ok(self
                    .client
                    .post(self.url("chat/completions"))
                    .bearer_auth(key)
                    .json(&body)
                    .send()
                    .await?)
            })
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::from_status("mistral", status, &body));
        }

        let lines = crate::sse::data_lines(resp.bytes_stream());
        let events = lines
            .map(|line| {
                let out: Vec<Result<Delta>> = match line {
                    Ok(payload) if payload == "[DONE]" => Vec::new(),
                    Ok(payload) => match serde_json::from_str::<Value>(&payload) {
                        Ok(v) => parse_chunk(&v),
                        Err(_) => Vec::new(),
                    },
                    Err(e) => vec![Err(e)],
                };
                futures::stream::iter(out)
            })
            .flatten();

        Ok(Box::pin(events))
    }

    async fn embed(
        &self,
        ctx: &Ctx,
        model: &str,
        inputs: &[String],
        _options: &GenerateOptions,
    ) -> Result<Vec<Vec<f32>>> {
        let key = self.key()?;
        let resp = ctx
            .run(async {
                Ok(self
                    .client
                    .post(self.url("embeddings"))
                    .bearer_auth(key)
                    .json(&json!({ "model": model, "input": inputs }))
                    .send()
                    .await?)
            })
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::from_status("mistral", status, &body));
        }
        let body: Value = resp.json().await?;
        let mut vectors: Vec<(u64, Vec<f32>)> = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|e| {
                        let index = e["index"].as_u64().unwrap_or(0);
                        let vec = e["embedding"]
                            .as_array()
                            .map(|v| {
                                v.iter()
                                    .filter_map(|x| x.as_f64())
                                    .map(|x| x as f32)
                                    .collect()
                            })
                            .unwrap_or_default();
                        (index, vec)
                    })
                    .collect()
            })
            .unwrap_or_default();
        vectors.sort_by_key(|(i, _)| *i);
        Ok(vectors.into_iter().map(|(_, v)| v).collect())
    }
}

/// Translate a canonical request into the chat-completions JSON body.
fn build_chat_body(req: &GenerateRequest) -> Result<Value> {
    let mut messages: Vec<Value> = Vec::new();
    for m in &req.messages {
        messages.extend(wire_messages(m)?);
    }

    let opts = &req.options;
    let mut body = json!({
        "model": req.model,
        "messages": messages,
        "stream": true,
    });
    if let Some(t) = opts.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = opts.top_p {
        body["top_p"] = json!(p);
    }
    if let Some(n) = opts.max_tokens {
        body["max_tokens"] = json!(n);
    }
    if !opts.stop_sequences.is_empty() {
        body["stop"] = json!(opts.stop_sequences);
    }
    if let Some(seed) = opts.seed {
        body["random_seed"] = json!(seed);
    }
    if let Some(n) = opts.num_completions {
        body["n"] = json!(n);
    }
    if let Some(safe) = opts.safe_prompt {
        body["safe_prompt"] = json!(safe);
    }
    match &opts.format {
        Some(OutputFormat::JsonObject) => {
            body["response_format"] = json!({ "type": "json_object" });
        }
        Some(OutputFormat::JsonSchema { schema }) => {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": "response", "schema": schema },
            });
        }
        Some(OutputFormat::Text) | None => {}
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
        if let Some(choice) = &opts.tool_choice {
            body["tool_choice"] = match choice {
                ToolChoice::Mode(ToolChoiceMode::Auto) => json!("auto"),
                ToolChoice::Mode(ToolChoiceMode::Any) => json!("any"),
                ToolChoice::Mode(ToolChoiceMode::None) => json!("none"),
                ToolChoice::Tool(name) => json!({
                    "type": "function",
                    "function": { "name": name },
                }),
            };
        }
    }
    Ok(body)
}

/// Map one canonical message to wire messages.  A canonical tool message
/// carrying several results fans out into one wire message per result.
fn wire_messages(m: &Message) -> Result<Vec<Value>> {
    match m.role {
        Role::System => Ok(vec![json!({ "role": "system", "content": m.text() })]),
        Role::User => {
            let attachments = m.attachments();
            if attachments.is_empty() {
                return Ok(vec![json!({ "role": "user", "content": m.text() })]);
            }
            let mut parts: Vec<Value> = Vec::new();
            for block in &m.content {
                match block {
                    ContentBlock::Text { text } => {
                        parts.push(json!({ "type": "text", "text": text }));
                    }
                    ContentBlock::Image { attachment } => {
                        parts.push(json!({
                            "type": "image_url",
                            "image_url": attachment.to_data_url(),
                        }));
                    }
                    ContentBlock::Audio { attachment, .. } => {
                        return Err(Error::UnsupportedAttachment(format!(
                            "mistral does not accept audio input ({})",
                            attachment.mime_type
                        )));
                    }
                    _ => {}
                }
            }
            Ok(vec![json!({ "role": "user", "content": parts })])
        }
        Role::Assistant => {
            let calls = m.tool_calls();
            if calls.is_empty() {
                return Ok(vec![json!({ "role": "assistant", "content": m.text() })]);
            }
            let tool_calls: Vec<Value> = calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let mut msg = json!({ "role": "assistant", "tool_calls": tool_calls });
            let text = m.text();
            if !text.is_empty() {
                msg["content"] = json!(text);
            }
            Ok(vec![msg])
        }
        Role::Tool => {
            let mut out = Vec::new();
            for block in &m.content {
                if let ContentBlock::ToolResult { call_id, value, .. } = block {
                    let content = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": call_id,
                        "content": content,
                    }));
                }
            }
            Ok(out)
        }
    }
}

/// Translate one streamed chunk into canonical deltas.
fn parse_chunk(v: &Value) -> Vec<Result<Delta>> {
    let mut out: Vec<Result<Delta>> = Vec::new();

    // Usage arrives on the final chunk.
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        out.push(Ok(Delta::Usage {
            usage: Usage::new(
                usage["prompt_tokens"].as_u64().unwrap_or(0),
                usage["completion_tokens"].as_u64().unwrap_or(0),
            ),
        }));
    }

    let choice = &v["choices"][0];
    let delta = &choice["delta"];

    if let Some(role) = delta["role"].as_str() {
        if role == "assistant" {
            out.push(Ok(Delta::Role { role: Role::Assistant }));
        }
    }
    if let Some(text) = delta["content"].as_str() {
        if !text.is_empty() {
            out.push(Ok(Delta::text(text)));
        }
    }
    for tc in delta["tool_calls"].as_array().into_iter().flatten() {
        out.push(Ok(Delta::ToolCall {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"]
                .as_str()
                .unwrap_or("")
                .to_string(),
        }));
    }
    if let Some(reason) = choice["finish_reason"].as_str() {
        let reason = match reason {
            "length" => FinishReason::MaxTokens,
            "content_filter" => FinishReason::Refusal,
            // stop, tool_calls
            _ => FinishReason::Stop,
        };
        out.push(Ok(Delta::finish(reason)));
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
