// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Google Gemini driver — native Generative Language API.
//!
//! Uses the `streamGenerateContent` endpoint for generation and
//! `batchEmbedContents` for embeddings.  Supports text, images/audio via
//! `inline_data`, tool calls, and thinking deltas via `thought` parts.
//!
//! # Auth
//! API key via the `x-goog-api-key` header.
//!
//! # Endpoint pattern
//! `POST {base}/v1beta/models/{model}:streamGenerateContent?alt=sse`

use std::collections::HashMap;

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

pub struct GoogleProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
            client: reqwest::Client::new(),
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| Error::Permanent("GEMINI_API_KEY not set".into()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    /// Live listing: `GET /v1beta/models`.  Capability flags are derived from
    /// the advertised `supportedGenerationMethods`.
    async fn models(&self, ctx: &Ctx) -> Result<Vec<Model>> {
        let key = self.key()?;
        let resp = ctx
            .run(async {
                Ok(self
                    .client
                    .get(self.url("v1beta/models"))
                    .header("x-goog-api-key", key)
                    .send()
                    .await?)
            })
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::from_status("google", status, &body));
        }
        let body: Value = resp.json().await?;
        let mut models = Vec::new();
        for entry in body["models"].as_array().into_iter().flatten() {
            let raw_name = entry["name"].as_str().unwrap_or("");
            let id = raw_name.strip_prefix("models/").unwrap_or(raw_name);
            if id.is_empty() {
                continue;
            }
            let methods: Vec<&str> = entry["supportedGenerationMethods"]
                .as_array()
                .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();
            let chat = methods.contains(&"generateContent");
            let embedding =
                methods.contains(&"embedContent") || methods.contains(&"batchEmbedContents");
            if !chat && !embedding {
                continue;
            }
            models.push(Model {
                id: id.to_string(),
                display_name: entry["displayName"].as_str().unwrap_or(id).to_string(),
                provider: "google".into(),
                aliases: vec![],
                capabilities: Capabilities {
                    chat,
                    embedding,
                    // All current generateContent Gemini models are multimodal.
                    vision: chat,
                    function_calling: chat,
                    thinking: chat && id.contains("2.5"),
                },
            });
        }
        Ok(models)
    }

    async fn generate(&self, ctx: &Ctx, req: &GenerateRequest) -> Result<DeltaStream> {
        let key = self.key()?;
        let model = self.lookup(ctx, &req.model).await?;
        check_feature_options("google", &model, &req.options, false)?;
        check_attachments(&model, &req.messages)?;

        let body = build_gemini_body(req)?;
        debug!(model = %req.model, "sending Gemini request");

        let resp = ctx
            .run(async {
                Ok(self
                    .client
                    .post(self.url(&format!(
                        "v1beta/models/{}:streamGenerateContent?alt=sse",
                        req.model
                    )))
                    .header("x-goog-api-key", key)
                    .json(&body)
                    .send()
                    .await?)
            })
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::from_status("google", status, &body));
        }

        // Gemini does not assign tool-call ids or indexes; number the
        // functionCall parts in arrival order so the multiplexer can keep
        // parallel calls apart.
        let lines = crate::sse::data_lines(resp.bytes_stream());
        let events = lines
            .scan(0u32, |next_index, line| {
                let out: Vec<Result<Delta>> = match line {
                    Ok(payload) => match serde_json::from_str::<Value>(&payload) {
                        Ok(v) => parse_stream_chunk(&v, next_index),
                        Err(_) => Vec::new(),
                    },
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

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
        let requests: Vec<Value> = inputs
            .iter()
            .map(|text| {
                json!({
                    "model": format!("models/{model}"),
                    "content": { "parts": [{ "text": text }] },
                })
            })
            .collect();
        let resp = ctx
            .run(async {
                Ok(self
                    .client
                    .post(self.url(&format!("v1beta/models/{model}:batchEmbedContents")))
                    .header("x-goog-api-key", key)
                    .json(&json!({ "requests": requests }))
                    .send()
                    .await?)
            })
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::from_status("google", status, &body));
        }
        let body: Value = resp.json().await?;
        let vectors = body["embeddings"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|e| {
                        e["values"]
                            .as_array()
                            .map(|v| {
                                v.iter()
                                    .filter_map(|x| x.as_f64())
                                    .map(|x| x as f32)
                                    .collect()
                            })
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(vectors)
    }
}

impl GoogleProvider {
    /// Resolve capability flags for `model` without a second network trip:
    /// known naming conventions are enough for the option checks.
    async fn lookup(&self, _ctx: &Ctx, model: &str) -> Result<Model> {
        Ok(Model {
            id: model.to_string(),
            display_name: model.to_string(),
            provider: "google".into(),
            aliases: vec![],
            capabilities: Capabilities {
                chat: true,
                embedding: model.contains("embedding"),
                vision: true,
                function_calling: true,
                thinking: model.contains("2.5"),
            },
        })
    }
}

/// Translate a canonical request into the Gemini JSON body.
fn build_gemini_body(req: &GenerateRequest) -> Result<Value> {
    // Gemini matches functionResponse parts to functionCall parts by function
    // name, not by opaque id, so map call ids back to names first.
    let mut call_names: HashMap<String, String> = HashMap::new();
    for m in &req.messages {
        for call in m.tool_calls() {
            call_names.insert(call.id.clone(), call.name.clone());
        }
    }

    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();
    for m in &req.messages {
        match m.role {
            Role::System => {
                let text = m.text();
                if !text.is_empty() {
                    system_parts.push(json!({ "text": text }));
                }
            }
            Role::User | Role::Tool => {
                contents.push(json!({
                    "role": "user",
                    "parts": message_parts(m, &call_names)?,
                }));
            }
            Role::Assistant => {
                contents.push(json!({
                    "role": "model",
                    "parts": message_parts(m, &call_names)?,
                }));
            }
        }
    }

    let opts = &req.options;
    let mut generation_config = json!({});
    if let Some(t) = opts.temperature {
        generation_config["temperature"] = json!(t);
    }
    if let Some(p) = opts.top_p {
        generation_config["topP"] = json!(p);
    }
    if let Some(k) = opts.top_k {
        generation_config["topK"] = json!(k);
    }
    if let Some(n) = opts.max_tokens {
        generation_config["maxOutputTokens"] = json!(n);
    }
    if !opts.stop_sequences.is_empty() {
        generation_config["stopSequences"] = json!(opts.stop_sequences);
    }
    if let Some(seed) = opts.seed {
        generation_config["seed"] = json!(seed);
    }
    if let Some(n) = opts.num_completions {
        generation_config["candidateCount"] = json!(n);
    }
    if let Some(budget) = opts.thinking_budget {
        generation_config["thinkingConfig"] = json!({ "thinkingBudget": budget });
    }
    match &opts.format {
        Some(OutputFormat::JsonObject) => {
            generation_config["responseMimeType"] = json!("application/json");
        }
        Some(OutputFormat::JsonSchema { schema }) => {
            generation_config["responseMimeType"] = json!("application/json");
            generation_config["responseSchema"] = schema.clone();
        }
        Some(OutputFormat::Text) | None => {}
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": generation_config,
    });
    if !system_parts.is_empty() {
        body["systemInstruction"] = json!({ "parts": system_parts });
    }
    if !req.tools.is_empty() {
        let declarations: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
        if let Some(choice) = &opts.tool_choice {
            let config = match choice {
                ToolChoice::Mode(ToolChoiceMode::Auto) => json!({ "mode": "AUTO" }),
                ToolChoice::Mode(ToolChoiceMode::Any) => json!({ "mode": "ANY" }),
                ToolChoice::Mode(ToolChoiceMode::None) => json!({ "mode": "NONE" }),
                ToolChoice::Tool(name) => json!({
                    "mode": "ANY",
                    "allowedFunctionNames": [name],
                }),
            };
            body["toolConfig"] = json!({ "functionCallingConfig": config });
        }
    }
    Ok(body)
}

/// Convert one canonical message into a Gemini `parts` array.
fn message_parts(m: &Message, call_names: &HashMap<String, String>) -> Result<Vec<Value>> {
    let mut parts = Vec::new();
    for block in &m.content {
        match block {
            ContentBlock::Text { text } => parts.push(json!({ "text": text })),
            ContentBlock::Image { attachment } | ContentBlock::Audio { attachment, .. } => {
                use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
                parts.push(json!({
                    "inline_data": {
                        "mime_type": attachment.mime_type,
                        "data": B64.encode(&attachment.data),
                    }
                }));
            }
            ContentBlock::ToolCall { name, arguments, .. } => {
                parts.push(json!({
                    "functionCall": { "name": name, "args": arguments }
                }));
            }
            ContentBlock::ToolResult { call_id, value, .. } => {
                let fn_name = call_names
                    .get(call_id)
                    .map(String::as_str)
                    .unwrap_or(call_id.as_str());
                parts.push(json!({
                    "functionResponse": {
                        "name": fn_name,
                        "response": { "output": value },
                    }
                }));
            }
            // Hidden reasoning is never resent to the API.
            ContentBlock::Thinking { .. } => {}
        }
    }
    if parts.is_empty() {
        parts.push(json!({ "text": "" }));
    }
    Ok(parts)
}

/// Translate one streamed Gemini chunk into canonical deltas.
///
/// A single chunk may carry text parts, function calls, a finish reason, and
/// usage metadata all at once.
fn parse_stream_chunk(v: &Value, next_tc_index: &mut u32) -> Vec<Result<Delta>> {
    let mut out: Vec<Result<Delta>> = Vec::new();

    if let Some(meta) = v.get("usageMetadata") {
        out.push(Ok(Delta::Usage {
            usage: Usage::new(
                meta["promptTokenCount"].as_u64().unwrap_or(0),
                meta["candidatesTokenCount"].as_u64().unwrap_or(0),
            ),
        }));
    }

    let candidate = &v["candidates"][0];
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                if let Some(text) = part["text"].as_str() {
                    out.push(Ok(Delta::thinking(text)));
                }
                continue;
            }
            if let Some(fc) = part.get("functionCall") {
                let name = fc["name"].as_str().unwrap_or("").to_string();
                let index = *next_tc_index;
                *next_tc_index += 1;
                out.push(Ok(Delta::ToolCall {
                    index,
                    // Gemini has no call ids; derive one from the arrival order.
                    id: format!("{name}-{index}"),
                    name,
                    arguments: fc["args"].to_string(),
                }));
                continue;
            }
            if let Some(text) = part["text"].as_str() {
                out.push(Ok(Delta::text(text)));
            }
        }
    }

    if let Some(reason) = candidate["finishReason"].as_str() {
        let reason = match reason {
            "MAX_TOKENS" => FinishReason::MaxTokens,
            "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" => FinishReason::Refusal,
            _ => FinishReason::Stop,
        };
        out.push(Ok(Delta::finish(reason)));
    }

    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attachment, ToolCall, ToolResult};

    fn chunk(v: Value) -> Vec<Delta> {
        let mut idx = 0;
        parse_stream_chunk(&v, &mut idx)
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn provider_name() {
        let p = GoogleProvider::new(None, None);
        assert_eq!(p.name(), "google");
    }

    #[test]
    fn text_chunk_parsed() {
        let out = chunk(json!({
            "candidates": [{ "content": { "parts": [{ "text": "hello" }] } }]
        }));
        assert_eq!(out, vec![Delta::text("hello")]);
    }

    #[test]
    fn thought_part_becomes_thinking_delta() {
        let out = chunk(json!({
            "candidates": [{ "content": { "parts": [{ "text": "hmm", "thought": true }] } }]
        }));
        assert_eq!(out, vec![Delta::thinking("hmm")]);
    }

    #[test]
    fn function_calls_get_sequential_indexes() {
        let v = json!({
            "candidates": [{ "content": { "parts": [
                { "functionCall": { "name": "a", "args": { "x": 1 } } },
                { "functionCall": { "name": "b", "args": {} } },
            ] } }]
        });
        let mut idx = 0;
        let out: Vec<Delta> = parse_stream_chunk(&v, &mut idx)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert!(matches!(&out[0], Delta::ToolCall { index: 0, name, .. } if name == "a"));
        assert!(matches!(&out[1], Delta::ToolCall { index: 1, name, .. } if name == "b"));
        assert_eq!(idx, 2);
    }

    #[test]
    fn finish_and_usage_in_one_chunk() {
        let out = chunk(json!({
            "usageMetadata": { "promptTokenCount": 9, "candidatesTokenCount": 3 },
            "candidates": [{
                "content": { "parts": [{ "text": "done" }] },
                "finishReason": "STOP",
            }]
        }));
        assert_eq!(out.len(), 3);
        assert!(matches!(out[0], Delta::Usage { usage } if usage == Usage::new(9, 3)));
        assert_eq!(out[1], Delta::text("done"));
        assert_eq!(out[2], Delta::finish(FinishReason::Stop));
    }

    #[test]
    fn max_tokens_and_safety_finish_reasons_mapped() {
        let out = chunk(json!({ "candidates": [{ "finishReason": "MAX_TOKENS" }] }));
        assert_eq!(out, vec![Delta::finish(FinishReason::MaxTokens)]);
        let out = chunk(json!({ "candidates": [{ "finishReason": "SAFETY" }] }));
        assert_eq!(out, vec![Delta::finish(FinishReason::Refusal)]);
    }

    // ── Body building ─────────────────────────────────────────────────────────

    fn basic_req(messages: Vec<Message>) -> GenerateRequest {
        GenerateRequest {
            model: "gemini-2.0-flash".into(),
            messages,
            tools: vec![],
            options: GenerateOptions::default(),
        }
    }

    #[test]
    fn system_message_goes_to_system_instruction() {
        let body = build_gemini_body(&basic_req(vec![
            Message::system("be brief"),
            Message::user("hi"),
        ]))
        .unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn tool_result_uses_function_name_not_call_id() {
        let call = ToolCall {
            id: "call-opaque-1".into(),
            name: "read_file".into(),
            arguments: json!({}),
        };
        let assistant = Message::new(Role::Assistant, vec![ContentBlock::from_tool_call(&call)]);
        let tool = Message::tool_results(&[ToolResult::ok(call, json!("contents"))]);
        let body = build_gemini_body(&basic_req(vec![assistant, tool])).unwrap();
        let resp = &body["contents"][1]["parts"][0]["functionResponse"];
        assert_eq!(resp["name"], "read_file");
        assert_eq!(resp["response"]["output"], "contents");
    }

    #[test]
    fn image_attachment_encoded_as_inline_data() {
        let msg = Message::user_with_attachments(
            "look",
            vec![Attachment::new(None, "image/png", vec![1, 2, 3])],
        );
        let body = build_gemini_body(&basic_req(vec![msg])).unwrap();
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["text"], "look");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["data"], "AQID");
    }

    #[test]
    fn thinking_blocks_are_not_resent() {
        let msg = Message::new(
            Role::Assistant,
            vec![ContentBlock::thinking("secret"), ContentBlock::text("answer")],
        );
        let body = build_gemini_body(&basic_req(vec![msg])).unwrap();
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["text"], "answer");
    }

    #[test]
    fn options_map_to_generation_config() {
        let mut req = basic_req(vec![Message::user("hi")]);
        req.options = GenerateOptions::new()
            .with_temperature(0.5)
            .with_max_tokens(256)
            .with_num_completions(2)
            .with_stop_sequence("END");
        let body = build_gemini_body(&req).unwrap();
        let cfg = &body["generationConfig"];
        assert_eq!(cfg["temperature"], 0.5);
        assert_eq!(cfg["maxOutputTokens"], 256);
        assert_eq!(cfg["candidateCount"], 2);
        assert_eq!(cfg["stopSequences"][0], "END");
    }

    #[test]
    fn forced_tool_choice_sets_allowed_function_names() {
        let mut req = basic_req(vec![Message::user("hi")]);
        req.tools = vec![crate::types::ToolSpec {
            name: "weather".into(),
            description: "d".into(),
            parameters: json!({"type": "object"}),
        }];
        req.options = GenerateOptions::new().with_tool_choice(ToolChoice::Tool("weather".into()));
        let body = build_gemini_body(&req).unwrap();
        let cfg = &body["toolConfig"]["functionCallingConfig"];
        assert_eq!(cfg["mode"], "ANY");
        assert_eq!(cfg["allowedFunctionNames"][0], "weather");
    }
}
