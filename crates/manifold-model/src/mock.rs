// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::context::Ctx;
use crate::delta::{Delta, FinishReason};
use crate::error::{Error, Result};
use crate::options::GenerateOptions;
use crate::provider::{DeltaStream, GenerateRequest, Provider};
use crate::types::{Capabilities, Model, Role, Usage};

fn mock_models() -> Vec<Model> {
    vec![
        Model {
            id: "eliza-en".into(),
            display_name: "Eliza (English)".into(),
            provider: "mock".into(),
            aliases: vec!["eliza".into()],
            capabilities: Capabilities {
                chat: true,
                function_calling: true,
                ..Default::default()
            },
        },
        Model {
            id: "mock-embed".into(),
            display_name: "Mock Embeddings".into(),
            provider: "mock".into(),
            aliases: vec![],
            capabilities: Capabilities::embedding(),
        },
    ]
}

/// Deterministic local provider: a tiny Eliza-style responder.
///
/// No network, no keys.  Useful for demos and as the default test target.
#[derive(Default)]
pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        Self
    }

    fn reply_to(input: &str) -> String {
        let lower = input.trim().to_lowercase();
        if lower.is_empty() {
            return "Please, say something.".into();
        }
        if lower.starts_with("hello") || lower.starts_with("hi") {
            return "Hello! How are you feeling today?".into();
        }
        if lower.contains('?') {
            return "Why do you ask?".into();
        }
        if let Some(rest) = lower.strip_prefix("i am ") {
            return format!("How long have you been {rest}?");
        }
        if lower.contains("because") {
            return "Is that the real reason?".into();
        }
        format!("Please, tell me more about {}.", lower.trim_end_matches('.'))
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn models(&self, _ctx: &Ctx) -> Result<Vec<Model>> {
        Ok(mock_models())
    }

    async fn generate(&self, ctx: &Ctx, req: &GenerateRequest) -> Result<DeltaStream> {
        ctx.check()?;
        let input = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_default();
        let reply = Self::reply_to(&input);
        let usage = Usage::new(
            (input.len() / 4).max(1) as u64,
            (reply.len() / 4).max(1) as u64,
        );
        let events: Vec<Result<Delta>> = vec![
            Ok(Delta::Role { role: Role::Assistant }),
            Ok(Delta::text(reply)),
            Ok(Delta::Finish { reason: FinishReason::Stop, usage: Some(usage) }),
        ];
        Ok(Box::pin(stream::iter(events)))
    }

    async fn embed(
        &self,
        ctx: &Ctx,
        _model: &str,
        inputs: &[String],
        _options: &GenerateOptions,
    ) -> Result<Vec<Vec<f32>>> {
        ctx.check()?;
        // Stable 8-dim vector derived from byte content; good enough for
        // round-trip assertions.
        Ok(inputs
            .iter()
            .map(|s| {
                let mut v = vec![0f32; 8];
                for (i, b) in s.bytes().enumerate() {
                    v[i % 8] += f32::from(b) / 255.0;
                }
                v
            })
            .collect())
    }
}

/// One scripted response: the exact delta sequence one `generate` call emits.
pub type Script = Vec<Delta>;

/// A pre-scripted provider.  Each `generate` call pops the next script from
/// the front of the queue, so tests can specify exact event sequences —
/// including tool calls, truncation, and transient failures — without
/// network access.
pub struct ScriptedProvider {
    name: String,
    scripts: Arc<Mutex<Vec<ScriptedCall>>>,
    models: Vec<Model>,
    /// Every `GenerateRequest` seen, in call order, so tests can inspect
    /// what was sent.
    pub requests: Arc<Mutex<Vec<GenerateRequest>>>,
}

enum ScriptedCall {
    Emit(Script),
    Fail(fn() -> Error),
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            name: "mock".into(),
            scripts: Arc::new(Mutex::new(
                scripts.into_iter().map(ScriptedCall::Emit).collect(),
            )),
            models: mock_models(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Declare the scripted models vision-capable so attachment tests pass
    /// the provider-side check.
    pub fn with_vision(mut self) -> Self {
        for m in &mut self.models {
            m.capabilities.vision = true;
        }
        self
    }

    /// Declare the scripted models thinking-capable.
    pub fn with_thinking(mut self) -> Self {
        for m in &mut self.models {
            m.capabilities.thinking = true;
        }
        self
    }

    /// Queue a transient failure before the remaining scripts.
    pub fn failing_first(self, times: usize) -> Self {
        {
            let mut scripts = self.scripts.lock().unwrap();
            for _ in 0..times {
                scripts.insert(0, ScriptedCall::Fail(|| Error::Transient("scripted 503".into())));
            }
        }
        self
    }

    /// Convenience: one call that streams `chunks` then stops.
    pub fn text_chunks(chunks: &[&str]) -> Self {
        let mut script: Script = vec![Delta::Role { role: Role::Assistant }];
        script.extend(chunks.iter().map(|c| Delta::text(*c)));
        script.push(Delta::Finish {
            reason: FinishReason::Stop,
            usage: Some(Usage::new(5, 5)),
        });
        Self::new(vec![script])
    }

    /// Convenience: one call that returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::text_chunks(&[&reply.into()])
    }

    /// Convenience: a two-round tool loop — a tool call on the first call,
    /// a text reply on the second.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                Delta::Role { role: Role::Assistant },
                Delta::ToolCall {
                    index: 0,
                    id: call_id.into(),
                    name: tool.into(),
                    arguments: args_json.into(),
                },
                Delta::Finish {
                    reason: FinishReason::Stop,
                    usage: Some(Usage::new(10, 4)),
                },
            ],
            vec![
                Delta::Role { role: Role::Assistant },
                Delta::text(final_text),
                Delta::Finish {
                    reason: FinishReason::Stop,
                    usage: Some(Usage::new(14, 6)),
                },
            ],
        ])
    }

    /// Number of generate calls made so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn models(&self, _ctx: &Ctx) -> Result<Vec<Model>> {
        Ok(self.models.clone())
    }

    async fn generate(&self, ctx: &Ctx, req: &GenerateRequest) -> Result<DeltaStream> {
        ctx.check()?;
        self.requests.lock().unwrap().push(req.clone());
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Fallback once all scripts are consumed.
                ScriptedCall::Emit(vec![
                    Delta::text("[no more scripts]"),
                    Delta::finish(FinishReason::Stop),
                ])
            } else {
                scripts.remove(0)
            }
        };
        match script {
            ScriptedCall::Fail(make) => Err(make()),
            ScriptedCall::Emit(deltas) => {
                let events: Vec<Result<Delta>> = deltas.into_iter().map(Ok).collect();
                Ok(Box::pin(stream::iter(events)))
            }
        }
    }

    async fn embed(
        &self,
        ctx: &Ctx,
        model: &str,
        inputs: &[String],
        options: &GenerateOptions,
    ) -> Result<Vec<Vec<f32>>> {
        MockProvider.embed(ctx, model, inputs, options).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::types::Message;

    fn req(text: &str) -> GenerateRequest {
        GenerateRequest {
            model: "eliza-en".into(),
            messages: vec![Message::user(text)],
            tools: vec![],
            options: GenerateOptions::default(),
        }
    }

    async fn drain(mut stream: DeltaStream) -> Vec<Delta> {
        let mut out = Vec::new();
        while let Some(ev) = stream.next().await {
            out.push(ev.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn eliza_greets_hello() {
        let p = MockProvider::new();
        let events = drain(p.generate(&Ctx::background(), &req("Hello")).await.unwrap()).await;
        let text: String = events
            .iter()
            .filter_map(|d| match d {
                Delta::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert!(!text.is_empty());
        assert!(text.contains("Hello"));
    }

    #[tokio::test]
    async fn eliza_ends_with_finish_and_usage() {
        let p = MockProvider::new();
        let events = drain(p.generate(&Ctx::background(), &req("tell me")).await.unwrap()).await;
        match events.last().unwrap() {
            Delta::Finish { reason, usage } => {
                assert_eq!(*reason, FinishReason::Stop);
                assert!(usage.is_some());
            }
            other => panic!("unexpected final event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn eliza_is_deterministic() {
        let p = MockProvider::new();
        let a = drain(p.generate(&Ctx::background(), &req("i am tired")).await.unwrap()).await;
        let b = drain(p.generate(&Ctx::background(), &req("i am tired")).await.unwrap()).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn scripted_pops_in_order_and_records_requests() {
        let p = ScriptedProvider::tool_then_text("c1", "weather", r#"{"city":"Berlin"}"#, "done");
        let ctx = Ctx::background();

        let first = drain(p.generate(&ctx, &req("weather?")).await.unwrap()).await;
        assert!(first
            .iter()
            .any(|d| matches!(d, Delta::ToolCall { name, .. } if name == "weather")));

        let second = drain(p.generate(&ctx, &req("...")).await.unwrap()).await;
        assert!(second
            .iter()
            .any(|d| matches!(d, Delta::Text { text } if text == "done")));

        assert_eq!(p.calls(), 2);
    }

    #[tokio::test]
    async fn scripted_fallback_after_exhaustion() {
        let p = ScriptedProvider::new(vec![]);
        let events = drain(p.generate(&Ctx::background(), &req("x")).await.unwrap()).await;
        assert!(events
            .iter()
            .any(|d| matches!(d, Delta::Text { text } if text.contains("no more scripts"))));
    }

    #[tokio::test]
    async fn failing_first_yields_transient_then_succeeds() {
        let p = ScriptedProvider::always_text("ok").failing_first(2);
        let ctx = Ctx::background();
        assert!(matches!(
            p.generate(&ctx, &req("a")).await,
            Err(Error::Transient(_))
        ));
        assert!(matches!(
            p.generate(&ctx, &req("b")).await,
            Err(Error::Transient(_))
        ));
        let events = drain(p.generate(&ctx, &req("c")).await.unwrap()).await;
        assert!(events
            .iter()
            .any(|d| matches!(d, Delta::Text { text } if text == "ok")));
    }

    #[tokio::test]
    async fn mock_embeddings_are_stable_per_input() {
        let p = MockProvider::new();
        let ctx = Ctx::background();
        let opts = GenerateOptions::default();
        let a = p
            .embed(&ctx, "mock-embed", &["hello".into()], &opts)
            .await
            .unwrap();
        let b = p
            .embed(&ctx, "mock-embed", &["hello".into()], &opts)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 8);
    }
}
