// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Workspace-level smoke tests: the SDK wired together the way the binary
//! wires it, against the mock provider and a file-backed store.

use std::sync::Arc;

use serde_json::json;

use manifold_agent::{parse_agent_str, AgentRunOptions, AgentRunner};
use manifold_core::{Generator, Orchestrator, TurnInput};
use manifold_model::{
    Ctx, GenerateOptions, Message, MockProvider, ProviderRegistry, ScriptedProvider, Session,
    SessionFilter,
};
use manifold_store::{FileStore, SessionStore};
use manifold_tools::{FnTool, Toolkit};

async fn file_backed_orchestrator(
    dir: &std::path::Path,
    provider: impl manifold_model::Provider + 'static,
) -> Arc<Orchestrator> {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(provider)).unwrap();
    let store = Arc::new(FileStore::open(dir).await.unwrap());
    Arc::new(Orchestrator::new(Arc::new(registry), store))
}

#[tokio::test]
async fn chat_turn_survives_a_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = file_backed_orchestrator(dir.path(), MockProvider::new()).await;

    let id = orchestrator
        .store()
        .create(Session::new("smoke").with_model("mock/eliza-en"))
        .await
        .unwrap();
    let generator = Generator::new(Arc::clone(&orchestrator));
    let out = generator
        .with_session(
            &Ctx::background(),
            &id,
            Message::user("Hello"),
            None,
            &GenerateOptions::default(),
            None,
            None,
        )
        .await
        .unwrap();
    assert!(!out.message.text().is_empty());

    // A fresh store instance over the same directory sees the settled turn.
    let reopened = FileStore::open(dir.path()).await.unwrap();
    let session = reopened.get(&id).await.unwrap();
    session.validate().unwrap();
    assert_eq!(session.history.len(), 2);
    assert_eq!(session.history[0].text(), "Hello");
    assert!(!session.cumulative_usage.is_zero());
}

#[tokio::test]
async fn tool_loop_round_trips_through_the_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::tool_then_text(
        "c1",
        "weather_in_city",
        r#"{"city":"Berlin"}"#,
        "It is sunny in Berlin",
    );
    let orchestrator = file_backed_orchestrator(dir.path(), provider).await;

    let mut kit = Toolkit::new();
    kit.register(FnTool::new(
        "weather_in_city",
        "Report the weather in a city",
        json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
            "required": ["city"],
        }),
        |_ctx, _args| async move { Ok(json!("sunny")) },
    ))
    .unwrap();

    let id = orchestrator
        .store()
        .create(Session::new("weather").with_model("mock/eliza-en"))
        .await
        .unwrap();
    let out = orchestrator
        .run_turn(
            &Ctx::background(),
            &id,
            TurnInput::UserMessage(Message::user("Weather in Berlin?")),
            None,
            &GenerateOptions::default(),
            Some(&kit),
            None,
        )
        .await
        .unwrap();
    assert_eq!(out.message.text(), "It is sunny in Berlin");

    let session = orchestrator.store().get(&id).await.unwrap();
    assert_eq!(session.history.len(), 4);
    session.validate().unwrap();
}

#[tokio::test]
async fn agent_run_cleans_up_its_ephemeral_session() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::always_text(r#"{"summary":"brief"}"#);
    let orchestrator = file_backed_orchestrator(dir.path(), provider).await;

    let def = parse_agent_str(
        r#"---
name: summarizer
model: mock/eliza-en
output_schema:
  type: object
  required: [summary]
---
Summarize: {{text}}
"#,
        "summarizer",
    )
    .unwrap();

    let runner = AgentRunner::new(Arc::clone(&orchestrator), Toolkit::new());
    let out = runner
        .run(
            &Ctx::background(),
            &def,
            &json!({"text": "long input"}),
            &AgentRunOptions::ephemeral(),
        )
        .await
        .unwrap();
    assert_eq!(out.output.unwrap()["summary"], "brief");

    let remaining = orchestrator
        .store()
        .list(&SessionFilter::default())
        .await
        .unwrap();
    assert!(remaining.is_empty());
}
