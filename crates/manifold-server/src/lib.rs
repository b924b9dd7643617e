// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Thin HTTP wrapper over the SDK: every handler parses, delegates to the
//! orchestrator/runner/registry, and serializes.  Streaming endpoints emit
//! server-sent events whose payloads are canonical deltas; the terminal
//! event is the `finish` delta.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info};

use manifold_agent::{AgentLibrary, AgentRunOptions, AgentRunner};
use manifold_core::{Orchestrator, TurnInput, TurnOutcome};
use manifold_model::{
    list_drivers, Ctx, Delta, Error, GenerateOptions, Message, Result, Session, SessionFilter,
};
use manifold_store::SessionStore;
use manifold_tools::Toolkit;

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub toolkit: Toolkit,
    pub agents: AgentLibrary,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, toolkit: Toolkit, agents: AgentLibrary) -> Self {
        Self { orchestrator, toolkit, agents }
    }

    fn runner(&self) -> AgentRunner {
        AgentRunner::new(Arc::clone(&self.orchestrator), self.toolkit.clone())
    }
}

/// Build the full API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/providers", get(list_providers))
        .route("/v1/models", get(list_models))
        .route("/v1/tools", get(list_tools))
        .route("/v1/agents", get(list_agents))
        .route("/v1/agents/:name/run", post(run_agent))
        .route("/v1/sessions", get(list_sessions).post(create_session))
        .route("/v1/sessions/:id", get(get_session).delete(delete_session))
        .route("/v1/chat", post(chat))
        .route("/v1/ask", post(ask))
        .route("/v1/embeddings", post(embeddings))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(addr: std::net::SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "manifold server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ─── Error mapping ────────────────────────────────────────────────────────────

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

fn error_kind(e: &Error) -> &'static str {
    match e {
        Error::BadParameter(_) => "bad-parameter",
        Error::NotFound(_) => "not-found",
        Error::Conflict(_) => "conflict",
        Error::SessionBusy(_) => "session-busy",
        Error::Transient(_) => "provider-transient",
        Error::Permanent(_) => "provider-permanent",
        Error::RateLimited { .. } => "rate-limited",
        Error::MaxTokens { .. } => "max-tokens",
        Error::Refusal { .. } => "refusal",
        Error::PauseTurn { .. } => "pause-turn",
        Error::MalformedToolArguments { .. } => "malformed-tool-arguments",
        Error::ToolLoopLimit { .. } => "tool-loop-limit",
        Error::UnsupportedAttachment(_) => "unsupported-attachment",
        Error::UnsupportedFeature(_) => "unsupported-feature",
        Error::InvalidInput(_) => "invalid-input",
        Error::InvalidOutput(_) => "invalid-output",
        Error::Cancelled => "cancelled",
        Error::Store(_) => "store",
        Error::Serde(_) => "serde",
        Error::Http(_) => "http",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::BadParameter(_)
            | Error::InvalidInput(_)
            | Error::UnsupportedAttachment(_)
            | Error::UnsupportedFeature(_)
            | Error::Serde(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) | Error::SessionBusy(_) => StatusCode::CONFLICT,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Error::Transient(_)
            | Error::Permanent(_)
            | Error::Http(_)
            | Error::MaxTokens { .. }
            | Error::Refusal { .. }
            | Error::PauseTurn { .. }
            | Error::MalformedToolArguments { .. }
            | Error::ToolLoopLimit { .. }
            | Error::InvalidOutput(_) => StatusCode::BAD_GATEWAY,
            Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": { "kind": error_kind(&self.0), "message": self.0.to_string() }
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ─── Catalogue resources ──────────────────────────────────────────────────────

async fn list_providers(State(state): State<Arc<AppState>>) -> Json<Value> {
    let registered = state.orchestrator.registry().names();
    let providers: Vec<Value> = list_drivers()
        .iter()
        .filter(|d| registered.iter().any(|r| r == d.id))
        .map(|d| json!({ "id": d.id, "name": d.name, "description": d.description }))
        .collect();
    Json(json!({ "providers": providers }))
}

async fn list_models(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let models = state
        .orchestrator
        .registry()
        .list_models(&Ctx::background())
        .await?;
    Ok(Json(json!({ "models": models })))
}

async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "tools": state.toolkit.specs() }))
}

async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Value> {
    let agents: Vec<Value> = state
        .agents
        .names()
        .into_iter()
        .filter_map(|name| state.agents.get(&name).ok().map(|def| {
            json!({
                "name": def.name,
                "version": def.version,
                "model": def.model,
                "tools": def.tools,
                "has_input_schema": def.input_schema.is_some(),
                "has_output_schema": def.output_schema.is_some(),
            })
        }))
        .collect();
    Json(json!({ "agents": agents }))
}

// ─── Sessions ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    label: String,
    #[serde(default)]
    default_model: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<Json<Session>> {
    let mut session = Session::new(req.label);
    session.default_model = req.default_model;
    session.system_prompt = req.system_prompt;
    let id = state.orchestrator.store().create(session).await?;
    Ok(Json(state.orchestrator.store().get(&id).await?))
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<SessionFilter>,
) -> ApiResult<Json<Value>> {
    let sessions = state.orchestrator.store().list(&filter).await?;
    Ok(Json(json!({ "sessions": sessions })))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.orchestrator.store().get(&id).await?))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.orchestrator.store().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Generation ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct GenerationRequest {
    /// Required for `/v1/chat`, ignored by `/v1/ask`.
    #[serde(default)]
    session: Option<String>,
    message: String,
    /// Data URLs attached to the user message.
    #[serde(default)]
    attachments: Vec<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    options: GenerateOptions,
    /// Restrict the process toolkit to these tools for this turn.
    /// Absent means no tools.
    #[serde(default)]
    tools: Option<Vec<String>>,
    #[serde(default)]
    stream: bool,
}

impl GenerationRequest {
    fn build_message(&self) -> Result<Message> {
        let mut attachments = Vec::with_capacity(self.attachments.len());
        for url in &self.attachments {
            attachments.push(
                manifold_attach::from_data_url(url)
                    .map_err(|e| Error::BadParameter(e.to_string()))?,
            );
        }
        Ok(Message::user_with_attachments(self.message.clone(), attachments))
    }

    fn build_toolkit(&self, full: &Toolkit) -> Result<Option<Toolkit>> {
        match &self.tools {
            None => Ok(None),
            Some(names) => Ok(Some(full.subset(names)?)),
        }
    }
}

fn turn_response(out: &TurnOutcome) -> Json<Value> {
    Json(json!({
        "message": out.message,
        "usage": out.usage,
        "tool_calls": out.tool_trace,
        "iterations": out.iterations,
        "alternates": out.alternates,
        "persist_error": out.persist_error,
    }))
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerationRequest>,
) -> ApiResult<Response> {
    let session = req
        .session
        .clone()
        .ok_or_else(|| Error::BadParameter("'session' is required for /v1/chat".into()))?;
    let message = req.build_message()?;
    let toolkit = req.build_toolkit(&state.toolkit)?;

    if req.stream {
        let (tx, rx) = tokio::sync::mpsc::channel::<Delta>(64);
        let orchestrator = Arc::clone(&state.orchestrator);
        tokio::spawn(async move {
            let result = orchestrator
                .run_turn(
                    &Ctx::background(),
                    &session,
                    TurnInput::UserMessage(message),
                    req.model.as_deref(),
                    &req.options,
                    toolkit.as_ref(),
                    Some(tx),
                )
                .await;
            if let Err(e) = result {
                error!("streaming chat turn failed: {e}");
            }
        });
        return Ok(sse_response(rx).into_response());
    }

    let out = state
        .orchestrator
        .run_turn(
            &Ctx::background(),
            &session,
            TurnInput::UserMessage(message),
            req.model.as_deref(),
            &req.options,
            toolkit.as_ref(),
            None,
        )
        .await?;
    Ok(turn_response(&out).into_response())
}

async fn ask(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerationRequest>,
) -> ApiResult<Response> {
    let model = req
        .model
        .clone()
        .ok_or_else(|| Error::BadParameter("'model' is required for /v1/ask".into()))?;
    let message = req.build_message()?;
    let toolkit = req.build_toolkit(&state.toolkit)?;

    if req.stream {
        let (tx, rx) = tokio::sync::mpsc::channel::<Delta>(64);
        let orchestrator = Arc::clone(&state.orchestrator);
        tokio::spawn(async move {
            let result = orchestrator
                .run_detached(
                    &Ctx::background(),
                    &model,
                    message,
                    &req.options,
                    toolkit.as_ref(),
                    Some(tx),
                )
                .await;
            if let Err(e) = result {
                error!("streaming ask turn failed: {e}");
            }
        });
        return Ok(sse_response(rx).into_response());
    }

    let out = state
        .orchestrator
        .run_detached(
            &Ctx::background(),
            &model,
            message,
            &req.options,
            toolkit.as_ref(),
            None,
        )
        .await?;
    Ok(turn_response(&out).into_response())
}

fn sse_response(
    rx: tokio::sync::mpsc::Receiver<Delta>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|delta| {
        Ok(Event::default()
            .json_data(&delta)
            .unwrap_or_else(|_| Event::default().data("{}")))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ─── Embeddings ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingInput {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
struct EmbeddingsRequest {
    model: String,
    input: EmbeddingInput,
    #[serde(default)]
    options: GenerateOptions,
}

async fn embeddings(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmbeddingsRequest>,
) -> ApiResult<Json<Value>> {
    let inputs = match req.input {
        EmbeddingInput::One(s) => vec![s],
        EmbeddingInput::Many(v) => v,
    };
    let embedder = manifold_core::Embedder::new(Arc::clone(state.orchestrator.registry()));
    let vectors = embedder
        .embed_batch(&Ctx::background(), &req.model, &inputs, &req.options)
        .await?;
    Ok(Json(json!({ "model": req.model, "embeddings": vectors })))
}

// ─── Agents ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RunAgentRequest {
    #[serde(default)]
    input: Value,
    #[serde(default)]
    session: Option<String>,
    /// Delete the run's session afterwards.  Defaults to true for fresh
    /// sessions.
    #[serde(default)]
    ephemeral: Option<bool>,
}

async fn run_agent(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<RunAgentRequest>,
) -> ApiResult<Json<Value>> {
    let def = state.agents.get(&name)?.clone();
    let opts = AgentRunOptions {
        session_id: req.session,
        ephemeral: req.ephemeral.unwrap_or(true),
        keep_session_on_failure: false,
    };
    let out = state
        .runner()
        .run(&Ctx::background(), &def, &req.input, &opts)
        .await?;
    Ok(Json(json!({
        "agent": def.name,
        "text": out.text,
        "output": out.output,
        "session": out.session_id,
        "usage": out.turn.usage,
    })))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_and_statuses_line_up() {
        let cases = [
            (Error::BadParameter("x".into()), StatusCode::BAD_REQUEST, "bad-parameter"),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND, "not-found"),
            (Error::SessionBusy("x".into()), StatusCode::CONFLICT, "session-busy"),
            (Error::Cancelled, StatusCode::REQUEST_TIMEOUT, "cancelled"),
            (Error::Transient("x".into()), StatusCode::BAD_GATEWAY, "provider-transient"),
            (
                Error::RateLimited { retry_after: None },
                StatusCode::TOO_MANY_REQUESTS,
                "rate-limited",
            ),
        ];
        for (err, status, kind) in cases {
            assert_eq!(error_kind(&err), kind);
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn generation_request_parses_minimal_payload() {
        let req: GenerationRequest =
            serde_json::from_str(r#"{"message": "hi", "model": "mock/eliza-en"}"#).unwrap();
        assert_eq!(req.message, "hi");
        assert!(!req.stream);
        assert!(req.tools.is_none());
        let msg = req.build_message().unwrap();
        assert_eq!(msg.text(), "hi");
    }

    #[test]
    fn generation_request_rejects_bad_attachment() {
        let req: GenerationRequest = serde_json::from_str(
            r#"{"message": "hi", "attachments": ["https://example.com/x.png"]}"#,
        )
        .unwrap();
        assert!(req.build_message().is_err());
    }

    #[test]
    fn embedding_input_accepts_string_or_array() {
        let one: EmbeddingsRequest =
            serde_json::from_str(r#"{"model": "m", "input": "hello"}"#).unwrap();
        assert!(matches!(one.input, EmbeddingInput::One(_)));
        let many: EmbeddingsRequest =
            serde_json::from_str(r#"{"model": "m", "input": ["a", "b"]}"#).unwrap();
        assert!(matches!(many.input, EmbeddingInput::Many(v) if v.len() == 2));
    }
}
