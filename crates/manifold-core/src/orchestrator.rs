// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The conversation orchestrator: drives one user turn from submission to a
//! fully-resolved assistant response.
//!
//! A turn acquires its session's lock, validates the history, and then loops
//! provider call → tool dispatch until the model answers without tool calls
//! or the iteration budget runs out.  Nothing touches the store until the
//! turn settles; cancellation at any await point leaves the session exactly
//! as it was loaded.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use manifold_model::{
    Ctx, DeltaSink, Error, FinishReason, GenerateOptions, GenerateRequest, Message, Model,
    Provider, ProviderRegistry, Result, Role, ToolResult, ToolSpec, Usage,
};
use manifold_store::{LockRegistry, SessionStore, DEFAULT_LOCK_WAIT};
use manifold_tools::{Executor, Toolkit};

use crate::retry::RetryPolicy;
use crate::stream::{collect, Assembled};

/// Default wall-clock budget for one turn, tool iterations included.
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Default cap on provider calls within one turn.
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 8;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub turn_timeout: Duration,
    pub max_tool_iterations: u32,
    pub lock_wait: Duration,
    pub retry: RetryPolicy,
    pub executor: Executor,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            lock_wait: DEFAULT_LOCK_WAIT,
            retry: RetryPolicy::default(),
            executor: Executor::default(),
        }
    }
}

/// What the caller submits for one turn.
pub enum TurnInput {
    /// A new user message (text and/or attachments).
    UserMessage(Message),
    /// Externally produced results for the tool calls of the last assistant
    /// message, e.g. when the caller executes tools out of process.
    ToolResults(Vec<ToolResult>),
}

impl TurnInput {
    fn into_message(self) -> Result<Message> {
        match self {
            TurnInput::UserMessage(msg) => {
                if msg.role != Role::User {
                    return Err(Error::BadParameter(
                        "turn input message must have the user role".into(),
                    ));
                }
                Ok(msg)
            }
            TurnInput::ToolResults(results) => {
                if results.is_empty() {
                    return Err(Error::BadParameter(
                        "tool-result input must not be empty".into(),
                    ));
                }
                Ok(Message::tool_results(&results))
            }
        }
    }
}

/// A settled turn: the final assistant message plus a structured summary of
/// everything that happened on the way there.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub message: Message,
    /// Intermediate tool calls and their results, in execution order.
    pub tool_trace: Vec<ToolResult>,
    /// Usage summed over every provider call in the turn.
    pub usage: Usage,
    /// Provider calls performed (tool iterations plus the settling call).
    pub iterations: u32,
    /// Extra completions when `num_completions > 1` was requested.
    pub alternates: Vec<Message>,
    /// Set when the turn settled but writing the session back failed; the
    /// returned outcome is authoritative and the caller may retry persistence.
    pub persist_error: Option<String>,
}

struct TurnState {
    working: Vec<Message>,
    trace: Vec<ToolResult>,
    usage: Usage,
    iterations: u32,
}

impl TurnState {
    fn new(input: Message) -> Self {
        Self { working: vec![input], trace: Vec::new(), usage: Usage::default(), iterations: 0 }
    }

    fn executed_calls(&self) -> Vec<manifold_model::ToolCall> {
        self.trace.iter().map(|r| r.call.clone()).collect()
    }
}

pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn SessionStore>,
    locks: LockRegistry,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, store: Arc<dyn SessionStore>) -> Self {
        Self::with_config(registry, store, OrchestratorConfig::default())
    }

    pub fn with_config(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn SessionStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { registry, store, locks: LockRegistry::new(), config }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one turn against a persisted session.
    ///
    /// `model` overrides the session's default model for this turn.  The
    /// session lock is held from resolution to settlement, so concurrent
    /// turns on the same session serialize; their effects never interleave.
    pub async fn run_turn(
        &self,
        ctx: &Ctx,
        session_id: &str,
        input: TurnInput,
        model: Option<&str>,
        options: &GenerateOptions,
        toolkit: Option<&Toolkit>,
        sink: Option<DeltaSink>,
    ) -> Result<TurnOutcome> {
        options.validate()?;
        if options.num_completions.map_or(false, |n| n > 1) {
            return Err(Error::BadParameter(
                "num_completions > 1 is only available on stateless turns".into(),
            ));
        }
        let toolkit = toolkit.filter(|k| !k.is_empty());
        let turn_ctx = ctx.child_with_timeout(self.config.turn_timeout);

        let _guard = self
            .locks
            .acquire(&turn_ctx, session_id, self.config.lock_wait)
            .await?;
        let session = self.store.get(session_id).await?;
        let input_msg = input.into_message()?;

        // Check I1/I2 on the history as it will be submitted, with the new
        // input staged.  This accepts a tool-result continuation of a
        // preserved tool-call trace and rejects everything inconsistent.
        let mut probe = session.clone();
        probe.push(input_msg.clone());
        probe.validate()?;

        let model_ref = model
            .map(str::to_string)
            .or_else(|| session.default_model.clone())
            .ok_or_else(|| {
                Error::BadParameter(format!(
                    "session '{session_id}' has no default model and none was given"
                ))
            })?;
        let (provider, model) = self.registry.resolve(&turn_ctx, &model_ref).await?;
        let system = options
            .system_prompt
            .clone()
            .or_else(|| session.system_prompt.clone());

        let mut state = TurnState::new(input_msg);
        let result = self
            .drive_loop(
                &turn_ctx,
                provider.as_ref(),
                &model,
                system.as_deref(),
                &session.history,
                &mut state,
                options,
                toolkit,
                sink.as_ref(),
            )
            .await;

        match result {
            Ok(message) => {
                let persist_error = self
                    .persist(session_id, &state.working, state.usage)
                    .await
                    .err()
                    .map(|e| {
                        warn!(session = %session_id, "session persist failed after settle: {e}");
                        e.to_string()
                    });
                Ok(TurnOutcome {
                    message,
                    tool_trace: state.trace,
                    usage: state.usage,
                    iterations: state.iterations,
                    alternates: Vec::new(),
                    persist_error,
                })
            }
            // These failures preserve the partial trace in the session so a
            // follow-up turn (or an operator) can see what happened.
            Err(e @ Error::ToolLoopLimit { .. }) | Err(e @ Error::MalformedToolArguments { .. }) => {
                if let Err(pe) = self.persist(session_id, &state.working, state.usage).await {
                    warn!(session = %session_id, "failed to preserve failure trace: {pe}");
                }
                Err(e)
            }
            // Everything else (cancellation included) persists nothing.
            Err(e) => Err(e),
        }
    }

    /// Run a stateless turn: no session is created or touched.
    pub async fn run_detached(
        &self,
        ctx: &Ctx,
        model_ref: &str,
        message: Message,
        options: &GenerateOptions,
        toolkit: Option<&Toolkit>,
        sink: Option<DeltaSink>,
    ) -> Result<TurnOutcome> {
        options.validate()?;
        let toolkit = toolkit.filter(|k| !k.is_empty());
        let n = options.num_completions.unwrap_or(1);
        if n > 1 && toolkit.is_some() {
            return Err(Error::BadParameter(
                "tool loops require num_completions = 1".into(),
            ));
        }
        if message.role != Role::User {
            return Err(Error::BadParameter(
                "detached turn input must have the user role".into(),
            ));
        }
        let turn_ctx = ctx.child_with_timeout(self.config.turn_timeout);
        let (provider, model) = self.registry.resolve(&turn_ctx, model_ref).await?;

        if n > 1 {
            if sink.is_some() {
                return Err(Error::BadParameter(
                    "streaming requires num_completions = 1".into(),
                ));
            }
            return self
                .parallel_completions(&turn_ctx, provider.as_ref(), &model, message, options, n)
                .await;
        }

        let system = options.system_prompt.clone();
        let mut state = TurnState::new(message);
        let message = self
            .drive_loop(
                &turn_ctx,
                provider.as_ref(),
                &model,
                system.as_deref(),
                &[],
                &mut state,
                options,
                toolkit,
                sink.as_ref(),
            )
            .await?;
        Ok(TurnOutcome {
            message,
            tool_trace: state.trace,
            usage: state.usage,
            iterations: state.iterations,
            alternates: Vec::new(),
            persist_error: None,
        })
    }

    /// `num_completions` independent single-shot generations, first one wins
    /// the `message` slot and the rest become alternates.
    async fn parallel_completions(
        &self,
        ctx: &Ctx,
        provider: &dyn Provider,
        model: &Model,
        message: Message,
        options: &GenerateOptions,
        n: u32,
    ) -> Result<TurnOutcome> {
        let messages = compose(options.system_prompt.as_deref(), &[], &[message]);
        let req = GenerateRequest {
            model: model.id.clone(),
            messages,
            tools: Vec::new(),
            options: options.clone(),
        };
        let calls = (0..n).map(|_| self.call_provider(ctx, provider, &req, None));
        let assembled = futures::future::try_join_all(calls).await?;

        let mut usage = Usage::default();
        let mut completions: Vec<Message> = Vec::with_capacity(assembled.len());
        for a in assembled {
            usage.add(a.usage);
            let mut msg = a.message;
            stamp(&mut msg, provider, model, Some(a.usage));
            completions.push(msg);
        }
        let message = completions.remove(0);
        Ok(TurnOutcome {
            message,
            tool_trace: Vec::new(),
            usage,
            iterations: n,
            alternates: completions,
            persist_error: None,
        })
    }

    /// The inner provider ↔ tool loop shared by session and detached turns.
    ///
    /// On success the settling assistant message is appended to
    /// `state.working` and returned.  On `tool-loop-limit` and
    /// `malformed-tool-arguments` the offending assistant message is also in
    /// `state.working`, so the caller can preserve the trace.
    #[allow(clippy::too_many_arguments)]
    async fn drive_loop(
        &self,
        ctx: &Ctx,
        provider: &dyn Provider,
        model: &Model,
        system: Option<&str>,
        history: &[Message],
        state: &mut TurnState,
        options: &GenerateOptions,
        toolkit: Option<&Toolkit>,
        sink: Option<&DeltaSink>,
    ) -> Result<Message> {
        let tools: Vec<ToolSpec> = toolkit.map(Toolkit::specs).unwrap_or_default();

        loop {
            state.iterations += 1;
            if state.iterations > self.config.max_tool_iterations {
                return Err(Error::ToolLoopLimit {
                    iterations: state.iterations - 1,
                    trace: state.executed_calls(),
                });
            }

            let req = GenerateRequest {
                model: model.id.clone(),
                messages: compose(system, history, &state.working),
                tools: tools.clone(),
                options: options.clone(),
            };
            let assembled = match self.call_provider(ctx, provider, &req, sink).await {
                Ok(a) => a,
                Err(Error::MalformedToolArguments { detail, message }) => {
                    // The model's text is preserved; the undecodable call is not.
                    let mut msg = *message;
                    stamp(&mut msg, provider, model, None);
                    state.working.push(msg.clone());
                    return Err(Error::MalformedToolArguments {
                        detail,
                        message: Box::new(msg),
                    });
                }
                Err(e) => return Err(e),
            };

            let mut message = assembled.message;
            stamp(&mut message, provider, model, Some(assembled.usage));
            state.usage.add(assembled.usage);

            match assembled.finish {
                FinishReason::PauseTurn => {
                    // Long-running thinking: resubmit the same history.  The
                    // resubmission counts against the iteration budget.
                    debug!(model = %model.id, "provider paused the turn; continuing");
                    continue;
                }
                FinishReason::MaxTokens => {
                    return Err(Error::MaxTokens { message: Box::new(message) });
                }
                FinishReason::Refusal => {
                    return Err(Error::Refusal { message: Box::new(message) });
                }
                FinishReason::Stop => {}
            }

            let calls = message.tool_calls();
            if calls.is_empty() {
                // An empty assistant message with a clean stop is a valid
                // (if unhelpful) answer; it is not retried.
                state.working.push(message.clone());
                return Ok(message);
            }

            let Some(kit) = toolkit else {
                state.working.push(message);
                return Err(Error::ToolLoopLimit { iterations: state.iterations, trace: calls });
            };
            if state.iterations >= self.config.max_tool_iterations {
                state.working.push(message);
                let mut trace = state.executed_calls();
                trace.extend(calls);
                return Err(Error::ToolLoopLimit { iterations: state.iterations, trace });
            }

            state.working.push(message);
            let results = self
                .config
                .executor
                .execute_batch(ctx, kit, &calls)
                .await;
            ctx.check()?;
            state.trace.extend(results.iter().cloned());
            state.working.push(Message::tool_results(&results));
        }
    }

    /// One provider call with transient-error backoff on establishment.
    /// Errors after streaming has begun discard the partial message and
    /// surface without retry.
    async fn call_provider(
        &self,
        ctx: &Ctx,
        provider: &dyn Provider,
        req: &GenerateRequest,
        sink: Option<&DeltaSink>,
    ) -> Result<Assembled> {
        let mut attempt = 0u32;
        let stream = loop {
            ctx.check()?;
            match provider.generate(ctx, req).await {
                Ok(stream) => break stream,
                Err(e) if e.is_retryable() && attempt + 1 < self.config.retry.attempts => {
                    let delay = self.config.retry.delay(attempt);
                    warn!(
                        provider = provider.name(),
                        attempt, "transient provider error ({e}); backing off {delay:?}"
                    );
                    attempt += 1;
                    ctx.run(async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await?;
                }
                Err(e) => return Err(e),
            }
        };
        collect(ctx, stream, sink).await
    }

    async fn persist(&self, id: &str, messages: &[Message], usage: Usage) -> Result<()> {
        self.store
            .update(id, &mut |s| s.settle(messages.to_vec(), usage))
            .await
            .map(|_| ())
    }
}

fn compose(system: Option<&str>, history: &[Message], working: &[Message]) -> Vec<Message> {
    let mut out = Vec::with_capacity(history.len() + working.len() + 1);
    if let Some(prompt) = system {
        out.push(Message::system(prompt));
    }
    out.extend(history.iter().cloned());
    out.extend(working.iter().cloned());
    out
}

fn stamp(message: &mut Message, provider: &dyn Provider, model: &Model, usage: Option<Usage>) {
    message.meta.provider = Some(provider.name().to_string());
    message.meta.model = Some(model.id.clone());
    message.meta.usage = usage;
}
