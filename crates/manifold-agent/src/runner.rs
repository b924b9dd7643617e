// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent runner: materializes a definition into a session and a prompt,
//! drives the orchestrator, and validates the structured output.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use manifold_core::{Orchestrator, TurnInput, TurnOutcome};
use manifold_model::{Ctx, Error, GenerateOptions, Message, Result, Session};
use manifold_store::SessionStore;
use manifold_tools::Toolkit;

use crate::definition::AgentDefinition;
use crate::template::expand;

/// How one agent invocation handles its session.
#[derive(Debug, Clone, Default)]
pub struct AgentRunOptions {
    /// Run inside an existing session instead of a fresh one.
    pub session_id: Option<String>,
    /// Delete the session after completion.  Applies on failure too unless
    /// [`AgentRunOptions::keep_session_on_failure`] is set.  Ignored when the
    /// caller supplied its own session.
    pub ephemeral: bool,
    pub keep_session_on_failure: bool,
}

impl AgentRunOptions {
    /// Fresh throwaway session, removed after the run.
    pub fn ephemeral() -> Self {
        Self { ephemeral: true, ..Default::default() }
    }

    pub fn in_session(id: impl Into<String>) -> Self {
        Self { session_id: Some(id.into()), ..Default::default() }
    }
}

#[derive(Debug, Clone)]
pub struct AgentRunOutcome {
    /// The final assistant text.
    pub text: String,
    /// Parsed output when the definition carries an output schema.
    pub output: Option<Value>,
    /// The session the run used (already deleted when ephemeral).
    pub session_id: String,
    pub turn: TurnOutcome,
}

pub struct AgentRunner {
    orchestrator: Arc<Orchestrator>,
    /// The full process toolkit; each run restricts it to the definition's
    /// tool list.
    toolkit: Toolkit,
}

impl AgentRunner {
    pub fn new(orchestrator: Arc<Orchestrator>, toolkit: Toolkit) -> Self {
        Self { orchestrator, toolkit }
    }

    /// Invoke `def` with `input`.
    pub async fn run(
        &self,
        ctx: &Ctx,
        def: &AgentDefinition,
        input: &Value,
        opts: &AgentRunOptions,
    ) -> Result<AgentRunOutcome> {
        if let Some(schema) = &def.input_schema {
            let validator = jsonschema::validator_for(schema).map_err(|e| {
                Error::BadParameter(format!("agent '{}' input schema: {e}", def.name))
            })?;
            if let Err(e) = validator.validate(input) {
                return Err(Error::InvalidInput(format!(
                    "agent '{}' input: {e}",
                    def.name
                )));
            }
        }

        let prompt = expand(&def.template, input);
        let kit = self.toolkit.subset(&def.tools)?;

        let store = self.orchestrator.store();
        let (session_id, owns_session) = match &opts.session_id {
            Some(id) => {
                store.get(id).await?;
                (id.clone(), false)
            }
            None => {
                let mut session = Session::new(format!("agent:{}", def.name));
                session.default_model = def.model.clone();
                session.system_prompt = def.system_prompt.clone();
                (store.create(session).await?, true)
            }
        };
        debug!(agent = %def.name, session = %session_id, "running agent");

        let result = self
            .orchestrator
            .run_turn(
                ctx,
                &session_id,
                TurnInput::UserMessage(Message::user(prompt)),
                def.model.as_deref(),
                &GenerateOptions::default(),
                (!kit.is_empty()).then_some(&kit),
                None,
            )
            .await
            .and_then(|turn| {
                let text = turn.message.text();
                let output = match &def.output_schema {
                    Some(schema) => Some(validate_output(&def.name, schema, &text)?),
                    None => None,
                };
                Ok(AgentRunOutcome { text, output, session_id: session_id.clone(), turn })
            });

        let cleanup = owns_session
            && opts.ephemeral
            && (result.is_ok() || !opts.keep_session_on_failure);
        if cleanup {
            if let Err(e) = store.delete(&session_id).await {
                warn!(session = %session_id, "failed to delete ephemeral agent session: {e}");
            }
        }
        result
    }
}

fn validate_output(agent: &str, schema: &Value, text: &str) -> Result<Value> {
    let parsed: Value = serde_json::from_str(text).map_err(|e| {
        Error::InvalidOutput(format!("agent '{agent}' answer is not JSON: {e}"))
    })?;
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| Error::BadParameter(format!("agent '{agent}' output schema: {e}")))?;
    if let Err(e) = validator.validate(&parsed) {
        return Err(Error::InvalidOutput(format!("agent '{agent}' output: {e}")));
    }
    Ok(parsed)
}
