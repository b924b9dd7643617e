// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The in-process SDK surface: thin, typed entry points over the
//! orchestrator and the provider registry.

use std::sync::Arc;

use manifold_model::{
    Ctx, DeltaSink, Error, GenerateOptions, Message, Model, Provider, ProviderRegistry, Result,
};
use manifold_tools::Toolkit;

use crate::orchestrator::{Orchestrator, TurnInput, TurnOutcome};

/// A view of one registered provider: its identity and model catalogue.
pub struct Client {
    registry: Arc<ProviderRegistry>,
    provider: String,
}

impl Client {
    pub fn new(registry: Arc<ProviderRegistry>, provider: impl Into<String>) -> Result<Self> {
        let provider = provider.into();
        registry.get(&provider)?;
        Ok(Self { registry, provider })
    }

    pub fn name(&self) -> &str {
        &self.provider
    }

    pub async fn list_models(&self, ctx: &Ctx) -> Result<Vec<Model>> {
        self.registry.get(&self.provider)?.list_models(ctx).await
    }

    pub async fn get_model(&self, ctx: &Ctx, name: &str) -> Result<Model> {
        self.registry.get(&self.provider)?.get_model(ctx, name).await
    }
}

/// Text generation over any registered provider, with or without a session.
pub struct Generator {
    orchestrator: Arc<Orchestrator>,
}

impl Generator {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// One stateless turn.  No session is created.
    pub async fn without_session(
        &self,
        ctx: &Ctx,
        model: &str,
        message: Message,
        options: &GenerateOptions,
        toolkit: Option<&Toolkit>,
        sink: Option<DeltaSink>,
    ) -> Result<TurnOutcome> {
        self.orchestrator
            .run_detached(ctx, model, message, options, toolkit, sink)
            .await
    }

    /// One turn against a persisted session.
    pub async fn with_session(
        &self,
        ctx: &Ctx,
        session_id: &str,
        message: Message,
        model: Option<&str>,
        options: &GenerateOptions,
        toolkit: Option<&Toolkit>,
        sink: Option<DeltaSink>,
    ) -> Result<TurnOutcome> {
        self.orchestrator
            .run_turn(
                ctx,
                session_id,
                TurnInput::UserMessage(message),
                model,
                options,
                toolkit,
                sink,
            )
            .await
    }
}

/// Embeddings over any registered provider.
pub struct Embedder {
    registry: Arc<ProviderRegistry>,
}

impl Embedder {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub async fn embed(
        &self,
        ctx: &Ctx,
        model_ref: &str,
        text: &str,
        options: &GenerateOptions,
    ) -> Result<Vec<f32>> {
        let mut vectors = self
            .embed_batch(ctx, model_ref, &[text.to_string()], options)
            .await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Permanent("provider returned no embedding".into()))
    }

    pub async fn embed_batch(
        &self,
        ctx: &Ctx,
        model_ref: &str,
        texts: &[String],
        options: &GenerateOptions,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(Error::BadParameter("no inputs to embed".into()));
        }
        let (provider, model) = self.registry.resolve(ctx, model_ref).await?;
        if !model.capabilities.embedding {
            return Err(Error::UnsupportedFeature(format!(
                "model '{}' does not produce embeddings",
                model.id
            )));
        }
        provider.embed(ctx, &model.id, texts, options).await
    }
}
