// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::context::Ctx;
use crate::delta::Delta;
use crate::error::{Error, Result};
use crate::options::GenerateOptions;
use crate::types::{Message, Model, ToolSpec};

/// The canonical stream a driver produces for one generation call.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<Delta>> + Send>>;

/// Everything a provider needs for one generation call, in canonical form.
/// The provider owns the translation to and from its wire format.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Provider-scoped model id (already resolved through the catalogue).
    pub model: String,
    /// Full message history, system prompt first.  Providers are stateless
    /// with respect to sessions; the orchestrator passes everything each call.
    pub messages: Vec<Message>,
    /// Tools offered to the model this call.
    pub tools: Vec<ToolSpec>,
    pub options: GenerateOptions,
}

/// The capability every back-end satisfies.  Polymorphism is by capability
/// set, not class hierarchy: a provider is a value behind this trait, and
/// feature fan-out lives in [`crate::types::Capabilities`] flags that typed
/// options are checked against.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider id (`"google"`, `"anthropic"`, `"mistral"`, `"mock"`).
    fn name(&self) -> &str;

    /// All models this provider serves.  Called through the per-provider
    /// catalogue cache; drivers with a live listing endpoint query it here.
    async fn models(&self, ctx: &Ctx) -> Result<Vec<Model>>;

    /// Run one generation call, returning the canonical delta stream.
    /// Non-streaming callers assemble the stream to completion.
    async fn generate(&self, ctx: &Ctx, req: &GenerateRequest) -> Result<DeltaStream>;

    /// Embed a batch of inputs.  Providers without an embedding surface keep
    /// the default.
    async fn embed(
        &self,
        ctx: &Ctx,
        model: &str,
        inputs: &[String],
        options: &GenerateOptions,
    ) -> Result<Vec<Vec<f32>>> {
        let _ = (ctx, model, inputs, options);
        Err(Error::UnsupportedFeature(format!(
            "provider '{}' does not support embeddings",
            self.name()
        )))
    }
}

/// Reject typed options that reference features the target model lacks.
///
/// Shared by the drivers: options a provider does not recognize are ignored,
/// but an option that names a missing capability must fail loudly.
pub fn check_feature_options(
    provider: &str,
    model: &Model,
    options: &GenerateOptions,
    safe_prompt_supported: bool,
) -> Result<()> {
    if options.thinking_budget.is_some() && !model.capabilities.thinking {
        return Err(Error::UnsupportedFeature(format!(
            "model '{}' on {provider} does not support a thinking budget",
            model.id
        )));
    }
    if options.safe_prompt.is_some() && !safe_prompt_supported {
        return Err(Error::UnsupportedFeature(format!(
            "safe_prompt is not supported by {provider}"
        )));
    }
    Ok(())
}

/// Reject attachments the target model cannot consume.
pub fn check_attachments(model: &Model, messages: &[Message]) -> Result<()> {
    for msg in messages {
        for att in msg.attachments() {
            if att.is_image() && !model.capabilities.vision {
                return Err(Error::UnsupportedAttachment(format!(
                    "model '{}' does not accept image input ({})",
                    model.id, att.mime_type
                )));
            }
            if !att.is_image() && !att.is_audio() {
                return Err(Error::UnsupportedAttachment(format!(
                    "no model accepts '{}' attachments",
                    att.mime_type
                )));
            }
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attachment, Capabilities};

    fn model(vision: bool, thinking: bool) -> Model {
        Model {
            id: "m".into(),
            display_name: "M".into(),
            provider: "p".into(),
            aliases: vec![],
            capabilities: Capabilities { chat: true, vision, thinking, ..Default::default() },
        }
    }

    #[test]
    fn thinking_budget_refused_without_capability() {
        let opts = GenerateOptions::new().with_thinking_budget(1024);
        let err = check_feature_options("p", &model(false, false), &opts, false).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature(_)));
        assert!(check_feature_options("p", &model(false, true), &opts, false).is_ok());
    }

    #[test]
    fn safe_prompt_refused_outside_mistral() {
        let opts = GenerateOptions::new().with_safe_prompt(true);
        assert!(check_feature_options("google", &model(false, false), &opts, false).is_err());
        assert!(check_feature_options("mistral", &model(false, false), &opts, true).is_ok());
    }

    #[test]
    fn image_attachment_refused_without_vision() {
        let msgs = vec![Message::user_with_attachments(
            "look",
            vec![Attachment::new(None, "image/png", vec![1])],
        )];
        assert!(matches!(
            check_attachments(&model(false, false), &msgs),
            Err(Error::UnsupportedAttachment(_))
        ));
        assert!(check_attachments(&model(true, false), &msgs).is_ok());
    }

    #[test]
    fn unknown_attachment_kind_always_refused() {
        let msgs = vec![Message::user_with_attachments(
            "",
            vec![Attachment::new(None, "application/zip", vec![1])],
        )];
        assert!(check_attachments(&model(true, false), &msgs).is_err());
    }
}
