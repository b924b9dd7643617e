// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Canonical data model and provider capability for the manifold gateway.
//!
//! Everything the rest of the workspace agrees on lives here: messages and
//! content blocks, sessions, the streaming delta shape, the error taxonomy,
//! the `Provider` trait, and the concrete drivers (Google Gemini, Anthropic
//! Claude, Mistral, and a local mock).

pub mod cache;
pub mod registry;
pub mod sse;
mod anthropic;
mod context;
mod delta;
mod error;
mod google;
mod mistral;
mod mock;
mod options;
mod provider;
mod session;
mod types;

pub use anthropic::AnthropicProvider;
pub use context::Ctx;
pub use delta::{Delta, DeltaSink, FinishReason};
pub use error::{Error, Result};
pub use google::GoogleProvider;
pub use mistral::MistralProvider;
pub use mock::{MockProvider, Script, ScriptedProvider};
pub use options::{GenerateOptions, OutputFormat, ToolChoice, ToolChoiceMode};
pub use provider::{
    check_attachments, check_feature_options, DeltaStream, GenerateRequest, Provider,
};
pub use registry::{get_driver, list_drivers, DriverMeta, ProviderRegistry};
pub use session::{Session, SessionFilter, SessionSummary};
pub use types::*;

use std::sync::Arc;

/// Construct a provider driver from its id and credentials.
///
/// The API key falls back to the driver's default environment variable when
/// not passed explicitly; see [`registry::DRIVERS`] for the supported ids.
pub fn from_credentials(
    provider_id: &str,
    api_key: Option<String>,
    base_url: Option<String>,
) -> Result<Arc<dyn Provider>> {
    let meta = registry::get_driver(provider_id)
        .ok_or_else(|| Error::NotFound(format!("unknown provider '{provider_id}'")))?;
    let key = api_key.or_else(|| {
        meta.default_api_key_env
            .and_then(|var| std::env::var(var).ok())
    });
    if meta.requires_api_key && key.is_none() {
        return Err(Error::Permanent(format!(
            "provider '{}' requires an API key ({} not set)",
            provider_id,
            meta.default_api_key_env.unwrap_or("api key")
        )));
    }
    match provider_id {
        "google" => Ok(Arc::new(GoogleProvider::new(key, base_url))),
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(key, base_url))),
        "mistral" => Ok(Arc::new(MistralProvider::new(key, base_url))),
        "mock" => Ok(Arc::new(MockProvider::new())),
        other => Err(Error::NotFound(format!("unknown provider '{other}'"))),
    }
}
