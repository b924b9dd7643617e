// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider registry: static metadata for every supported back-end plus the
//! write-once runtime registry mapping provider id → driver instance.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::ModelCache;
use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::types::Model;

/// Metadata describing a supported provider driver.
#[derive(Debug, Clone)]
pub struct DriverMeta {
    /// Unique provider id used in model references (e.g. `"google"`).
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// One-line description shown by `manifold providers`.
    pub description: &'static str,
    /// Default environment variable that holds the API key.
    /// `None` for providers that require no key.
    pub default_api_key_env: Option<&'static str>,
    /// Default base URL when the caller does not override it.
    pub default_base_url: Option<&'static str>,
    pub requires_api_key: bool,
}

/// Complete registry of supported drivers.
pub static DRIVERS: &[DriverMeta] = &[
    DriverMeta {
        id: "google",
        name: "Google Gemini",
        description: "Google Gemini models via the Generative Language API",
        default_api_key_env: Some("GEMINI_API_KEY"),
        default_base_url: Some("https://generativelanguage.googleapis.com"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "anthropic",
        name: "Anthropic",
        description: "Anthropic Claude models",
        default_api_key_env: Some("ANTHROPIC_API_KEY"),
        default_base_url: Some("https://api.anthropic.com"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "mistral",
        name: "Mistral AI",
        description: "Mistral chat and embedding models",
        default_api_key_env: Some("MISTRAL_API_KEY"),
        default_base_url: Some("https://api.mistral.ai/v1"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "mock",
        name: "Mock",
        description: "Local deterministic provider for tests (no network)",
        default_api_key_env: None,
        default_base_url: None,
        requires_api_key: false,
    },
];

/// Look up a driver by its id.  Returns `None` for unknown ids.
pub fn get_driver(id: &str) -> Option<&'static DriverMeta> {
    DRIVERS.iter().find(|d| d.id == id)
}

pub fn list_drivers() -> &'static [DriverMeta] {
    DRIVERS
}

/// A registered provider bundled with its catalogue cache.
pub struct ProviderHandle {
    pub provider: Arc<dyn Provider>,
    pub cache: ModelCache,
}

impl ProviderHandle {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider, cache: ModelCache::default() }
    }

    pub async fn list_models(&self, ctx: &Ctx) -> Result<Vec<Model>> {
        self.cache.list(ctx, self.provider.as_ref()).await
    }

    pub async fn get_model(&self, ctx: &Ctx, name: &str) -> Result<Model> {
        self.cache.get(ctx, self.provider.as_ref(), name).await
    }
}

/// The process-wide provider registry.
///
/// Populated once at startup and then shared immutably; registration after
/// the registry has been wrapped in an `Arc` is impossible by construction.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderHandle>,
    /// Registration order, kept for stable listings.
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Result<()> {
        let name = provider.name().to_string();
        if self.providers.contains_key(&name) {
            return Err(Error::Conflict(format!(
                "provider '{name}' is already registered"
            )));
        }
        self.order.push(name.clone());
        self.providers.insert(name, ProviderHandle::new(provider));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&ProviderHandle> {
        self.providers
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("unknown provider '{name}'")))
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// All models across all registered providers, in registration order.
    pub async fn list_models(&self, ctx: &Ctx) -> Result<Vec<Model>> {
        let mut all = Vec::new();
        for name in &self.order {
            all.extend(self.providers[name].list_models(ctx).await?);
        }
        Ok(all)
    }

    /// Resolve a model reference to its owning provider and descriptor.
    ///
    /// Accepts `"provider/model"` or a bare model id/alias, in which case
    /// each provider's catalogue is searched in registration order.
    pub async fn resolve(
        &self,
        ctx: &Ctx,
        model_ref: &str,
    ) -> Result<(Arc<dyn Provider>, Model)> {
        if let Some((provider_name, model_name)) = model_ref.split_once('/') {
            let handle = self.get(provider_name)?;
            let model = handle.get_model(ctx, model_name).await?;
            return Ok((Arc::clone(&handle.provider), model));
        }
        for name in &self.order {
            let handle = &self.providers[name];
            if let Ok(model) = handle.get_model(ctx, model_ref).await {
                return Ok((Arc::clone(&handle.provider), model));
            }
        }
        Err(Error::NotFound(format!(
            "model '{model_ref}' is not served by any registered provider"
        )))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
