// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde_json::Value;

use manifold_model::{Ctx, Result, ToolSpec};

/// Trait every registered tool implements.
///
/// Handlers are pure functions of `(decoded arguments, context)`: they own no
/// shared mutable state and must be safe for concurrent invocation.  Failures
/// are ordinary `Err` values; the executor turns them into error-valued
/// results that flow back to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema of the arguments object.
    fn parameters_schema(&self) -> Value;
    /// Execute with already schema-validated arguments.  The context carries
    /// the turn's deadline and cancellation signal.
    async fn call(&self, ctx: &Ctx, args: Value) -> Result<Value>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

type Handler =
    Box<dyn Fn(Ctx, Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// A tool built from a plain async closure — the common case for callers
/// that register a handful of application functions.
pub struct FnTool {
    name: String,
    description: String,
    schema: Value,
    handler: Handler,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Ctx, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Box::new(move |ctx, args| Box::pin(handler(ctx, args))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn call(&self, ctx: &Ctx, args: Value) -> Result<Value> {
        (self.handler)(ctx.clone(), args).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
