// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::sync::Arc;

use manifold_model::{Error, Result, ToolSpec};

use crate::tool::Tool;

/// The set of tools available to a turn.
///
/// Registration is append-only during startup; a toolkit handed to the
/// orchestrator is immutable.  [`Toolkit::subset`] derives the per-agent
/// restriction without copying the tool implementations.
#[derive(Default, Clone)]
pub struct Toolkit {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl Toolkit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.  Rejects duplicate names and parameter schemas that
    /// do not compile as JSON Schema.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(Error::BadParameter("tool name must not be empty".into()));
        }
        if self.tools.contains_key(&name) {
            return Err(Error::Conflict(format!(
                "tool '{name}' is already registered"
            )));
        }
        let schema = tool.parameters_schema();
        if let Err(e) = jsonschema::validator_for(&schema) {
            return Err(Error::Conflict(format!(
                "tool '{name}' has a schema-invalid parameter schema: {e}"
            )));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Schemas for every registered tool, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    /// Restrict to the named tools.  Unknown names are an error so agent
    /// definitions referencing a missing tool fail at load, not mid-turn.
    pub fn subset(&self, names: &[String]) -> Result<Toolkit> {
        let mut out = Toolkit::new();
        for name in names {
            let tool = self
                .get(name)
                .ok_or_else(|| Error::NotFound(format!("tool '{name}' is not registered")))?;
            out.tools.insert(name.clone(), tool);
        }
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
