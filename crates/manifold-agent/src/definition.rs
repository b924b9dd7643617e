// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent definitions: markdown files with YAML front matter.
//!
//! ## File format
//!
//! ```markdown
//! ---
//! name: summarizer
//! version: "1.2"
//! model: mistral/mistral-small-latest
//! tools: [web_fetch]
//! input_schema:
//!   type: object
//!   required: [text]
//! output_schema:
//!   type: object
//!   required: [summary]
//! system: You are a precise summarizer.
//! ---
//! Summarize the following text in two sentences:
//!
//! {{text}}
//! ```
//!
//! The body after the closing fence is the user-message template; see
//! [`crate::template::expand`] for placeholder syntax.
//!
//! | Field           | Required | Description                                  |
//! |:----------------|:---------|:---------------------------------------------|
//! | `name`          | No       | Unique identifier. Defaults to filename stem.|
//! | `version`       | No       | Free-form version string.                    |
//! | `model`         | No       | Model reference (`provider/model` or bare).  |
//! | `tools`         | No       | Tool names available to this agent.          |
//! | `input_schema`  | No       | JSON Schema the input must satisfy.          |
//! | `output_schema` | No       | JSON Schema the final answer must satisfy.   |
//! | `system`        | No       | System prompt for the agent's session.       |

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use manifold_model::{Error, Result};

/// A parsed, validated agent definition.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub version: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    /// User-message template expanded with the run input.
    pub template: String,
    /// Names of the tools this agent may use; resolved against the process
    /// toolkit at run time.
    pub tools: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
    #[serde(default)]
    output_schema: Option<Value>,
    #[serde(default)]
    tools: Vec<String>,
}

/// Parse one agent markdown document.  `stem` names the agent when the
/// front matter does not.
pub fn parse_agent_str(raw: &str, stem: &str) -> Result<AgentDefinition> {
    let rest = raw.trim_start_matches('\n');

    let (fm, template) = if let Some(after_open) = rest.strip_prefix("---") {
        let close = after_open
            .find("\n---")
            .ok_or_else(|| Error::BadParameter(format!("agent '{stem}': unterminated front matter")))?;
        let yaml_block = &after_open[..close];
        let body = after_open[close + 4..].trim_start_matches('\n');
        let fm: FrontMatter = serde_yaml::from_str(yaml_block).map_err(|e| {
            Error::BadParameter(format!("agent '{stem}': invalid front matter: {e}"))
        })?;
        (fm, body.to_string())
    } else {
        // No front matter: the whole file is the template.
        (FrontMatter::default(), rest.to_string())
    };

    if template.trim().is_empty() {
        return Err(Error::BadParameter(format!(
            "agent '{stem}': template body is empty"
        )));
    }
    for (label, schema) in [("input", &fm.input_schema), ("output", &fm.output_schema)] {
        if let Some(schema) = schema {
            jsonschema::validator_for(schema).map_err(|e| {
                Error::BadParameter(format!("agent '{stem}': invalid {label} schema: {e}"))
            })?;
        }
    }

    Ok(AgentDefinition {
        name: fm.name.unwrap_or_else(|| stem.to_string()),
        version: fm.version,
        model: fm.model,
        system_prompt: fm.system,
        input_schema: fm.input_schema,
        output_schema: fm.output_schema,
        template,
        tools: fm.tools,
    })
}

/// A named collection of agent definitions.
#[derive(Debug, Default, Clone)]
pub struct AgentLibrary {
    agents: HashMap<String, AgentDefinition>,
}

impl AgentLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: AgentDefinition) -> Result<()> {
        if self.agents.contains_key(&def.name) {
            return Err(Error::Conflict(format!(
                "agent '{}' is already defined",
                def.name
            )));
        }
        self.agents.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&AgentDefinition> {
        self.agents
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("unknown agent '{name}'")))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Load every `*.md` file in `dir`.  Files that do not parse are skipped
    /// with a warning so one broken definition cannot take down startup.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut lib = Self::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| Error::Store(format!("reading {}: {e}", dir.display())))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("agent")
                .to_string();
            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(path = %path.display(), "skipping unreadable agent file: {e}");
                    continue;
                }
            };
            match parse_agent_str(&raw, &stem) {
                Ok(def) => {
                    if let Err(e) = lib.insert(def) {
                        warn!(path = %path.display(), "skipping agent: {e}");
                    }
                }
                Err(e) => warn!(path = %path.display(), "skipping agent: {e}"),
            }
        }
        Ok(lib)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
