// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Layered YAML configuration.
//!
//! Files are merged lowest to highest priority:
//! `/etc/manifold/config.yaml`, `~/.config/manifold/config.yaml`,
//! `.manifold.yaml`, `manifold.yaml`, then the explicit `--config` path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model used when a command does not name one, e.g. `mock/eliza-en`.
    #[serde(default)]
    pub default_model: Option<String>,

    /// Named provider configurations.  The key is the provider id unless
    /// `provider` overrides it:
    ///
    /// ```yaml
    /// providers:
    ///   anthropic: {}
    ///   mistral:
    ///     api_key_env: WORK_MISTRAL_KEY
    ///   local_gemini:
    ///     provider: google
    ///     base_url: http://localhost:9090
    /// ```
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub store: StoreConfig,

    /// Directory of agent definition files (`*.md`).
    #[serde(default)]
    pub agents_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Driver id when it differs from the map key.
    pub provider: Option<String>,
    /// Explicit API key; prefer `api_key_env` in files kept under version
    /// control.
    pub api_key: Option<String>,
    /// Environment variable that holds the API key.
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Session directory for the file backend.
    /// Defaults to the platform data dir, e.g. `~/.local/share/manifold/sessions`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn session_dir(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("manifold/sessions")
        })
    }
}

/// Ordered list of config file locations, lowest to highest priority.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/manifold/config.yaml")];
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("manifold/config.yaml"));
    }
    paths.push(PathBuf::from(".manifold.yaml"));
    paths.push(PathBuf::from("manifold.yaml"));
    paths
}

/// Load configuration by merging all discovered YAML files; `extra` is the
/// explicit `--config` path and wins over everything.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    for path in config_search_paths() {
        if path.is_file() {
            merge_file(&mut merged, &path)?;
        }
    }
    if let Some(path) = extra {
        merge_file(&mut merged, path)?;
    }
    let config: Config =
        serde_yaml::from_value(merged).context("interpreting merged configuration")?;
    Ok(config)
}

fn merge_file(merged: &mut serde_yaml::Value, path: &Path) -> anyhow::Result<()> {
    debug!(path = %path.display(), "loading config layer");
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let layer: serde_yaml::Value =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    merge_yaml(merged, layer);
    Ok(())
}

/// Deep-merge `layer` into `base`: mappings merge key-wise, everything else
/// replaces.
fn merge_yaml(base: &mut serde_yaml::Value, layer: serde_yaml::Value) {
    match (base, layer) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_parses_with_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert!(config.providers.is_empty());
        assert_eq!(config.store.backend, StoreBackend::File);
    }

    #[test]
    fn providers_map_parses() {
        let yaml = r#"
default_model: mock/eliza-en
providers:
  mistral:
    api_key_env: WORK_MISTRAL_KEY
  local_gemini:
    provider: google
    base_url: http://localhost:9090
store:
  backend: memory
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.default_model.as_deref(), Some("mock/eliza-en"));
        assert_eq!(
            config.providers["local_gemini"].provider.as_deref(),
            Some("google")
        );
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn deep_merge_overrides_scalars_and_merges_maps() {
        let mut base: serde_yaml::Value = serde_yaml::from_str(
            "default_model: a\nproviders:\n  mock: {}\n",
        )
        .unwrap();
        let layer: serde_yaml::Value = serde_yaml::from_str(
            "default_model: b\nproviders:\n  mistral:\n    api_key: k\n",
        )
        .unwrap();
        merge_yaml(&mut base, layer);
        let config: Config = serde_yaml::from_value(base).unwrap();
        assert_eq!(config.default_model.as_deref(), Some("b"));
        assert_eq!(config.providers.len(), 2);
    }
}
