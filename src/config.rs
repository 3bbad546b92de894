// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Configuration loading: watch patterns, the plugin list, and timeouts.

use crate::error::ConfigError;
use crate::pipeline::PipelineSettings;
use crate::watch::UrlWatchMatcher;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Listen address, e.g. 127.0.0.1:8000
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Optional path to append log entries as JSONL
    #[serde(default)]
    pub captures: Option<String>,

    /// Directory reports are written to when a recording stops
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,

    #[serde(default = "default_hook_timeout_ms")]
    pub hook_timeout_ms: u64,

    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// How long stopping a recording waits for in-flight exchanges
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_listen() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_reports_dir() -> String {
    "reports".to_string()
}

fn default_hook_timeout_ms() -> u64 {
    5_000
}

fn default_stop_timeout_ms() -> u64 {
    30_000
}

fn default_upstream_timeout_ms() -> u64 {
    30_000
}

fn default_drain_timeout_ms() -> u64 {
    5_000
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            captures: None,
            reports_dir: default_reports_dir(),
            hook_timeout_ms: default_hook_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl GeneralConfig {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            hook_timeout: Duration::from_millis(self.hook_timeout_ms),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            upstream_timeout: Duration::from_millis(self.upstream_timeout_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }
}

/// One `[[plugins]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Narrows the global watch set for this plugin only.
    #[serde(default)]
    pub urls_to_watch: Vec<String>,

    /// Plugin-specific settings, validated by the plugin itself.
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

fn default_enabled() -> bool {
    true
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl PluginConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            urls_to_watch: Vec::new(),
            config: empty_table(),
        }
    }

    /// Deserialize the plugin's `config` table into its typed settings.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        self.config
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| self.invalid(e))
    }

    /// Wrap a validation failure so it names this plugin.
    pub fn invalid(&self, source: impl Into<anyhow::Error>) -> ConfigError {
        ConfigError::InvalidPluginConfig {
            plugin: self.name.clone(),
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    /// Global watch set. Empty means nothing is intercepted.
    #[serde(default)]
    pub urls_to_watch: Vec<String>,

    /// Plugins in pipeline order.
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl Config {
    /// Parse TOML. Example:
    ///
    /// ```toml
    /// urls_to_watch = ["https://api.contoso.com/*"]
    ///
    /// [general]
    /// listen = "127.0.0.1:8000"
    ///
    /// [[plugins]]
    /// name = "LatencyPlugin"
    /// config = { min_ms = 200, max_ms = 1000 }
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub async fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let s = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_toml_str(&s)
    }

    pub fn watch_matcher(&self) -> Result<UrlWatchMatcher, ConfigError> {
        UrlWatchMatcher::compile(&self.urls_to_watch)
    }

    pub fn enabled_plugins(&self) -> impl Iterator<Item = &PluginConfig> {
        self.plugins.iter().filter(|p| p.enabled)
    }
}
