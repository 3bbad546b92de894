// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Built-in plugins and the name -> constructor registry.

use crate::config::{Config, PluginConfig};
use crate::error::ConfigError;
use crate::plugin::{Plugin, RegisteredPlugin};
use crate::watch::UrlWatchMatcher;
use std::sync::Arc;

pub mod execution_summary;
pub mod latency;
pub mod minimal_permissions;
pub mod mock_response;
pub mod random_error;

pub use execution_summary::ExecutionSummaryPlugin;
pub use latency::LatencyPlugin;
pub use minimal_permissions::MinimalPermissionsPlugin;
pub use mock_response::MockResponsePlugin;
pub use random_error::GenericRandomErrorPlugin;

/// Every plugin name the registry knows.
pub const PLUGINS: &[&str] = &[
    MockResponsePlugin::NAME,
    LatencyPlugin::NAME,
    GenericRandomErrorPlugin::NAME,
    MinimalPermissionsPlugin::NAME,
    ExecutionSummaryPlugin::NAME,
];

/// Construct one plugin from its configuration entry.
pub fn build_plugin(
    entry: &PluginConfig,
    watch: &UrlWatchMatcher,
) -> Result<Arc<dyn Plugin>, ConfigError> {
    let plugin: Arc<dyn Plugin> = match entry.name.as_str() {
        MockResponsePlugin::NAME => Arc::new(MockResponsePlugin::from_config(entry, watch)?),
        LatencyPlugin::NAME => Arc::new(LatencyPlugin::from_config(entry)?),
        GenericRandomErrorPlugin::NAME => Arc::new(GenericRandomErrorPlugin::from_config(entry)?),
        MinimalPermissionsPlugin::NAME => Arc::new(MinimalPermissionsPlugin::from_config(entry)?),
        ExecutionSummaryPlugin::NAME => Arc::new(ExecutionSummaryPlugin::from_config(entry)?),
        other => return Err(ConfigError::UnknownPlugin(other.to_string())),
    };
    Ok(plugin)
}

/// Build every enabled plugin in configured order.
///
/// Failures do not stop the others: each broken entry is returned as an error
/// and left out of the list.
pub fn build_plugins(
    cfg: &Config,
    watch: &UrlWatchMatcher,
) -> (Vec<RegisteredPlugin>, Vec<ConfigError>) {
    let mut plugins = Vec::new();
    let mut errors = Vec::new();

    for entry in cfg.enabled_plugins() {
        let plugin = match build_plugin(entry, watch) {
            Ok(p) => p,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        let mut slot = RegisteredPlugin::new(plugin);
        if !entry.urls_to_watch.is_empty() {
            match UrlWatchMatcher::compile(&entry.urls_to_watch) {
                Ok(w) => slot = slot.with_watch(w),
                Err(e) => {
                    errors.push(entry.invalid(e));
                    continue;
                }
            }
        }
        tracing::debug!(plugin = %entry.name, "plugin loaded");
        plugins.push(slot);
    }

    (plugins, errors)
}
