// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Delays requests by a random amount to simulate slow networks.

use crate::config::PluginConfig;
use crate::error::ConfigError;
use crate::plugin::{HookContext, Plugin};
use crate::request_log::LogEntryKind;
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
struct LatencySettings {
    #[serde(default)]
    min_ms: u64,
    #[serde(default = "default_max_ms")]
    max_ms: u64,
}

fn default_max_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone)]
pub struct LatencyPlugin {
    min_ms: u64,
    max_ms: u64,
}

impl LatencyPlugin {
    pub const NAME: &'static str = "LatencyPlugin";

    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn from_config(entry: &PluginConfig) -> Result<Self, ConfigError> {
        let s: LatencySettings = entry.parse()?;
        if s.min_ms > s.max_ms {
            return Err(entry.invalid(anyhow::anyhow!(
                "min_ms ({}) must not exceed max_ms ({})",
                s.min_ms,
                s.max_ms
            )));
        }
        Ok(Self::new(s.min_ms, s.max_ms))
    }

    fn pick_delay(&self) -> Duration {
        let ms = rand::thread_rng().gen_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }
}

#[async_trait]
impl Plugin for LatencyPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn on_request(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        let delay = self.pick_delay();
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                tracing::debug!(plugin = Self::NAME, "delay interrupted by shutdown");
                return Ok(());
            }
            _ = tokio::time::sleep(delay) => {}
        }
        ctx.log(
            LogEntryKind::Processed,
            format!("delayed request by {}ms", delay.as_millis()),
        );
        Ok(())
    }
}
