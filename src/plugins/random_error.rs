// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Fails a configurable share of requests with a random error status.

use crate::config::PluginConfig;
use crate::error::ConfigError;
use crate::exchange::ResponseData;
use crate::plugin::{HookContext, Plugin};
use crate::request_log::LogEntryKind;
use async_trait::async_trait;
use hyper::StatusCode;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;

/// Global state key holding the number of injected failures.
pub const FAILURES_KEY: &str = "GenericRandomErrorPlugin.failures";

#[derive(Debug, Clone, Deserialize)]
struct RandomErrorSettings {
    /// Percentage of requests to fail, 0..=100.
    #[serde(default = "default_rate")]
    rate: u8,
    #[serde(default = "default_statuses")]
    statuses: Vec<u16>,
    /// Sent as `Retry-After` on 429 and 503 responses.
    #[serde(default)]
    retry_after_seconds: Option<u64>,
}

fn default_rate() -> u8 {
    50
}

fn default_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

#[derive(Debug, Clone)]
pub struct GenericRandomErrorPlugin {
    rate: u8,
    statuses: Vec<StatusCode>,
    retry_after_seconds: Option<u64>,
}

impl GenericRandomErrorPlugin {
    pub const NAME: &'static str = "GenericRandomErrorPlugin";

    pub fn from_config(entry: &PluginConfig) -> Result<Self, ConfigError> {
        let s: RandomErrorSettings = entry.parse()?;
        if s.rate > 100 {
            return Err(entry.invalid(anyhow::anyhow!(
                "rate must be a percentage between 0 and 100, got {}",
                s.rate
            )));
        }
        if s.statuses.is_empty() {
            return Err(entry.invalid(anyhow::anyhow!("statuses cannot be empty")));
        }
        let statuses = s
            .statuses
            .iter()
            .map(|&code| match StatusCode::from_u16(code) {
                Ok(st) if st.is_client_error() || st.is_server_error() => Ok(st),
                _ => Err(entry.invalid(anyhow::anyhow!("{} is not an error status", code))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rate: s.rate,
            statuses,
            retry_after_seconds: s.retry_after_seconds,
        })
    }

    /// Roll the dice; `Some(status)` means fail this request.
    fn roll(&self) -> Option<StatusCode> {
        let mut rng = rand::thread_rng();
        if rng.gen_range(0..100u8) >= self.rate {
            return None;
        }
        self.statuses.choose(&mut rng).copied()
    }

    fn failure(&self, status: StatusCode) -> ResponseData {
        let body = serde_json::json!({
            "error": {
                "code": status.canonical_reason().unwrap_or("Error"),
                "message": format!("Simulated failure: {}", status),
            }
        });
        let mut response = ResponseData::new(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string());
        if let Some(secs) = self.retry_after_seconds {
            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
                response = response.with_header("retry-after", &secs.to_string());
            }
        }
        response
    }
}

#[async_trait]
impl Plugin for GenericRandomErrorPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn on_request(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        let Some(status) = self.roll() else {
            return Ok(());
        };

        ctx.exchange.respond(self.failure(status));
        ctx.log(
            LogEntryKind::Chaos {
                status: Some(status.as_u16()),
            },
            format!("failed with {}", status),
        );
        ctx.global.update(FAILURES_KEY, |v| {
            let n = v.and_then(serde_json::Value::as_u64).unwrap_or(0);
            Some(serde_json::json!(n + 1))
        });
        Ok(())
    }
}
