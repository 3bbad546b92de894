// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Answers matching requests with canned responses instead of calling the API.

use crate::config::PluginConfig;
use crate::error::ConfigError;
use crate::exchange::ResponseData;
use crate::plugin::{HookContext, Plugin};
use crate::request_log::LogEntryKind;
use crate::watch::{UrlWatchMatcher, WatchPattern};
use async_trait::async_trait;
use hyper::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize, Default)]
struct MockSettings {
    #[serde(default)]
    mocks: Vec<MockEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct MockEntry {
    /// Wildcard URL, same syntax as `urls_to_watch`.
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default = "default_status")]
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<String>,
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Clone)]
struct Mock {
    pattern: WatchPattern,
    method: Option<String>,
    status: StatusCode,
    headers: BTreeMap<String, String>,
    body: String,
}

impl Mock {
    fn matches(&self, method: &str, url: &str) -> bool {
        self.method
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case(method))
            .unwrap_or(true)
            && self.pattern.is_match(url)
    }

    fn response(&self) -> ResponseData {
        self.headers.iter().fold(
            ResponseData::new(self.status).with_body(self.body.clone()),
            |r, (name, value)| r.with_header(name, value),
        )
    }
}

#[derive(Debug)]
pub struct MockResponsePlugin {
    mocks: Vec<Mock>,
}

impl MockResponsePlugin {
    pub const NAME: &'static str = "MockResponsePlugin";

    pub fn from_config(entry: &PluginConfig, watch: &UrlWatchMatcher) -> Result<Self, ConfigError> {
        let settings: MockSettings = entry.parse()?;

        let mut mocks = Vec::with_capacity(settings.mocks.len());
        for (idx, m) in settings.mocks.iter().enumerate() {
            let status = StatusCode::from_u16(m.status).map_err(|_| {
                entry.invalid(anyhow::anyhow!(
                    "mock at index {} has invalid status {}",
                    idx,
                    m.status
                ))
            })?;
            let pattern = WatchPattern::compile(&m.url)?;
            if pattern.is_exclude() {
                return Err(entry.invalid(anyhow::anyhow!(
                    "mock at index {} uses an exclusion URL {}",
                    idx,
                    m.url
                )));
            }
            mocks.push(Mock {
                pattern,
                method: m.method.clone(),
                status,
                headers: m.headers.clone(),
                body: m.body.clone().unwrap_or_default(),
            });
        }

        for url in watch.unwatched(settings.mocks.iter().map(|m| m.url.as_str())) {
            tracing::warn!(plugin = Self::NAME, %url, "mock URL is not covered by urls_to_watch and will never be served");
        }

        Ok(Self { mocks })
    }

    pub fn len(&self) -> usize {
        self.mocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mocks.is_empty()
    }
}

#[async_trait]
impl Plugin for MockResponsePlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn on_request(&self, ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        let request = ctx.exchange.request();
        let Some(mock) = self
            .mocks
            .iter()
            .find(|m| m.matches(request.method.as_str(), &request.url))
        else {
            return Ok(());
        };

        let status = mock.status.as_u16();
        let message = format!("{} {} mocked with {}", request.method, request.url, status);
        ctx.exchange.respond(mock.response());
        ctx.log(LogEntryKind::Mocked { status }, message);
        Ok(())
    }
}
