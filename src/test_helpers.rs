// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Shared test utilities to reduce duplication across test modules.

use crate::exchange::{RequestData, ResponseData};
use crate::pipeline::Upstream;
use crate::plugin::{HookContext, Plugin, StopContext};
use crate::request_log::{LogEntryKind, RequestLogEntry};
use crate::state::GlobalState;
use async_trait::async_trait;
use hyper::{Method, StatusCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A GET request for `url` with no headers or body.
pub fn get(url: &str) -> RequestData {
    RequestData::new(Method::GET, url)
}

/// A request carrying a bearer token.
pub fn get_with_bearer(url: &str, token: &str) -> RequestData {
    let mut req = get(url);
    if let Ok(v) = format!("Bearer {token}").parse() {
        req.headers.insert(hyper::header::AUTHORIZATION, v);
    }
    req
}

/// A log entry of `kind` for a fresh exchange.
pub fn entry(method: &str, url: &str, kind: LogEntryKind) -> RequestLogEntry {
    RequestLogEntry::new(Uuid::new_v4(), method, url, kind, "")
}

/// Ordered record of hook invocations shared between a plugin and its test.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: String) {
        self.0.lock().expect("call log").push(call);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().expect("call log").clone()
    }
}

/// Records the hooks it receives as `Name:hook`. Log hooks only on request.
pub struct TracePlugin {
    name: String,
    calls: CallLog,
    log_hooks: bool,
}

impl TracePlugin {
    pub fn new(name: &str, calls: CallLog) -> Self {
        Self {
            name: name.to_string(),
            calls,
            log_hooks: false,
        }
    }

    pub fn with_log_hooks(mut self) -> Self {
        self.log_hooks = true;
        self
    }
}

#[async_trait]
impl Plugin for TracePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_request(&self, _ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        self.calls.push(format!("{}:on_request", self.name));
        Ok(())
    }

    async fn on_response(&self, _ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
        self.calls.push(format!("{}:on_response", self.name));
        Ok(())
    }

    async fn on_log(&self, entry: &RequestLogEntry, _global: &GlobalState) -> anyhow::Result<()> {
        if self.log_hooks {
            self.calls
                .push(format!("{}:on_log:{}", self.name, entry.kind.label()));
        }
        Ok(())
    }

    async fn on_stop(&self, _ctx: &mut StopContext<'_>) -> anyhow::Result<()> {
        self.calls.push(format!("{}:on_stop", self.name));
        Ok(())
    }
}

/// Answers every request with the same response and counts calls.
pub struct StaticUpstream {
    pub response: ResponseData,
    pub calls: AtomicUsize,
}

impl StaticUpstream {
    pub fn ok(body: &'static str) -> Self {
        Self {
            response: ResponseData::new(StatusCode::OK).with_body(body),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Upstream for StaticUpstream {
    async fn send(&self, _request: &RequestData) -> anyhow::Result<ResponseData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Fails every request as if the host were down.
pub struct FailingUpstream;

#[async_trait]
impl Upstream for FailingUpstream {
    async fn send(&self, _request: &RequestData) -> anyhow::Result<ResponseData> {
        anyhow::bail!("connection refused")
    }
}

/// Never answers.
pub struct HangingUpstream;

#[async_trait]
impl Upstream for HangingUpstream {
    async fn send(&self, _request: &RequestData) -> anyhow::Result<ResponseData> {
        std::future::pending::<()>().await;
        anyhow::bail!("unreachable")
    }
}
