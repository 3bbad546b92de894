// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! The interception pipeline: drives every exchange through plugin hooks,
//! the network call, and the log feed.
//!
//! ```text
//! Created -> RequestPhase -> [MockShortCircuit | NetworkPhase]
//!         -> ResponsePhase -> Logged -> Released
//! ```
//!
//! Hook faults never escape: each one is logged, recorded as a `Warning`
//! entry on the exchange, and the exchange carries on.

use crate::capture::CaptureWriter;
use crate::config::Config;
use crate::error::{ConfigError, Hook, HookFault};
use crate::exchange::{Exchange, ExchangePhase, RequestData, ResponseData};
use crate::plugin::{HookContext, HookRunner, RegisteredPlugin};
use crate::recording::{RecordingSession, StoppedRecording};
use crate::request_log::{LogEntryKind, RequestLogEntry};
use crate::state::GlobalState;
use crate::watch::UrlWatchMatcher;
use async_trait::async_trait;
use hyper::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The network side of an exchange.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: &RequestData) -> anyhow::Result<ResponseData>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub hook_timeout: Duration,
    pub stop_timeout: Duration,
    pub upstream_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            hook_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(30),
            upstream_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// What the transport gets back for one exchange.
#[derive(Debug)]
pub struct ExchangeOutcome {
    pub id: Uuid,
    pub response: ResponseData,
    pub trail: Vec<ExchangePhase>,
    pub faults: Vec<HookFault>,
    pub watched: bool,
    pub short_circuited: bool,
}

/// A network call that did not produce a response.
struct NetworkFailure {
    status: StatusCode,
    reason: String,
}

impl NetworkFailure {
    fn response(&self) -> ResponseData {
        ResponseData::new(self.status)
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body(self.reason.clone())
    }
}

pub struct InterceptionPipeline {
    plugins: Vec<RegisteredPlugin>,
    watch: UrlWatchMatcher,
    global: GlobalState,
    recording: Arc<RecordingSession>,
    capture: Option<CaptureWriter>,
    runner: HookRunner,
    settings: PipelineSettings,
}

impl InterceptionPipeline {
    pub fn new(
        watch: UrlWatchMatcher,
        plugins: Vec<RegisteredPlugin>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            plugins,
            watch,
            global: GlobalState::new(),
            recording: Arc::new(RecordingSession::new()),
            capture: None,
            runner: HookRunner::new(
                settings.hook_timeout,
                settings.stop_timeout,
                CancellationToken::new(),
            ),
            settings,
        }
    }

    /// Build from configuration.
    ///
    /// An invalid global watch pattern is an error. A plugin with an invalid
    /// configuration is logged and left out; the rest of the pipeline runs.
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let watch = cfg.watch_matcher()?;
        let (plugins, errors) = crate::plugins::build_plugins(cfg, &watch);
        for e in &errors {
            tracing::error!(error = %e, "plugin disabled");
        }
        tracing::info!(
            plugins = plugins.len(),
            patterns = watch.patterns().len(),
            "pipeline configured"
        );
        Ok(Self::new(watch, plugins, cfg.general.pipeline_settings()))
    }

    pub fn with_capture(mut self, capture: CaptureWriter) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Tie all hooks and network calls to an external shutdown signal.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.runner = HookRunner::new(
            self.settings.hook_timeout,
            self.settings.stop_timeout,
            cancel,
        );
        self
    }

    pub fn global(&self) -> &GlobalState {
        &self.global
    }

    pub fn recording(&self) -> &Arc<RecordingSession> {
        &self.recording
    }

    pub fn plugins(&self) -> &[RegisteredPlugin] {
        &self.plugins
    }

    pub fn watch(&self) -> &UrlWatchMatcher {
        &self.watch
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.runner.cancel()
    }

    pub fn start_recording(&self) {
        self.recording.start();
    }

    /// Freeze the recording and run every plugin's stop hook once.
    pub async fn stop_recording(&self) -> Option<StoppedRecording> {
        self.recording
            .stop(
                &self.plugins,
                &self.global,
                &self.runner,
                self.settings.drain_timeout,
            )
            .await
    }

    /// Run one exchange end to end. Always yields a response.
    pub async fn process(&self, request: RequestData, upstream: &dyn Upstream) -> ExchangeOutcome {
        let _in_flight = self.recording.track();
        let mut exchange = Exchange::new(request);
        let url = exchange.request().url.clone();

        if !self.watch.matches(&url, false) {
            return self.pass_through(exchange, upstream).await;
        }

        let mut faults = Vec::new();
        let active: Vec<&RegisteredPlugin> =
            self.plugins.iter().filter(|p| p.applies_to(&url)).collect();

        let headers = exchange.request().headers.clone();
        exchange.log(LogEntryKind::InterceptedRequest { headers }, None, "");
        exchange.enter(ExchangePhase::RequestPhase);

        for slot in &active {
            if exchange.is_short_circuited() || self.cancellation().is_cancelled() {
                break;
            }
            if let Some(fault) = self.run_hook(slot, Hook::Request, &mut exchange).await {
                faults.push(fault);
            }
        }

        let mut failure = None;
        if exchange.is_short_circuited() {
            exchange.enter(ExchangePhase::MockShortCircuit);
        } else if self.cancellation().is_cancelled() {
            failure = Some(NetworkFailure {
                status: StatusCode::SERVICE_UNAVAILABLE,
                reason: "exchange cancelled before the network call".into(),
            });
        } else {
            exchange.enter(ExchangePhase::NetworkPhase);
            match self.forward(exchange.request(), upstream).await {
                Ok(response) => exchange.set_upstream_response(response),
                Err(f) => failure = Some(f),
            }
        }
        if let Some(f) = &failure {
            tracing::warn!(exchange = %exchange.id(), %url, status = f.status.as_u16(), reason = %f.reason, "network failure");
            exchange.set_upstream_response(f.response());
        }

        exchange.enter(ExchangePhase::ResponsePhase);
        if !self.cancellation().is_cancelled() {
            for slot in &active {
                if let Some(fault) = self.run_hook(slot, Hook::Response, &mut exchange).await {
                    faults.push(fault);
                }
            }
        }

        let status = exchange
            .response()
            .map(|r| r.status.as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY.as_u16());
        match &failure {
            Some(f) => exchange.log(LogEntryKind::Failed { status }, None, f.reason.clone()),
            None => exchange.log(
                LogEntryKind::InterceptedResponse { status },
                None,
                format!("{status} in {}ms", exchange.elapsed().as_millis()),
            ),
        }

        faults.extend(self.flush(&mut exchange, true).await);
        self.finish(exchange, faults, true)
    }

    /// Unwatched exchanges: forwarded untouched, one `Skipped` entry, no hooks.
    async fn pass_through(&self, mut exchange: Exchange, upstream: &dyn Upstream) -> ExchangeOutcome {
        exchange.enter(ExchangePhase::NetworkPhase);
        let response = match self.forward(exchange.request(), upstream).await {
            Ok(r) => r,
            Err(f) => {
                tracing::debug!(url = %exchange.request().url, reason = %f.reason, "unwatched request failed");
                f.response()
            }
        };
        let status = response.status.as_u16();
        exchange.set_upstream_response(response);
        exchange.enter(ExchangePhase::ResponsePhase);
        exchange.log(LogEntryKind::Skipped, None, format!("{status}"));

        let faults = self.flush(&mut exchange, false).await;
        self.finish(exchange, faults, false)
    }

    async fn forward(
        &self,
        request: &RequestData,
        upstream: &dyn Upstream,
    ) -> Result<ResponseData, NetworkFailure> {
        let limit = self.settings.upstream_timeout;
        tokio::select! {
            _ = self.cancellation().cancelled() => Err(NetworkFailure {
                status: StatusCode::SERVICE_UNAVAILABLE,
                reason: "exchange cancelled during the network call".into(),
            }),
            res = tokio::time::timeout(limit, upstream.send(request)) => match res {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(NetworkFailure {
                    status: StatusCode::BAD_GATEWAY,
                    reason: format!("upstream error: {e:#}"),
                }),
                Err(_) => Err(NetworkFailure {
                    status: StatusCode::BAD_GATEWAY,
                    reason: format!("upstream timed out after {limit:?}"),
                }),
            },
        }
    }

    async fn run_hook(
        &self,
        slot: &RegisteredPlugin,
        hook: Hook,
        exchange: &mut Exchange,
    ) -> Option<HookFault> {
        let res = {
            let mut ctx = HookContext::new(exchange, &self.global, self.cancellation(), slot.name());
            let fut = match hook {
                Hook::Request => slot.plugin().on_request(&mut ctx),
                _ => slot.plugin().on_response(&mut ctx),
            };
            self.runner.run(slot.name(), hook, fut).await
        };
        match res {
            Ok(()) => None,
            Err(fault) => {
                exchange.log(LogEntryKind::Warning, Some(slot.name()), fault.to_string());
                Some(fault)
            }
        }
    }

    /// Move the exchange to `Logged` and publish its entries in order.
    async fn flush(&self, exchange: &mut Exchange, notify_plugins: bool) -> Vec<HookFault> {
        exchange.enter(ExchangePhase::Logged);
        let entries = exchange.take_entries();
        self.publish(&entries, notify_plugins).await
    }

    async fn publish(&self, entries: &[RequestLogEntry], notify_plugins: bool) -> Vec<HookFault> {
        let mut faults = Vec::new();
        if notify_plugins {
            for entry in entries {
                for slot in self.plugins.iter().filter(|p| p.applies_to(&entry.url)) {
                    let fut = slot.plugin().on_log(entry, &self.global);
                    if let Err(fault) = self.runner.run(slot.name(), Hook::Log, fut).await {
                        faults.push(fault);
                    }
                }
            }
        }

        if let Some(capture) = &self.capture {
            if let Err(e) = capture.write_entries(entries).await {
                tracing::warn!(error = %e, "failed to write capture entries");
            }
        }

        self.recording.append(entries);
        faults
    }

    fn finish(&self, exchange: Exchange, faults: Vec<HookFault>, watched: bool) -> ExchangeOutcome {
        let id = exchange.id();
        let short_circuited = exchange.is_short_circuited();
        let elapsed = exchange.elapsed();
        let (trail, response) = exchange.release();
        let response =
            response.unwrap_or_else(|| ResponseData::new(StatusCode::BAD_GATEWAY));
        tracing::debug!(
            exchange = %id,
            status = response.status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            watched,
            faults = faults.len(),
            "exchange complete"
        );
        ExchangeOutcome {
            id,
            response,
            trail,
            faults,
            watched,
            short_circuited,
        }
    }
}

impl std::fmt::Debug for InterceptionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptionPipeline")
            .field("plugins", &self.plugins)
            .field("watch", &self.watch)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
